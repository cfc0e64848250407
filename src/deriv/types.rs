use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Text(s) => s.trim().parse::<f64>().map_err(E::custom),
        }
    }
}

/// Deriv sends quotes as JSON numbers, a few endpoints as strings. Accept both.
pub fn string_or_number_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    NumberOrString::deserialize(deserializer)?.into_f64()
}

pub fn vec_string_or_number_to_f64<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Vec::<NumberOrString>::deserialize(deserializer)?
        .into_iter()
        .map(NumberOrString::into_f64)
        .collect()
}

/// Combined history + live subscription request (`ticks_history`).
#[derive(Debug, Serialize)]
pub struct TicksHistoryRequest<'a> {
    pub ticks_history: &'a str,
    pub count: usize,
    pub end: &'a str,
    pub style: &'a str,
    pub subscribe: u8,
}

impl<'a> TicksHistoryRequest<'a> {
    pub fn subscribe(symbol: &'a str, count: usize) -> Self {
        Self {
            ticks_history: symbol,
            count,
            end: "latest",
            style: "ticks",
            subscribe: 1,
        }
    }
}

/// Cancels a live subscription by its upstream id.
#[derive(Debug, Serialize)]
pub struct ForgetRequest<'a> {
    pub forget: &'a str,
}

#[derive(Debug, Deserialize, Default)]
pub struct EchoRequest {
    #[serde(default)]
    pub ticks_history: Option<String>,
    #[serde(default)]
    pub ticks: Option<String>,
}

impl EchoRequest {
    pub fn symbol(&self) -> Option<&str> {
        self.ticks_history.as_deref().or(self.ticks.as_deref())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionInfo {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryPayload {
    #[serde(deserialize_with = "vec_string_or_number_to_f64")]
    pub prices: Vec<f64>,
    pub times: Vec<u64>,
}

/// Snapshot frame answering a `ticks_history` request.
#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub history: HistoryPayload,
    #[serde(default)]
    pub echo_req: EchoRequest,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
}

#[derive(Debug, Deserialize)]
pub struct TickPayload {
    pub epoch: u64,
    #[serde(deserialize_with = "string_or_number_to_f64")]
    pub quote: f64,
    pub symbol: String,
}

/// Incremental frame on an active subscription.
#[derive(Debug, Deserialize)]
pub struct TickResponse {
    pub tick: TickPayload,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiErrorPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<ApiErrorPayload> for AppError {
    fn from(value: ApiErrorPayload) -> Self {
        AppError::DerivApi {
            code: value.code,
            message: value.message,
        }
    }
}

/// Shapes the feed understands. Anything else is noise on the shared socket.
#[derive(Debug)]
pub enum InboundFrame {
    History(HistoryResponse),
    Tick(TickResponse),
    Rejected {
        msg_type: String,
        symbol: Option<String>,
        error: ApiErrorPayload,
    },
    Other,
}

impl InboundFrame {
    pub fn classify(frame: &Value) -> Self {
        if let Some(error) = frame.get("error") {
            let error = ApiErrorPayload::deserialize(error).unwrap_or_else(|_| ApiErrorPayload {
                code: "UnknownError".to_string(),
                message: error.to_string(),
            });
            let symbol = frame
                .get("echo_req")
                .and_then(|echo| EchoRequest::deserialize(echo).ok())
                .and_then(|echo| echo.symbol().map(str::to_string));
            let msg_type = frame
                .get("msg_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Self::Rejected {
                msg_type,
                symbol,
                error,
            };
        }

        if frame.get("history").is_some() {
            return match HistoryResponse::deserialize(frame) {
                Ok(history) => Self::History(history),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed history frame");
                    Self::Other
                }
            };
        }

        if frame.get("tick").is_some() {
            return match TickResponse::deserialize(frame) {
                Ok(tick) => Self::Tick(tick),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed tick frame");
                    Self::Other
                }
            };
        }

        Self::Other
    }
}

/// `authorize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeInfo {
    pub loginid: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "string_or_number_to_f64")]
    pub balance: f64,
    #[serde(default)]
    pub is_virtual: u8,
}

/// `balance` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceInfo {
    #[serde(deserialize_with = "string_or_number_to_f64")]
    pub balance: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub loginid: String,
}
