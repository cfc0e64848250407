//! Typed correlated calls for collaborators that share the feed socket.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::correlator::{response_field, RequestCorrelator};
use super::types::{AuthorizeInfo, BalanceInfo};
use crate::error::AppError;

async fn call_typed<T: DeserializeOwned>(
    correlator: &RequestCorrelator,
    purpose: &str,
    field: &str,
    payload: Value,
) -> Result<T, AppError> {
    let frame = correlator.call(purpose, payload).await?;
    let body = response_field(&frame, field)?;
    Ok(serde_json::from_value(body)?)
}

/// Authorize the connection. Authorization is scoped to the current socket and
/// must be repeated after every reconnect.
pub async fn authorize(
    correlator: &RequestCorrelator,
    token: &str,
) -> Result<AuthorizeInfo, AppError> {
    call_typed(correlator, "auth", "authorize", json!({ "authorize": token })).await
}

pub async fn balance(correlator: &RequestCorrelator) -> Result<BalanceInfo, AppError> {
    call_typed(correlator, "balance", "balance", json!({ "balance": 1 })).await
}

pub async fn account_status(correlator: &RequestCorrelator) -> Result<Value, AppError> {
    let frame = correlator
        .call("status", json!({ "get_account_status": 1 }))
        .await?;
    response_field(&frame, "get_account_status")
}

pub async fn ping(correlator: &RequestCorrelator) -> Result<(), AppError> {
    let frame = correlator.call("ping", json!({ "ping": 1 })).await?;
    match frame.get("ping").and_then(Value::as_str) {
        Some("pong") => Ok(()),
        other => Err(AppError::DerivApi {
            code: "UnexpectedPing".to_string(),
            message: format!("unexpected ping reply: {:?}", other),
        }),
    }
}
