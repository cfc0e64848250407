use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("deriv API error ({code}): {message}")]
    DerivApi { code: String, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not connected to upstream feed")]
    NotConnected,

    #[error("connection lost before a response to {req_id} arrived")]
    ConnectionLost { req_id: String },

    #[error("request {req_id} timed out after {timeout_ms}ms")]
    Timeout { req_id: String, timeout_ms: u64 },

    #[error("session closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(value.to_string())
    }
}
