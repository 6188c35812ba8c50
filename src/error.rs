use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// HTTP 401, session đã bị xoá.
    #[error("session expired or invalid; please log in again")]
    Unauthorized,

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no auth token available")]
    MissingToken,

    #[error("transport handshake failed: {0}")]
    Handshake(String),

    #[error("transport not connected")]
    NotConnected,

    #[error("malformed frame: {0}")]
    Decode(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
