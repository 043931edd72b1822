use thiserror::Error;

/// Errors that can occur in ws-topic-mux.
///
/// These never cross the public subscribe/unsubscribe boundary; connection
/// failures drive the `Error` connection state and the reconnect scheduler,
/// decode failures are logged and the offending frame is dropped.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Frame or payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
