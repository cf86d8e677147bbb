use std::sync::Arc;
use std::time::Duration;

/// Ошибки протокольного клиента.
///
/// `Clone`: фатальная ошибка соединения раздаётся всем подпискам.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StompError {
    #[error("io: {0}")]
    Io(Arc<std::io::Error>),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("unexpected {got} frame while waiting for {expected}")]
    UnexpectedFrame { expected: &'static str, got: String },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("no receipt for {command} within {timeout:?}")]
    ReceiptTimeout { command: &'static str, timeout: Duration },

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("no data from broker within {0:?}, heartbeat missed")]
    HeartbeatTimeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection already closed")]
    AlreadyClosed,

    #[error("subscription already completed")]
    CompletedSubscription,

    #[error("message has no {0} header")]
    MissingHeader(&'static str),
}

impl From<std::io::Error> for StompError {
    fn from(e: std::io::Error) -> Self {
        StompError::Io(Arc::new(e))
    }
}
