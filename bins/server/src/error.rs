use bridge_api::{PluginError, WriteFailure};
use stomp_connector::{DestinationError, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("source: {0}")]
    Source(#[from] SourceError),

    #[error("destination: {0}")]
    Destination(#[from] DestinationError),

    #[error("read: {0}")]
    Read(#[source] PluginError),

    #[error("write: {0}")]
    Write(#[from] WriteFailure),
}
