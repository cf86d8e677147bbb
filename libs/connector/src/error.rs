use std::path::PathBuf;

use bridge_api::{ErrorKind, PluginError};
use stomp_client::StompError;

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("invalid `{field}`: {detail}")]
    Invalid { field: &'static str, detail: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, detail: impl Into<String>) -> Self {
        ConfigError::Invalid { field, detail: detail.into() }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Transport
// ═══════════════════════════════════════════════════════════════

/// Ошибки установки соединения, с указанием шага.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load client certificate {}: {detail}", .path.display())]
    LoadClientCert { path: PathBuf, detail: String },

    #[error("failed to load client key {}: {detail}", .path.display())]
    LoadClientKey { path: PathBuf, detail: String },

    #[error("failed to load CA certificate {}: {detail}", .path.display())]
    LoadCaCert { path: PathBuf, detail: String },

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(#[from] rustls::Error),

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    #[error("failed to dial {address}: {source}")]
    Dial { address: String, source: std::io::Error },

    #[error("TLS handshake with {address} failed: {source}")]
    TlsHandshake { address: String, source: std::io::Error },

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("STOMP handshake failed: {0}")]
    Handshake(#[source] StompError),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Config(_)
            | TransportError::LoadClientCert { .. }
            | TransportError::LoadClientKey { .. }
            | TransportError::LoadCaCert { .. }
            | TransportError::TlsConfig(_)
            | TransportError::InvalidServerName(_) => ErrorKind::Config,
            TransportError::Dial { .. }
            | TransportError::TlsHandshake { .. }
            | TransportError::Timeout(_)
            | TransportError::Handshake(_) => ErrorKind::Io,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Position
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
#[error("failed to parse position: {0}")]
pub struct PositionError(#[from] pub serde_json::Error);

// ═══════════════════════════════════════════════════════════════
//  Source
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(
        "the resume position refers to queue {position_queue:?} but the source is configured \
         for {configured_queue:?}; check whether the queue name changed since the last run"
    )]
    QueueMismatch { position_queue: String, configured_queue: String },

    #[error("no queue configured and no resume position to take it from")]
    MissingQueue,

    #[error("failed to subscribe to {queue:?}: {source}")]
    Subscribe { queue: String, source: StompError },

    #[error("subscription channel closed")]
    ChannelClosed,

    #[error("message error: {0}")]
    Message(#[source] StompError),

    #[error("received message without message-id")]
    MissingMessageId,

    #[error("message with id {message_id:?} not found")]
    NotFound { message_id: String },

    #[error("failed to ack message {message_id:?}: {source}")]
    Ack { message_id: String, source: StompError },

    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Config(_) | SourceError::QueueMismatch { .. } | SourceError::MissingQueue => {
                ErrorKind::Config
            }
            SourceError::Transport(e) => e.kind(),
            SourceError::Position(_) | SourceError::MissingMessageId => ErrorKind::Format,
            SourceError::Subscribe { .. }
            | SourceError::ChannelClosed
            | SourceError::Message(_)
            | SourceError::Ack { .. }
            | SourceError::Teardown(_) => ErrorKind::Io,
            SourceError::NotFound { .. } => ErrorKind::Logic,
        }
    }

    pub fn into_plugin_error(self) -> PluginError {
        PluginError::with_kind(self.kind(), self.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Destination
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl DestinationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DestinationError::Config(_) => ErrorKind::Config,
            DestinationError::Transport(e) => e.kind(),
            DestinationError::Teardown(_) => ErrorKind::Io,
        }
    }

    pub fn into_plugin_error(self) -> PluginError {
        PluginError::with_kind(self.kind(), self.to_string())
    }
}

/// Отказ публикации: `written` записей уже приняты брокером.
#[derive(Debug, thiserror::Error)]
#[error("failed to send record {written} to {queue:?}: {source}")]
pub struct WriteError {
    pub written: usize,
    pub queue: String,
    #[source]
    pub source: WriteCause,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteCause {
    #[error("encode record: {0}")]
    Encode(PluginError),

    #[error(transparent)]
    Send(StompError),
}

impl WriteError {
    pub fn kind(&self) -> ErrorKind {
        match &self.source {
            WriteCause::Encode(_) => ErrorKind::Format,
            WriteCause::Send(_) => ErrorKind::Io,
        }
    }

    pub fn into_write_failure(self) -> bridge_api::WriteFailure {
        bridge_api::WriteFailure {
            written: self.written,
            error: PluginError::with_kind(self.kind(), self.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Teardown
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("failed to unsubscribe: {0}")]
    Unsubscribe(#[source] StompError),

    #[error("failed to disconnect: {0}")]
    Disconnect(#[source] StompError),
}
