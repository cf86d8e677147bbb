//! Мост между pipeline записей и очередью STOMP брокера.
//!
//! [`Source`] читает очередь с client-individual подтверждениями и держит
//! неподтверждённые сообщения до `ack`; [`Destination`] публикует записи
//! по одной с receipt на каждую.

pub mod config;
pub mod destination;
pub mod error;
pub mod metadata;
pub mod position;
pub mod registry;
pub mod source;
pub mod transport;

pub use config::{
    Config, DestinationConfig, PayloadFormat, SourceConfig, SubscriptionConfig, TlsConfig,
};
pub use destination::Destination;
pub use error::{
    ConfigError, DestinationError, PositionError, SourceError, TeardownError, TransportError,
    WriteCause, WriteError,
};
pub use position::Position;
pub use registry::PendingMessages;
pub use source::Source;
