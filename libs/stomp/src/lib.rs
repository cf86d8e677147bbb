//! Асинхронный STOMP 1.0–1.2 клиент поверх tokio.
//!
//! Соединение принимает любой `AsyncRead + AsyncWrite` поток, поэтому TLS
//! настраивается снаружи и передаётся уже установленным.

pub mod codec;
pub mod conn;
pub mod error;
pub mod frame;
pub mod message;
pub mod subscription;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use codec::{FrameCodec, Transmission};
pub use conn::{Conn, ConnectOptions, connect};
pub use error::StompError;
pub use frame::{Command, Frame, Headers, header};
pub use message::Message;
pub use subscription::{AckMode, Subscription};
