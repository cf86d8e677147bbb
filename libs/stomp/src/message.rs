use bytes::Bytes;

use crate::error::StompError;
use crate::frame::{Frame, Headers, header};

/// Сообщение, доставленное подписке.
///
/// Если `err` заполнен, сообщение несёт фатальную ошибку соединения
/// (ERROR фрейм брокера или обрыв), остальные поля пусты.
#[derive(Debug, Clone)]
pub struct Message {
    pub destination: String,
    pub subscription: String,
    pub headers: Headers,
    pub body: Bytes,
    pub err: Option<StompError>,
}

impl Message {
    pub(crate) fn from_frame(frame: Frame) -> Self {
        Self {
            destination: frame.get(header::DESTINATION).unwrap_or_default().to_string(),
            subscription: frame.get(header::SUBSCRIPTION).unwrap_or_default().to_string(),
            headers: frame.headers,
            body: frame.body,
            err: None,
        }
    }

    pub(crate) fn failed(subscription: &str, err: StompError) -> Self {
        Self {
            destination: String::new(),
            subscription: subscription.to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
            err: Some(err),
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(header::MESSAGE_ID)
    }

    /// Идентификатор для ACK/NACK в STOMP 1.2 (`ack` заголовок).
    pub fn ack_id(&self) -> Option<&str> {
        self.headers.get(header::ACK)
    }
}
