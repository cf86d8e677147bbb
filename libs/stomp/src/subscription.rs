use tokio::sync::mpsc;

use crate::conn::Conn;
use crate::error::StompError;
use crate::message::Message;

/// Режим подтверждения подписки (`ack` заголовок SUBSCRIBE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// Активная подписка на destination.
///
/// Сообщения приходят из reader-задачи соединения; объём in-flight
/// ограничивает брокер (prefetch), а не канал.
/// `recv` возвращает `None`, когда канал закрыт: подписка снята или
/// соединение потеряно.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    destination: String,
    rx: mpsc::UnboundedReceiver<Message>,
    conn: Conn,
    completed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        destination: String,
        rx: mpsc::UnboundedReceiver<Message>,
        conn: Conn,
    ) -> Self {
        Self { id, destination, rx, conn, completed: false }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_completed(&self) -> bool {
        self.completed || self.conn.is_closed()
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// UNSUBSCRIBE с ожиданием receipt.
    ///
    /// Повторный вызов, как и вызов после закрытия соединения,
    /// возвращает [`StompError::CompletedSubscription`].
    pub async fn unsubscribe(&mut self) -> Result<(), StompError> {
        if self.is_completed() {
            self.completed = true;
            return Err(StompError::CompletedSubscription);
        }
        self.completed = true;
        self.rx.close();
        self.conn.unsubscribe(&self.id).await
    }
}
