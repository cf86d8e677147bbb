use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use bridge_api::{PluginError, Record, RecordSource, now_nanos};
use stomp_client::{AckMode, Conn, Subscription};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::metadata::{self, READ_AT};
use crate::position::Position;
use crate::registry::PendingMessages;
use crate::transport;

/// Источник: подписка на очередь с подтверждением каждого сообщения.
///
/// `read` и `ack` вызываются конкурентно. Общее между ними состояние:
/// только [`PendingMessages`].
pub struct Source {
    conn: Conn,
    subscription: Mutex<Subscription>,
    pending: PendingMessages,
    queue: String,
    torn_down: AtomicBool,
}

impl Source {
    /// Подключиться к брокеру и подписаться.
    ///
    /// `position`: сохранённый pipeline'ом resume token. Очередь из него
    /// сверяется с конфигурацией до подключения.
    pub async fn open(config: &SourceConfig, position: Option<&[u8]>) -> Result<Self, SourceError> {
        config.validate()?;
        let queue = resolve_queue(&config.connection.queue, position)?;

        let sub = &config.subscription;
        tracing::info!(
            url = %config.connection.url,
            user = %config.connection.user,
            queue = %queue,
            client_id = config.client_id.as_deref().unwrap_or(""),
            tls = config.connection.tls.enabled,
            selector = sub.selector.as_deref().unwrap_or(""),
            prefetch_size = ?sub.prefetch_size,
            durable_subscription = sub.durable_subscription_name.as_deref().unwrap_or(""),
            "configured source"
        );

        let conn = transport::connect(&config.connection, config.client_id.as_deref()).await?;
        Self::subscribe(conn, config, queue).await
    }

    /// Подписаться поверх уже открытого соединения.
    pub async fn open_on(
        conn: Conn,
        config: &SourceConfig,
        position: Option<&[u8]>,
    ) -> Result<Self, SourceError> {
        let queue = resolve_queue(&config.connection.queue, position)?;
        Self::subscribe(conn, config, queue).await
    }

    async fn subscribe(conn: Conn, config: &SourceConfig, queue: String) -> Result<Self, SourceError> {
        let headers = config.subscription.headers();
        let subscription = match conn.subscribe(&queue, AckMode::ClientIndividual, headers).await {
            Ok(subscription) => subscription,
            Err(source) => {
                if let Err(e) = conn.disconnect().await {
                    tracing::debug!(error = %e, "disconnect after failed subscribe");
                }
                return Err(SourceError::Subscribe { queue, source });
            }
        };
        tracing::debug!(queue = %queue, subscription = subscription.id(), "opened source");

        Ok(Self {
            conn,
            subscription: Mutex::new(subscription),
            pending: PendingMessages::new(),
            queue,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Сколько сообщений прочитано, но не подтверждено.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Следующая запись или `None`, если `cancel` сработал раньше.
    ///
    /// Сообщение попадает в реестр до возврата записи, так что немедленный
    /// `ack` её position всегда находит запись.
    pub async fn read(&self, cancel: &CancellationToken) -> Result<Option<Record>, SourceError> {
        let mut subscription = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            guard = self.subscription.lock() => guard,
        };
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            message = subscription.recv() => message,
        };
        drop(subscription);

        let message = message.ok_or(SourceError::ChannelClosed)?;
        if let Some(err) = &message.err {
            return Err(SourceError::Message(err.clone()));
        }
        let message_id = message
            .message_id()
            .filter(|id| !id.is_empty())
            .ok_or(SourceError::MissingMessageId)?
            .to_string();

        let position = Position::new(message_id.as_str(), self.queue.as_str()).to_bytes();
        let mut metadata = metadata::project(&message.headers);
        metadata.insert(READ_AT.to_string(), now_nanos().to_string());
        let record = Record::create(
            position,
            metadata,
            message_id.clone().into_bytes(),
            message.body.to_vec(),
        );

        tracing::trace!(queue = %self.queue, message_id = %message_id, "read message");
        self.pending.put(message_id, message);
        Ok(Some(record))
    }

    /// Подтвердить сообщение брокеру.
    ///
    /// Id, которого нет в реестре (повтор ack, ack после teardown),
    /// даёт [`SourceError::NotFound`]. При ошибке брокера
    /// запись остаётся в реестре и ack можно повторить.
    pub async fn ack(&self, position: &[u8]) -> Result<(), SourceError> {
        let Position { message_id, .. } = Position::parse(position)?;
        let message = self
            .pending
            .get(&message_id)
            .ok_or_else(|| SourceError::NotFound { message_id: message_id.clone() })?;

        if let Err(source) = self.conn.ack(&message).await {
            return Err(SourceError::Ack { message_id, source });
        }
        self.pending.remove(&message_id);

        tracing::trace!(queue = %self.queue, message_id = %message_id, "acked message");
        Ok(())
    }

    /// UNSUBSCRIBE, затем DISCONNECT. Неподтверждённые сообщения забываются:
    /// брокер доставит их повторно.
    ///
    /// Ждёт завершения текущего `read`, поэтому read loop нужно остановить
    /// через `cancel` заранее. Повторный вызов ничего не делает.
    pub async fn teardown(&self) -> Result<(), SourceError> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = {
            let mut subscription = self.subscription.lock().await;
            transport::teardown(Some(&mut *subscription), Some(&self.conn)).await
        };
        let abandoned = self.pending.evict_all();
        tracing::debug!(queue = %self.queue, abandoned, "source torn down");
        Ok(result?)
    }
}

/// Очередь для подписки: из конфигурации или из resume position.
fn resolve_queue(configured: &str, position: Option<&[u8]>) -> Result<String, SourceError> {
    let queue = match position.filter(|p| !p.is_empty()) {
        None => configured.to_string(),
        Some(bytes) => {
            let position = Position::parse(bytes)?;
            if !configured.is_empty() && configured != position.queue {
                return Err(SourceError::QueueMismatch {
                    position_queue: position.queue,
                    configured_queue: configured.to_string(),
                });
            }
            tracing::debug!(queue = %position.queue, "got queue name from given position");
            position.queue
        }
    };
    if queue.is_empty() {
        return Err(SourceError::MissingQueue);
    }
    Ok(queue)
}

impl RecordSource for Source {
    fn read<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Record>, PluginError>> + Send + 'a>> {
        Box::pin(async move { Source::read(self, cancel).await.map_err(SourceError::into_plugin_error) })
    }

    fn ack<'a>(
        &'a self,
        position: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move { Source::ack(self, position).await.map_err(SourceError::into_plugin_error) })
    }

    fn teardown(&self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        Box::pin(async move { Source::teardown(self).await.map_err(SourceError::into_plugin_error) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use bridge_api::{ErrorKind, Operation};
    use stomp_client::testing::{BrokerScript, MockBroker};
    use stomp_client::{Command, ConnectOptions, StompError};

    fn config(queue: &str) -> SourceConfig {
        let mut config: SourceConfig = toml::from_str(
            r#"
            url = "localhost:61613"
            user = "admin"
            password = "admin"
            "#,
        )
        .unwrap();
        config.connection.queue = queue.to_string();
        config
    }

    async fn open_with(
        script: BrokerScript,
        config: &SourceConfig,
        position: Option<&[u8]>,
    ) -> (Result<Source, SourceError>, MockBroker) {
        let (io, broker) = script.spawn();
        let conn = stomp_client::connect(io, ConnectOptions::new()).await.unwrap();
        (Source::open_on(conn, config, position).await, broker)
    }

    async fn open(queue: &str) -> (Source, MockBroker) {
        let (source, broker) = open_with(BrokerScript::new(), &config(queue), None).await;
        (source.unwrap(), broker)
    }

    async fn read_one(source: &Source) -> Record {
        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(5), source.read(&cancel))
            .await
            .expect("read timed out")
            .unwrap()
            .expect("record")
    }

    #[tokio::test]
    async fn resume_position_for_other_queue_is_rejected_before_dialing() {
        let mut config = config("Q1");
        // Никто не слушает: ошибка должна случиться до подключения.
        config.connection.url = "127.0.0.1:1".into();
        let position = Position::new("ID:1", "Q2").to_bytes();

        let err = Source::open(&config, Some(&position)).await.err().unwrap();
        assert!(
            matches!(err, SourceError::QueueMismatch { ref position_queue, ref configured_queue }
                if position_queue == "Q2" && configured_queue == "Q1"),
            "{err}"
        );
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn empty_queue_adopts_resume_position_queue() {
        let position = Position::new("ID:1", "Q2").to_bytes();
        let (source, broker) = open_with(BrokerScript::new(), &config(""), Some(&position)).await;
        let source = source.unwrap();

        assert_eq!(source.queue(), "Q2");
        let subscribe = &broker.frames_of(Command::Subscribe)[0];
        assert_eq!(subscribe.get("destination"), Some("Q2"));
        assert_eq!(subscribe.get("ack"), Some("client-individual"));
    }

    #[tokio::test]
    async fn matching_queue_and_empty_position_are_accepted() {
        let position = Position::new("ID:1", "Q1").to_bytes();
        let (source, _broker) = open_with(BrokerScript::new(), &config("Q1"), Some(&position)).await;
        assert_eq!(source.unwrap().queue(), "Q1");

        let (source, _broker) = open_with(BrokerScript::new(), &config("Q1"), Some(&[])).await;
        assert_eq!(source.unwrap().queue(), "Q1");
    }

    #[test]
    fn queue_resolution_errors() {
        assert!(matches!(resolve_queue("", None), Err(SourceError::MissingQueue)));
        assert!(matches!(resolve_queue("Q", Some(b"{}")), Err(SourceError::Position(_))));
        let bad = br#"{"message_id":"1","queue":"Q","extra":true}"#;
        assert!(matches!(resolve_queue("Q", Some(bad)), Err(SourceError::Position(_))));
    }

    #[tokio::test]
    async fn subscription_options_are_forwarded() {
        let mut config = config("orders");
        config.subscription.selector = Some("priority > 5".into());
        config.subscription.prefetch_size = Some(1);
        config.subscription.retroactive = true;
        let (source, broker) = open_with(BrokerScript::new(), &config, None).await;
        source.unwrap();

        let subscribe = &broker.frames_of(Command::Subscribe)[0];
        assert_eq!(subscribe.get("selector"), Some("priority > 5"));
        assert_eq!(subscribe.get("activemq.prefetchSize"), Some("1"));
        assert_eq!(subscribe.get("activemq.retroactive"), Some("true"));
        assert!(subscribe.get("activemq.exclusive").is_none());
    }

    #[tokio::test]
    async fn failed_subscribe_disconnects() {
        let (source, broker) =
            open_with(BrokerScript::new().reject_subscribe("invalid selector"), &config("orders"), None)
                .await;
        let err = source.err().unwrap();
        assert!(matches!(err, SourceError::Subscribe { .. }), "{err}");
        assert!(err.to_string().contains("invalid selector"));
        assert_eq!(broker.frames_of(Command::Disconnect).len(), 1);
    }

    #[tokio::test]
    async fn read_builds_record_from_message() {
        let (source, broker) = open("orders").await;
        broker.deliver(
            "ID:m-1",
            r#"{"total":10}"#,
            &[("key", "value1"), ("key", "value2"), ("key2", "value3")],
        );

        let record = read_one(&source).await;
        assert_eq!(record.operation, Operation::Create);
        assert_eq!(record.key, b"ID:m-1");
        assert_eq!(record.payload, br#"{"total":10}"#);
        assert_eq!(Position::parse(&record.position).unwrap(), Position::new("ID:m-1", "orders"));

        assert_eq!(record.metadata["stomp.header.key"], "value1, value2");
        assert_eq!(record.metadata["stomp.header.key2"], "value3");
        assert_eq!(record.metadata["stomp.header.message-id"], "ID:m-1");
        assert!(record.metadata[READ_AT].parse::<i64>().unwrap() > 0);
        assert_eq!(source.pending_len(), 1);
    }

    #[tokio::test]
    async fn immediate_ack_succeeds_and_second_ack_is_not_found() {
        let (source, broker) = open("orders").await;
        broker.deliver("ID:m-1", "a", &[]);
        let record = read_one(&source).await;

        source.ack(&record.position).await.unwrap();
        assert_eq!(source.pending_len(), 0);
        assert_eq!(broker.frames_of(Command::Ack)[0].get("id"), Some("ack-ID:m-1"));

        let err = source.ack(&record.position).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { ref message_id } if message_id == "ID:m-1"));
        assert!(!err.kind().is_retryable());
        assert_eq!(broker.frames_of(Command::Ack).len(), 1);
    }

    #[tokio::test]
    async fn ack_of_unknown_id_leaves_registry_unchanged() {
        let (source, broker) = open("orders").await;
        broker.deliver("ID:m-1", "a", &[]);
        read_one(&source).await;

        let unknown = Position::new("ID:never", "orders").to_bytes();
        assert!(matches!(source.ack(&unknown).await, Err(SourceError::NotFound { .. })));
        assert_eq!(source.pending_len(), 1);
        assert!(broker.frames_of(Command::Ack).is_empty());

        assert!(matches!(source.ack(b"garbage").await, Err(SourceError::Position(_))));
    }

    #[tokio::test]
    async fn broker_ack_failure_keeps_entry_for_retry() {
        let (source, broker) = open("orders").await;
        broker.deliver("ID:m-1", "a", &[]);
        let record = read_one(&source).await;

        broker.set_fail_acks(true);
        let err = source.ack(&record.position).await.unwrap_err();
        assert!(matches!(err, SourceError::Ack { .. }), "{err}");
        assert!(err.kind().is_retryable());
        assert_eq!(source.pending_len(), 1);

        broker.set_fail_acks(false);
        source.ack(&record.position).await.unwrap();
        assert_eq!(source.pending_len(), 0);
    }

    #[tokio::test]
    async fn acks_run_concurrently_with_read() {
        let (source, broker) = open("orders").await;
        broker.deliver("ID:m-1", "a", &[]);
        let first = read_one(&source).await;

        let cancel = CancellationToken::new();
        let (read, ()) = tokio::join!(source.read(&cancel), async {
            source.ack(&first.position).await.unwrap();
            broker.deliver("ID:m-2", "b", &[]);
        });
        assert_eq!(read.unwrap().unwrap().key, b"ID:m-2");
    }

    #[tokio::test]
    async fn cancellation_returns_no_record_and_no_error() {
        let (source, _broker) = open("orders").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(source.read(&cancel).await.unwrap().is_none());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = tokio::time::timeout(Duration::from_secs(5), source.read(&cancel))
            .await
            .expect("read ignored cancellation");
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn connection_loss_surfaces_error_then_closed_channel() {
        let (source, broker) = open("orders").await;
        broker.drop_connection();

        let err = source.read(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::Message(StompError::ConnectionClosed)), "{err}");
        let err = source.read(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::ChannelClosed), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_surfaces_heartbeat_timeout() {
        let (io, _broker) = BrokerScript::new().heart_beat("100,0").spawn();
        let options = ConnectOptions::new().heart_beat(Duration::ZERO, Duration::from_millis(100));
        let conn = stomp_client::connect(io, options).await.unwrap();
        let source = Source::open_on(conn, &config("orders"), None).await.unwrap();

        let err = source.read(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::Message(StompError::HeartbeatTimeout(_))), "{err}");
        assert!(err.kind().is_retryable());
        let err = source.read(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::ChannelClosed), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_waits_until_blocked_read_is_cancelled() {
        let (source, broker) = open("orders").await;
        let cancel = CancellationToken::new();

        let (read, teardown) = tokio::join!(source.read(&cancel), async {
            let teardown = source.teardown();
            tokio::pin!(teardown);
            tokio::select! {
                _ = &mut teardown => panic!("teardown finished while read held the subscription"),
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
            cancel.cancel();
            teardown.await
        });

        assert!(read.unwrap().is_none());
        teardown.unwrap();
        assert_eq!(broker.frames_of(Command::Unsubscribe).len(), 1);
        assert_eq!(broker.frames_of(Command::Disconnect).len(), 1);
    }

    #[tokio::test]
    async fn teardown_abandons_pending_and_is_idempotent() {
        let (source, broker) = open("orders").await;
        broker.deliver("ID:m-1", "a", &[]);
        let record = read_one(&source).await;

        source.teardown().await.unwrap();
        assert_eq!(source.pending_len(), 0);
        assert_eq!(broker.frames_of(Command::Unsubscribe).len(), 1);
        assert_eq!(broker.frames_of(Command::Disconnect).len(), 1);

        assert!(matches!(source.ack(&record.position).await, Err(SourceError::NotFound { .. })));
        source.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn works_through_record_source_trait() {
        let (source, broker) = open("orders").await;
        let source: Box<dyn RecordSource> = Box::new(source);
        broker.deliver("ID:m-1", "a", &[]);

        let record = source.read(&CancellationToken::new()).await.unwrap().unwrap();
        source.ack(&record.position).await.unwrap();
        let err = source.ack(&record.position).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        source.teardown().await.unwrap();
    }
}
