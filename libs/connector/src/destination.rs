use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use bridge_api::{PluginError, Record, RecordDestination, WriteFailure};
use stomp_client::{Conn, Headers};

use crate::config::{DestinationConfig, PayloadFormat};
use crate::error::{DestinationError, WriteCause, WriteError};
use crate::transport;

/// Приёмник: публикует записи в очередь по одной, по порядку.
pub struct Destination {
    conn: Conn,
    queue: String,
    content_type: String,
    format: PayloadFormat,
    torn_down: AtomicBool,
}

impl Destination {
    pub async fn open(config: &DestinationConfig) -> Result<Self, DestinationError> {
        config.validate()?;
        tracing::info!(
            url = %config.connection.url,
            user = %config.connection.user,
            queue = %config.connection.queue,
            content_type = %config.content_type,
            format = ?config.format,
            tls = config.connection.tls.enabled,
            "configured destination"
        );
        let conn = transport::connect(&config.connection, None).await?;
        Ok(Self::open_on(conn, config))
    }

    /// Destination поверх уже открытого соединения.
    pub fn open_on(conn: Conn, config: &DestinationConfig) -> Self {
        tracing::debug!(queue = %config.connection.queue, "opened destination");
        Self {
            conn,
            queue: config.connection.queue.clone(),
            content_type: config.content_type.clone(),
            format: config.format,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Опубликовать записи по порядку.
    ///
    /// Каждый SEND ждёт receipt брокера. На первой ошибке запись
    /// прекращается, а `WriteError::written` равно числу записей из начала
    /// среза, которые брокер уже принял. Повторять нужно хвост с этого индекса.
    pub async fn write(&self, records: &[Record]) -> Result<usize, WriteError> {
        for (written, record) in records.iter().enumerate() {
            let fail = |source| WriteError { written, queue: self.queue.clone(), source };

            let body = self.encode(record).map_err(|e| fail(WriteCause::Encode(e)))?;
            self.conn
                .send(&self.queue, Some(self.content_type.as_str()), body, Headers::new())
                .await
                .map_err(|e| fail(WriteCause::Send(e)))?;

            tracing::trace!(queue = %self.queue, index = written, "sent record");
        }
        Ok(records.len())
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>, PluginError> {
        match self.format {
            PayloadFormat::Record => record.to_json_bytes(),
            PayloadFormat::Payload => Ok(record.payload.clone()),
        }
    }

    /// DISCONNECT. Повторный вызов ничего не делает.
    pub async fn teardown(&self) -> Result<(), DestinationError> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        transport::teardown(None, Some(&self.conn)).await?;
        tracing::debug!(queue = %self.queue, "destination torn down");
        Ok(())
    }
}

impl RecordDestination for Destination {
    fn write<'a>(
        &'a self,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<usize, WriteFailure>> + Send + 'a>> {
        Box::pin(async move {
            Destination::write(self, records)
                .await
                .map_err(WriteError::into_write_failure)
        })
    }

    fn teardown(&self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        Box::pin(async move {
            Destination::teardown(self)
                .await
                .map_err(DestinationError::into_plugin_error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bridge_api::{ErrorKind, Metadata};
    use stomp_client::testing::{BrokerScript, MockBroker};
    use stomp_client::{Command, ConnectOptions};

    fn config(extra: &str) -> DestinationConfig {
        toml::from_str(&format!(
            r#"
            url = "localhost:61613"
            user = "admin"
            password = "admin"
            queue = "out"
            {extra}
            "#
        ))
        .unwrap()
    }

    async fn open(script: BrokerScript, config: &DestinationConfig) -> (Destination, MockBroker) {
        let (io, broker) = script.spawn();
        let conn = stomp_client::connect(io, ConnectOptions::new()).await.unwrap();
        (Destination::open_on(conn, config), broker)
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut metadata = Metadata::new();
                metadata.insert("source".into(), "test".into());
                Record::create(
                    format!("pos-{i}").into_bytes(),
                    metadata,
                    format!("key-{i}").into_bytes(),
                    format!("payload-{i}").into_bytes(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn writes_all_records_in_order() {
        let (dest, broker) = open(BrokerScript::new(), &config("")).await;
        let batch = records(3);

        assert_eq!(dest.write(&batch).await.unwrap(), 3);

        let sent = broker.frames_of(Command::Send);
        assert_eq!(sent.len(), 3);
        for (frame, record) in sent.iter().zip(&batch) {
            assert_eq!(frame.get("destination"), Some("out"));
            assert_eq!(frame.get("content-type"), Some("application/json"));
            assert_eq!(frame.body.as_ref(), record.to_json_bytes().unwrap().as_slice());
        }
    }

    #[tokio::test]
    async fn stops_at_first_failure_and_reports_count() {
        let (dest, broker) = open(BrokerScript::new().fail_send_at(1), &config("")).await;
        let batch = records(3);

        let err = dest.write(&batch).await.unwrap_err();
        assert_eq!(err.written, 1);
        assert!(matches!(err.source, WriteCause::Send(_)));
        assert_eq!(err.kind(), ErrorKind::Io);

        // Третья запись не отправлялась.
        assert_eq!(broker.frames_of(Command::Send).len(), 2);
        assert_eq!(broker.sent().len(), 1);

        // Повтор хвоста проходит.
        assert_eq!(dest.write(&batch[err.written..]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn payload_format_sends_raw_payload() {
        let config = config("content_type = \"text/plain\"\nformat = \"payload\"");
        let (dest, broker) = open(BrokerScript::new(), &config).await;

        dest.write(&records(1)).await.unwrap();
        let frame = &broker.frames_of(Command::Send)[0];
        assert_eq!(frame.get("content-type"), Some("text/plain"));
        assert_eq!(&frame.body[..], b"payload-0");
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let (dest, broker) = open(BrokerScript::new(), &config("")).await;
        assert_eq!(dest.write(&[]).await.unwrap(), 0);
        assert!(broker.frames_of(Command::Send).is_empty());
    }

    #[tokio::test]
    async fn trait_write_maps_partial_failure() {
        let (dest, broker) = open(BrokerScript::new().fail_send_at(1), &config("")).await;
        let dest: Box<dyn RecordDestination> = Box::new(dest);

        let failure = dest.write(&records(3)).await.unwrap_err();
        assert_eq!(failure.written, 1);
        assert!(failure.error.kind().is_retryable());

        dest.teardown().await.unwrap();
        dest.teardown().await.unwrap();
        assert_eq!(broker.frames_of(Command::Disconnect).len(), 1);
    }
}
