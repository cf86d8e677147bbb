use std::sync::Arc;

use bridge_api::{RecordDestination, RecordSource};
use stomp_connector::{Destination, Source};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeConfig, ServeArgs};
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("stomp-bridge starting");

    // --- Load config ---
    let config = BridgeConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- Open endpoints ---
    let destination = Destination::open(&config.destination).await?;
    tracing::info!(queue = destination.queue(), "destination ready");

    let resume = config.pipeline.resume_position.as_deref().map(str::as_bytes);
    let source = match Source::open(&config.source, resume).await {
        Ok(source) => Arc::new(source),
        Err(e) => {
            if let Err(e) = destination.teardown().await {
                tracing::warn!(error = %e, "destination teardown error");
            }
            return Err(e.into());
        }
    };
    tracing::info!(queue = source.queue(), "source ready");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let signal = tokio::spawn({
        let token = token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("shutting down..."),
                Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c, shutting down"),
            }
            token.cancel();
        }
    });

    tracing::info!("bridge ready");
    let result = bridge(source.clone(), &destination, config.pipeline.ack_buffer, &token).await;
    signal.abort();

    // --- Teardown ---
    tracing::info!(pending = source.pending_len(), "tearing down");
    if let Err(e) = source.teardown().await {
        tracing::error!(error = %e, "source teardown error");
    }
    if let Err(e) = destination.teardown().await {
        tracing::error!(error = %e, "destination teardown error");
    }

    let forwarded = result?;
    tracing::info!(forwarded, "shutdown complete");
    Ok(())
}

/// Перекладывает записи из `source` в `destination`, пока не сработает
/// `token` или не случится ошибка. Возвращает число переложенных записей.
///
/// Подтверждения идут отдельной задачей, конкурентно с чтением; перед
/// возвратом канал позиций дренируется.
async fn bridge(
    source: Arc<dyn RecordSource>,
    destination: &dyn RecordDestination,
    ack_buffer: usize,
    token: &CancellationToken,
) -> Result<u64, ServerError> {
    let (ack_tx, ack_rx) = mpsc::channel(ack_buffer);
    let acker = tokio::spawn(ack_loop(source.clone(), ack_rx));

    let pumped = pump(source.as_ref(), destination, &ack_tx, token).await;

    drop(ack_tx);
    match acker.await {
        Ok(acked) => tracing::info!(acked, "ack task finished"),
        Err(e) => tracing::error!(error = %e, "ack task panicked"),
    }
    pumped
}

async fn pump(
    source: &dyn RecordSource,
    destination: &dyn RecordDestination,
    acks: &mpsc::Sender<Vec<u8>>,
    token: &CancellationToken,
) -> Result<u64, ServerError> {
    let mut forwarded = 0u64;
    loop {
        let Some(record) = source.read(token).await.map_err(ServerError::Read)? else {
            return Ok(forwarded);
        };

        // Без ack брокер передоставит запись после переподключения.
        destination.write(std::slice::from_ref(&record)).await?;

        if acks.send(record.position).await.is_err() {
            tracing::warn!("ack task gone, stopping");
            return Ok(forwarded);
        }
        forwarded += 1;
        tracing::trace!(forwarded, "forwarded record");
    }
}

async fn ack_loop(source: Arc<dyn RecordSource>, mut positions: mpsc::Receiver<Vec<u8>>) -> u64 {
    let mut acked = 0u64;
    while let Some(position) = positions.recv().await {
        match source.ack(&position).await {
            Ok(()) => acked += 1,
            Err(e) => tracing::warn!(error = %e, "ack failed"),
        }
    }
    acked
}
