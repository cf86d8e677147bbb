use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::{PluginError, Record};

// ════════════════════════════════════════════════════════════════
//  Connector Traits
// ════════════════════════════════════════════════════════════════

/// Source: открытый источник записей (read path).
///
/// `read` и `ack` могут вызываться конкурентно из разных задач:
/// read loop pipeline'а и его commit/checkpoint path.
pub trait RecordSource: Send + Sync {
    /// Дождаться следующей записи.
    ///
    /// `Ok(None)`: `cancel` сработал раньше, чем пришло сообщение.
    fn read<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Record>, PluginError>> + Send + 'a>>;

    /// Подтвердить обработку записи по её position.
    fn ack<'a>(
        &'a self,
        position: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;

    /// Освободить подписку и соединение.
    ///
    /// Сначала отмените токен, переданный в `read`: teardown ждёт
    /// завершения текущего `read` и с заблокированным чтением не вернётся.
    fn teardown(&self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>>;
}

/// Частичный отказ записи: `written` первых записей уже опубликованы,
/// повторно отправлять нужно только хвост начиная с индекса `written`.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub written: usize,
    pub error: PluginError,
}

impl std::fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "write failed after {} record(s): {}", self.written, self.error)
    }
}

impl std::error::Error for WriteFailure {}

/// Destination: открытый приёмник записей (write path).
pub trait RecordDestination: Send + Sync {
    /// Опубликовать записи по порядку. Останавливается на первой ошибке.
    fn write<'a>(
        &'a self,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<usize, WriteFailure>> + Send + 'a>>;

    /// Закрыть соединение.
    fn teardown(&self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>>;
}
