use serde::{Deserialize, Serialize};

use crate::error::PositionError;

/// Resume token источника: сообщение и очередь, из которой оно прочитано.
///
/// Сериализуется в JSON `{"message_id": ..., "queue": ...}`. Разбор строгий:
/// неизвестные или отсутствующие поля и данные после объекта отвергаются.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Position {
    pub message_id: String,
    pub queue: String,
}

impl Position {
    pub fn new(message_id: impl Into<String>, queue: impl Into<String>) -> Self {
        Self { message_id: message_id.into(), queue: queue.into() }
    }

    /// JSON-байты position.
    ///
    /// # Panics
    /// Сериализация двух строк в JSON не может завершиться ошибкой;
    /// если это всё же произошло, состояние процесса некорректно.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("position must serialize to JSON")
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, PositionError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
