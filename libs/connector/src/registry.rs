use std::sync::Arc;

use dashmap::DashMap;
use stomp_client::Message;

/// Сообщения, прочитанные, но ещё не подтверждённые.
///
/// Шардированная map: `read` и `ack` работают из разных задач и не
/// сериализуются общим lock'ом. Записи живут до ack или teardown.
#[derive(Debug, Default)]
pub struct PendingMessages {
    entries: DashMap<String, Arc<Message>>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, message_id: impl Into<String>, message: Message) {
        self.entries.insert(message_id.into(), Arc::new(message));
    }

    /// Handle сообщения. Guard шарда отпускается до возврата.
    pub fn get(&self, message_id: &str) -> Option<Arc<Message>> {
        self.entries.get(message_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, message_id: &str) -> Option<Arc<Message>> {
        self.entries.remove(message_id).map(|(_, message)| message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Удалить все записи, вернуть их количество.
    pub fn evict_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}
