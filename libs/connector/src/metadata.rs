use bridge_api::Metadata;
use stomp_client::Headers;

/// Namespace заголовков брокера в метаданных записи.
pub const HEADER_PREFIX: &str = "stomp.header.";

/// Время чтения сообщения (unix nanoseconds).
pub const READ_AT: &str = "stomp.readAt";

/// Проекция заголовков сообщения в метаданные.
///
/// Порядок заголовков сохраняется. Повторяющийся ключ не перезаписывается:
/// значения склеиваются через `", "` в порядке получения.
pub fn project(headers: &Headers) -> Metadata {
    let mut metadata = Metadata::with_capacity(headers.len() + 1);
    for (key, value) in headers.iter() {
        metadata
            .entry(format!("{HEADER_PREFIX}{key}"))
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    metadata
}
