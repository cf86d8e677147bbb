use std::fmt;

/// Категория ошибки connector'а: по ней host решает, падать сразу,
/// повторять операцию или переоткрывать соединение.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration: permanent, fail at open.
    Config,
    /// I/O or broker communication error: transient, may retry/reopen.
    Io,
    /// Data format/parse error: bad input (e.g. corrupt position).
    Format,
    /// Logical error (not found, invalid state, generic).
    Logic,
}

impl ErrorKind {
    /// Имеет ли смысл повторить операцию с теми же аргументами.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Ошибка на границе connector ↔ pipeline: категория и сообщение.
///
/// Connector'ы классифицируют свои типизированные ошибки и сворачивают их
/// в `PluginError` (см. `into_plugin_error` в stomp-connector).
#[derive(Clone)]
pub struct PluginError {
    kind: ErrorKind,
    message: String,
}

impl PluginError {
    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PluginError {}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        Self::with_kind(ErrorKind::Format, e.to_string())
    }
}
