use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::PluginError;

// ════════════════════════════════════════════════════════════════
//  Metadata
// ════════════════════════════════════════════════════════════════

/// Метаданные записи: string → string, порядок вставки сохраняется.
pub type Metadata = IndexMap<String, String>;

// ════════════════════════════════════════════════════════════════
//  Operation
// ════════════════════════════════════════════════════════════════

/// Тип изменения, которое несёт запись.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
    Snapshot,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Snapshot => write!(f, "snapshot"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// Запись на границе с pipeline.
///
/// `position`: непрозрачный resume token; pipeline сохраняет его как есть
/// и возвращает источнику в `ack` или при повторном открытии.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub position: Vec<u8>,
    pub operation: Operation,
    pub metadata: Metadata,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Record {
    /// Запись-создание (то, что порождает source при чтении из очереди).
    pub fn create(position: Vec<u8>, metadata: Metadata, key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            position,
            operation: Operation::Create,
            metadata,
            key,
            payload,
        }
    }

    /// JSON-представление записи целиком (бинарные поля в base64).
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PluginError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let b64 = &base64::engine::general_purpose::STANDARD;
        let mut s = serializer.serialize_struct("Record", 5)?;
        s.serialize_field("position", &b64.encode(&self.position))?;
        s.serialize_field("operation", &self.operation)?;
        s.serialize_field("metadata", &self.metadata)?;
        s.serialize_field("key", &b64.encode(&self.key))?;
        s.serialize_field("payload", &b64.encode(&self.payload))?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            position: String,
            #[serde(default)]
            operation: Operation,
            #[serde(default)]
            metadata: Metadata,
            #[serde(default)]
            key: String,
            #[serde(default)]
            payload: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        let b64 = &base64::engine::general_purpose::STANDARD;
        let decode = |field: &str, value: &str| {
            b64.decode(value)
                .map_err(|e| serde::de::Error::custom(format!("{field}: invalid base64: {e}")))
        };
        Ok(Record {
            position: decode("position", &raw.position)?,
            operation: raw.operation,
            metadata: raw.metadata,
            key: decode("key", &raw.key)?,
            payload: decode("payload", &raw.payload)?,
        })
    }
}
