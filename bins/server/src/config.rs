use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use stomp_connector::{DestinationConfig, SourceConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "stomp-bridge", about = "Пересылает сообщения из одной STOMP очереди в другую, подтверждая исходное после записи")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Перекладывать сообщения из source очереди в destination очередь
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "BRIDGE_CONFIG")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// Ёмкость канала позиций между read loop и ack задачей.
    #[serde(default = "default_ack_buffer")]
    pub ack_buffer: usize,
    /// Position (JSON), с которой продолжить чтение.
    #[serde(default)]
    pub resume_position: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ack_buffer: default_ack_buffer(),
            resume_position: None,
        }
    }
}

fn default_ack_buffer() -> usize {
    1024
}

impl BridgeConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|detail| ServerError::Config { context: "parse", detail: format!("'{path}': {detail}") })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        if config.pipeline.ack_buffer == 0 {
            return Err("pipeline.ack_buffer must be greater than 0".into());
        }
        Ok(config)
    }
}
