//! stomp-bridge: читает сообщения из одной STOMP очереди и публикует их
//! в другую, подтверждая исходное только после успешной записи.

mod cmd;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{Cli, Commands};

/// Фильтр по умолчанию, если `RUST_LOG` не задан: наши crate'ы на info,
/// остальное (rustls, tokio) только warn.
const DEFAULT_LOG_FILTER: &str = "warn,stomp_bridge=info,stomp_connector=info,stomp_client=info";

fn log_filter(env: Option<&str>) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt().with_env_filter(log_filter(env.as_deref())).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => cmd::serve::run(args).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "stomp-bridge stopped");
        eprintln!("stomp-bridge: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_info_to_bridge_crates() {
        assert_eq!(log_filter(None).to_string(), EnvFilter::new(DEFAULT_LOG_FILTER).to_string());
        assert_eq!(log_filter(Some("debug")).to_string(), "debug");
    }
}
