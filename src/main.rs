pub mod bridge;
pub mod catalog;
pub mod config;
pub mod error;
pub mod host;
pub mod mqtt;
#[cfg(test)]
mod testing;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host::local::{LocalBus, LocalTerminal};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(BridgeConfig::default_path);
    info!("Using config {}", path.display());
    let config = BridgeConfig::load_or_create(&path)
        .await
        .map_err(|e| eyre!("Failed to load config {}: {}", path.display(), e))?;

    let bus = Arc::new(LocalBus::default());
    let terminal = Arc::new(LocalTerminal::new(bus.clone()));

    let bridge = match Bridge::create(&config, terminal, bus) {
        Ok(bridge) => bridge,
        Err(BridgeError::Disabled(e)) => {
            warn!("MQTT bridge disabled: {}", e);
            return Ok(());
        }
        Err(e) => return Err(eyre!("Failed to configure bridge: {}", e)),
    };

    let running = bridge
        .start()
        .await
        .map_err(|e| eyre!("Failed to start bridge: {}", e))?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    running.shutdown().await;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

/// Filter from `RUST_LOG` directives; invalid directives fall back to `info`
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_target_directives_are_kept() {
        let filter = log_filter(Some("terminal_mqtt=debug,rumqttc=warn")).to_string();
        assert!(filter.contains("terminal_mqtt=debug"), "{}", filter);
        assert!(filter.contains("rumqttc=warn"), "{}", filter);
    }

    #[test]
    fn invalid_directives_fall_back_to_info() {
        assert_eq!(log_filter(Some("terminal_mqtt=loud")).to_string(), "info");
        assert_eq!(log_filter(None).to_string(), "info");
    }
}
