//! Bridge configuration file
//!
//! One TOML file with the sections `[smarthome]`, `[mqtt]`, `[device]` and
//! `[entities]`. A missing file is written with defaults; the defaults leave the
//! broker address empty, which keeps the bridge disabled until it is set.

use crate::catalog::topics::DEFAULT_DISCOVERY_PREFIX;
use crate::catalog::CatalogOptions;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_DIR: &str = "terminal-mqtt";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub smarthome: SmarthomeConfig,
    pub mqtt: ConnectionSettings,
    pub device: DeviceConfig,
    pub entities: CatalogOptions,
}

/// Broker address and terminal identity
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SmarthomeConfig {
    /// Broker host or URL, e.g. `192.168.1.10` or `ws://user:pw@broker:9001/mqtt`
    pub ip: String,
    /// Explicit terminal id; derived from the host when empty
    pub terminal: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConnectionSettings {
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_min_delay_secs: u64,
    pub reconnect_max_delay_secs: u64,
    /// Capacity of the outgoing request channel
    pub request_capacity: usize,
    pub discovery_prefix: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            reconnect_min_delay_secs: 1,
            reconnect_max_delay_secs: 600,
            request_capacity: 64,
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
        }
    }
}

/// Static parts of the discovery device block
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub manufacturer: String,
    pub model: String,
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            manufacturer: "Aculeasis".to_string(),
            model: "Smart Speaker".to_string(),
            name: "mdmTerminal2".to_string(),
        }
    }
}

impl BridgeConfig {
    /// `<config dir>/terminal-mqtt/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Loads the file, writing the defaults first when it does not exist
    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !tokio::fs::try_exists(path).await? {
            info!("No config at {}, writing defaults", path.display());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = toml::to_string_pretty(&Self::default())?;
            tokio::fs::write(path, content).await?;
        }
        Self::load(path).await
    }
}
