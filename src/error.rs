//! Error definitions for the bridge

use thiserror::Error;

/// Errors raised while loading or validating the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the configuration file failed
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for [`crate::config::BridgeConfig`]
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The default configuration could not be serialized
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `[smarthome] ip` is empty
    #[error("Broker address is missing")]
    MissingBroker,

    /// `[smarthome] ip` could not be read as a host or URL
    #[error("Malformed broker address '{address}': {reason}")]
    MalformedBroker { address: String, reason: String },

    /// Secure transports need TLS, which the bridge does not provide
    #[error("Unsupported broker scheme: {0}")]
    UnsupportedScheme(String),
}

/// Errors of the host collaborator API (event bus, command execution)
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Command error: {0}")]
    Command(String),
}

/// Errors of the bridge lifecycle and transport
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge switched itself off during construction
    #[error("Bridge disabled: {0}")]
    Disabled(#[from] ConfigError),

    /// The initial broker connection failed
    #[error("Connection error: {0}")]
    Connect(String),

    /// The broker did not acknowledge the connection in time
    #[error("Connection timed out after {0}s")]
    ConnectTimeout(u64),

    /// The transport request channel refused a request
    #[error("Client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}
