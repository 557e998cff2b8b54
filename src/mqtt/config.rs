use crate::config::{BridgeConfig, ConnectionSettings};
use crate::error::ConfigError;
use rumqttc::{LastWill, MqttOptions, QoS, Transport};
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_PORT: u16 = 1883;
const DEFAULT_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Websocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Websocket => f.write_str("websockets"),
        }
    }
}

/// Where and how to reach the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BrokerEndpoint {
    /// Reads `[smarthome] ip` as either `host[:port]` or a full URL
    ///
    /// Credentials embedded in the URL replace the configured ones when both user
    /// and password are present.
    pub fn parse(address: &str, username: &str, password: &str) -> Result<Self, ConfigError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConfigError::MissingBroker);
        }
        let malformed = |reason: String| ConfigError::MalformedBroker {
            address: address.to_string(),
            reason,
        };

        let mut endpoint = Self {
            transport: TransportKind::Tcp,
            host: address.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            username: non_empty(username),
            password: non_empty(username).and(non_empty(password)),
        };

        if !address.contains("://") {
            if let Some((host, port)) = address.rsplit_once(':') {
                endpoint.host = host.to_string();
                endpoint.port = port
                    .parse()
                    .map_err(|e| malformed(format!("invalid port '{}': {}", port, e)))?;
            }
            return Ok(endpoint);
        }

        let url = Url::parse(address).map_err(|e| malformed(e.to_string()))?;
        endpoint.transport = match url.scheme() {
            "tcp" | "mqtt" => TransportKind::Tcp,
            "ws" => TransportKind::Websocket,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        endpoint.host = url
            .host_str()
            .ok_or_else(|| malformed("missing host".to_string()))?
            .to_string();
        endpoint.port = url.port().unwrap_or(DEFAULT_PORT);
        if !url.path().is_empty() {
            endpoint.path = url.path().to_string();
        }
        if let (user, Some(pass)) = (url.username(), url.password()) {
            if !user.is_empty() {
                endpoint.username = Some(user.to_string());
                endpoint.password = Some(pass.to_string());
            }
        }
        Ok(endpoint)
    }

    /// Address handed to the transport; websockets need the full URL
    fn broker_addr(&self) -> String {
        match self.transport {
            TransportKind::Tcp => self.host.clone(),
            TransportKind::Websocket => format!("ws://{}:{}{}", self.host, self.port, self.path),
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} through {}", self.host, self.port, self.transport)?;
        if self.transport == TransportKind::Websocket && !self.path.is_empty() {
            write!(f, ", path: {}", self.path)?;
        }
        if let Some(user) = &self.username {
            write!(f, ", username: {}", user)?;
            if self.password.is_some() {
                write!(f, ", password present")?;
            }
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub endpoint: BrokerEndpoint,
    /// Client id; the terminal id, so the broker keeps the session across restarts
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect_min_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub request_capacity: usize,
}

impl MqttConfig {
    pub fn from_config(config: &BridgeConfig, client_id: &str) -> Result<Self, ConfigError> {
        let smarthome = &config.smarthome;
        let endpoint =
            BrokerEndpoint::parse(&smarthome.ip, &smarthome.username, &smarthome.password)?;
        Ok(Self::with_settings(endpoint, client_id, &config.mqtt))
    }

    pub fn with_settings(
        endpoint: BrokerEndpoint,
        client_id: &str,
        settings: &ConnectionSettings,
    ) -> Self {
        let min = settings.reconnect_min_delay_secs.max(1);
        Self {
            endpoint,
            client_id: client_id.to_string(),
            keep_alive: Duration::from_secs(settings.keep_alive_secs.max(5)),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs.max(1)),
            reconnect_min_delay: Duration::from_secs(min),
            reconnect_max_delay: Duration::from_secs(settings.reconnect_max_delay_secs.max(min)),
            request_capacity: settings.request_capacity.max(8),
        }
    }

    /// Transport options with the availability topic registered as last will
    pub fn mqtt_options(&self, will_topic: &str) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.endpoint.broker_addr(),
            self.endpoint.port,
        );
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(false)
            .set_last_will(LastWill::new(will_topic, "offline", QoS::AtLeastOnce, true));
        if let Some(user) = &self.endpoint.username {
            options.set_credentials(user.clone(), self.endpoint.password.clone().unwrap_or_default());
        }
        if self.endpoint.transport == TransportKind::Websocket {
            options.set_transport(Transport::Ws);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_host() {
        let endpoint = BrokerEndpoint::parse("192.168.1.10", "", "").unwrap();
        assert_eq!(endpoint.transport, TransportKind::Tcp);
        assert_eq!(endpoint.host, "192.168.1.10");
        assert_eq!(endpoint.port, DEFAULT_PORT);
        assert_eq!(endpoint.username, None);
    }

    #[test]
    fn host_with_port_and_configured_credentials() {
        let endpoint = BrokerEndpoint::parse("broker.lan:1884", "user", "secret").unwrap();
        assert_eq!(endpoint.host, "broker.lan");
        assert_eq!(endpoint.port, 1884);
        assert_eq!(endpoint.username.as_deref(), Some("user"));
        assert_eq!(endpoint.password.as_deref(), Some("secret"));
        assert_eq!(
            endpoint.to_string(),
            "broker.lan:1884 through tcp, username: user, password present"
        );
    }

    #[test]
    fn password_without_username_is_ignored() {
        let endpoint = BrokerEndpoint::parse("broker.lan", "", "secret").unwrap();
        assert_eq!(endpoint.password, None);
    }

    #[test]
    fn websocket_url_with_credentials() {
        let endpoint =
            BrokerEndpoint::parse("ws://bob:pw@broker.lan:9001/mqtt", "alice", "other").unwrap();
        assert_eq!(endpoint.transport, TransportKind::Websocket);
        assert_eq!(endpoint.host, "broker.lan");
        assert_eq!(endpoint.port, 9001);
        assert_eq!(endpoint.path, "/mqtt");
        assert_eq!(endpoint.username.as_deref(), Some("bob"));
        assert_eq!(endpoint.password.as_deref(), Some("pw"));
        assert_eq!(endpoint.broker_addr(), "ws://broker.lan:9001/mqtt");
    }

    #[test]
    fn mqtt_scheme_defaults() {
        let endpoint = BrokerEndpoint::parse("mqtt://broker.lan", "", "").unwrap();
        assert_eq!(endpoint.transport, TransportKind::Tcp);
        assert_eq!(endpoint.port, DEFAULT_PORT);
        assert_eq!(endpoint.broker_addr(), "broker.lan");
    }

    #[test]
    fn rejected_addresses() {
        assert!(matches!(
            BrokerEndpoint::parse("  ", "", ""),
            Err(ConfigError::MissingBroker)
        ));
        assert!(matches!(
            BrokerEndpoint::parse("wss://broker.lan", "", ""),
            Err(ConfigError::UnsupportedScheme(s)) if s == "wss"
        ));
        assert!(matches!(
            BrokerEndpoint::parse("broker.lan:port", "", ""),
            Err(ConfigError::MalformedBroker { .. })
        ));
    }

    #[test]
    fn reconnect_bounds_are_ordered() {
        let settings = ConnectionSettings {
            reconnect_min_delay_secs: 30,
            reconnect_max_delay_secs: 5,
            ..ConnectionSettings::default()
        };
        let endpoint = BrokerEndpoint::parse("broker.lan", "", "").unwrap();
        let config = MqttConfig::with_settings(endpoint, "t1", &settings);
        assert_eq!(config.reconnect_min_delay, Duration::from_secs(30));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
    }
}
