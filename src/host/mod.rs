//! # Host Collaborator Interface
//!
//! The bridge runs inside a voice-assistant terminal and talks to it through two seams:
//!
//! - [`Terminal`] - command execution, speech output and current controllable values
//! - [`EventBus`] - subscription to the terminal's internal events
//!
//! Handlers are registered as one scoped [`Subscriptions`] value. Releasing it (or
//! dropping it) deregisters every handler it holds, so teardown cannot leave a
//! handler attached to the bus.
//!
//! [`local`] provides a standalone implementation of both seams for running the
//! bridge without an embedding assistant.

pub mod local;

/// User-visible notices spoken through [`Terminal::say`]
pub mod notice {
    pub const NO_BROKER: &str = "MQTT broker address is missing from the settings";
    pub const CONNECT_FAILED: &str = "MQTT broker connection error";
    pub const NOT_JSON: &str = "Message is not in JSON format";
    pub const UNKNOWN_COMMAND: &str = "Unknown command received";
}

use crate::error::HostError;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Commands the terminal accepts from the broker
///
/// The wire names are the terminal's command keys. `MusicVolume` is spelled
/// `mvolume`; the older `nvolume` spelling is still accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Voice,
    Tts,
    Ask,
    Volume,
    MusicVolume,
    Listener,
}

impl Command {
    pub const LEGACY_MUSIC_VOLUME: &'static str = "nvolume";

    /// Looks up a command by its wire name. Returns `None` for keys outside the whitelist.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "voice" => Some(Self::Voice),
            "tts" => Some(Self::Tts),
            "ask" => Some(Self::Ask),
            "volume" => Some(Self::Volume),
            "mvolume" | Self::LEGACY_MUSIC_VOLUME => Some(Self::MusicVolume),
            "listener" => Some(Self::Listener),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Tts => "tts",
            Self::Ask => "ask",
            Self::Volume => "volume",
            Self::MusicVolume => "mvolume",
            Self::Listener => "listener",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current volume levels reported by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeStatus {
    pub volume: i64,
    pub music_volume: i64,
}

/// Command and status API of the terminal
///
/// Every method may be slow (speech synthesis, audio device access); the bridge
/// only calls them from its worker, never from the network loop.
pub trait Terminal: Send + Sync {
    /// Executes a validated command
    fn terminal_call(&self, command: Command, value: Value) -> Result<(), HostError>;

    /// Speaks a user-visible notice
    fn say(&self, text: &str);

    fn volume_status(&self) -> VolumeStatus;

    /// Whether the microphone listener is enabled
    fn is_listening(&self) -> bool;

    /// Overrides a terminal setting for the lifetime of the process
    fn override_settings(&self, section: &str, key: &str, value: Value);

    /// Terminal software version, reported in the discovery device block
    fn version(&self) -> String;
}

/// Receives events from the terminal's event bus
pub trait EventHandler: Send + Sync {
    fn on_event(&self, name: &str, args: &[Value], kwargs: &Map<String, Value>);
}

/// Opaque handle of one bus registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// The terminal's internal event bus
pub trait EventBus: Send + Sync {
    fn subscribe(
        &self,
        names: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, HostError>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), HostError>;
}

/// A set of bus registrations released together
pub struct Subscriptions {
    bus: Arc<dyn EventBus>,
    ids: Vec<SubscriptionId>,
}

impl Subscriptions {
    /// Registers every `(event names, handler)` entry of a handler table
    ///
    /// On failure the entries registered so far are released before the error is returned.
    pub fn register(
        bus: Arc<dyn EventBus>,
        table: Vec<(Vec<&'static str>, Arc<dyn EventHandler>)>,
    ) -> Result<Self, HostError> {
        let mut subscriptions = Self {
            bus,
            ids: Vec::with_capacity(table.len()),
        };
        for (names, handler) in table {
            debug!("Subscribing to host events: {:?}", names);
            let id = subscriptions.bus.subscribe(&names, handler)?;
            subscriptions.ids.push(id);
        }
        Ok(subscriptions)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Deregisters every handler, continuing past failures
    ///
    /// Returns the errors that occurred, in registration order.
    pub fn release(mut self) -> Vec<HostError> {
        self.release_all()
    }

    fn release_all(&mut self) -> Vec<HostError> {
        let mut errors = Vec::new();
        for id in self.ids.drain(..) {
            if let Err(e) = self.bus.unsubscribe(id) {
                warn!("Failed to unsubscribe {:?}: {}", id, e);
                errors.push(e);
            }
        }
        errors
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        if !self.ids.is_empty() {
            let _ = self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBus, NullHandler};

    #[test]
    fn command_whitelist() {
        for key in ["voice", "tts", "ask", "volume", "mvolume", "listener"] {
            let command = Command::from_key(key).unwrap();
            assert_eq!(command.as_str(), key);
        }
        assert_eq!(Command::from_key("nvolume"), Some(Command::MusicVolume));
        assert_eq!(Command::from_key("music_volume"), None);
        assert_eq!(Command::from_key("bogus"), None);
    }

    #[test]
    fn release_continues_after_failure() {
        let bus = Arc::new(FakeBus::default());
        let handler: Arc<dyn EventHandler> = Arc::new(NullHandler);
        let subs = Subscriptions::register(
            bus.clone(),
            vec![
                (vec!["a"], handler.clone()),
                (vec!["b"], handler.clone()),
                (vec!["c"], handler),
            ],
        )
        .unwrap();
        assert_eq!(subs.len(), 3);

        bus.fail_unsubscribe_of(SubscriptionId(1));
        let errors = subs.release();
        assert_eq!(errors.len(), 1);
        assert_eq!(bus.active(), 1);
        assert_eq!(bus.unsubscribe_attempts(), 3);
    }

    #[test]
    fn drop_releases_registrations() {
        let bus = Arc::new(FakeBus::default());
        {
            let handler: Arc<dyn EventHandler> = Arc::new(NullHandler);
            let _subs = Subscriptions::register(bus.clone(), vec![(vec!["a"], handler)]).unwrap();
            assert_eq!(bus.active(), 1);
        }
        assert_eq!(bus.active(), 0);
    }
}
