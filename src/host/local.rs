//! Standalone terminal used when the bridge runs on its own
//!
//! Keeps volume and listener state in memory, logs speech output and emits the
//! matching bus events after every command, the way a real terminal reports its
//! state changes.

use super::{Command, EventBus, EventHandler, SubscriptionId, Terminal, VolumeStatus};
use crate::error::HostError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// In-process event bus
#[derive(Default)]
pub struct LocalBus {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<SubscriptionId, (Vec<String>, Arc<dyn EventHandler>)>>,
}

impl LocalBus {
    /// Delivers an event to every handler subscribed to `name`
    pub fn emit(&self, name: &str, args: &[Value], kwargs: &Map<String, Value>) {
        // Collect first so handlers run without the registry lock held
        let targets: Vec<Arc<dyn EventHandler>> = match self.handlers.lock() {
            Ok(handlers) => handlers
                .values()
                .filter(|(names, _)| names.iter().any(|n| n == name))
                .map(|(_, handler)| handler.clone())
                .collect(),
            Err(e) => {
                warn!("Event registry poisoned: {}", e);
                return;
            }
        };
        debug!("Emitting '{}' to {} handlers", name, targets.len());
        for handler in targets {
            handler.on_event(name, args, kwargs);
        }
    }
}

impl EventBus for LocalBus {
    fn subscribe(
        &self,
        names: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, HostError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let names = names.iter().map(|n| n.to_string()).collect();
        self.handlers
            .lock()
            .map_err(|e| HostError::Subscription(e.to_string()))?
            .insert(id, (names, handler));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), HostError> {
        self.handlers
            .lock()
            .map_err(|e| HostError::Subscription(e.to_string()))?
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| HostError::Subscription(format!("unknown subscription {:?}", id)))
    }
}

pub struct LocalTerminal {
    bus: Arc<LocalBus>,
    volume: AtomicI64,
    music_volume: AtomicI64,
    listening: AtomicBool,
}

impl LocalTerminal {
    pub fn new(bus: Arc<LocalBus>) -> Self {
        Self {
            bus,
            volume: AtomicI64::new(50),
            music_volume: AtomicI64::new(50),
            listening: AtomicBool::new(true),
        }
    }

    fn set_level(&self, target: &AtomicI64, event: &str, value: &Value) -> Result<(), HostError> {
        let level = parse_level(value)
            .ok_or_else(|| HostError::Command(format!("invalid level for {}: {}", event, value)))?;
        target.store(level, Ordering::Relaxed);
        self.bus.emit(event, &[Value::from(level)], &Map::new());
        Ok(())
    }
}

/// Accepts integers and numeric text, the two shapes levels arrive in
fn parse_level(value: &Value) -> Option<i64> {
    let level = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?.round() as i64,
        _ => return None,
    };
    (0..=100).contains(&level).then_some(level)
}

impl Terminal for LocalTerminal {
    fn terminal_call(&self, command: Command, value: Value) -> Result<(), HostError> {
        info!("Terminal command {}: {}", command, value);
        match command {
            Command::Volume => self.set_level(&self.volume, "volume", &value),
            Command::MusicVolume => self.set_level(&self.music_volume, "music_volume", &value),
            Command::Listener => {
                let on = match &value {
                    Value::String(s) => s.eq_ignore_ascii_case("on"),
                    Value::Bool(b) => *b,
                    _ => return Err(HostError::Command(format!("invalid listener value {}", value))),
                };
                self.listening.store(on, Ordering::Relaxed);
                let state = if on { "on" } else { "off" };
                self.bus.emit("listener", &[Value::from(state)], &Map::new());
                Ok(())
            }
            Command::Tts | Command::Voice | Command::Ask => {
                let text = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
                self.say(&text);
                Ok(())
            }
        }
    }

    /// Logged only; `cmd` is reserved for recognized user speech
    fn say(&self, text: &str) {
        info!("Say: {}", text);
    }

    fn volume_status(&self) -> VolumeStatus {
        VolumeStatus {
            volume: self.volume.load(Ordering::Relaxed),
            music_volume: self.music_volume.load(Ordering::Relaxed),
        }
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    fn override_settings(&self, section: &str, key: &str, value: Value) {
        info!("Settings override [{}] {} = {}", section, key, value);
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}
