//! Inbound message classification and command dispatch
//!
//! Classification is cheap and runs on the network loop; execution calls the
//! terminal and runs on the worker.
//!
//! ```text
//! CTL/<uid> topic  ──► {command: payload text}       ─┐
//! hub status topic ──► HubStatus (session lifecycle)  │
//! anything else    ──► lenient JSON object           ─┴─► whitelist ──► terminal_call
//! ```

use crate::catalog::entity::Controllable;
use crate::catalog::ControllableIndex;
use crate::host::{notice, Command, Terminal};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// An inbound message after classification
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Raw value for a controllable entity
    Controllable { control: Controllable, text: String },
    /// Birth/will announcement of the hub
    HubStatus(String),
    /// Anything else; expected to hold a JSON command object
    Json(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
enum PayloadError {
    #[error("payload is not UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("payload is not JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

pub struct CommandDispatcher {
    terminal: Arc<dyn Terminal>,
    index: ControllableIndex,
    hub_status_topic: String,
}

impl CommandDispatcher {
    pub fn new(terminal: Arc<dyn Terminal>, index: ControllableIndex, hub_status_topic: String) -> Self {
        Self {
            terminal,
            index,
            hub_status_topic,
        }
    }

    pub fn classify(&self, topic: &str, payload: &[u8]) -> Inbound {
        if let Some(control) = self.index.command_for(topic) {
            return Inbound::Controllable {
                control,
                text: String::from_utf8_lossy(payload).into_owned(),
            };
        }
        if topic == self.hub_status_topic {
            return Inbound::HubStatus(String::from_utf8_lossy(payload).into_owned());
        }
        Inbound::Json(payload.to_vec())
    }

    /// Classifies and executes in one step
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        self.execute(self.classify(topic, payload));
    }

    pub fn execute(&self, inbound: Inbound) {
        match inbound {
            Inbound::Controllable { control, text } => {
                self.call(control.command(), Value::String(text));
            }
            Inbound::HubStatus(status) => {
                debug!("Hub status '{}' is handled by the session", status);
            }
            Inbound::Json(payload) => match parse_command_object(&payload) {
                Ok(object) => self.dispatch(object),
                Err(e) => {
                    error!("Message error: {}", e);
                    error!("Message: {}", String::from_utf8_lossy(&payload));
                    self.terminal.say(notice::NOT_JSON);
                }
            },
        }
    }

    /// Runs every whitelisted key of a command object; unknown keys are reported one by one
    pub fn dispatch(&self, object: Map<String, Value>) {
        for (key, value) in object {
            info!("New command {}, data: {}", key, value);
            match Command::from_key(&key) {
                Some(command) => {
                    if key == Command::LEGACY_MUSIC_VOLUME {
                        warn!("Command '{}' is deprecated, use '{}'", key, command);
                    }
                    self.call(command, value);
                }
                None => self.terminal.say(notice::UNKNOWN_COMMAND),
            }
        }
    }

    fn call(&self, command: Command, value: Value) {
        if let Err(e) = self.terminal.terminal_call(command, value) {
            warn!("Command {} failed: {}", command, e);
        }
    }
}

fn parse_command_object(payload: &[u8]) -> Result<Map<String, Value>, PayloadError> {
    let text = std::str::from_utf8(payload)?;
    match serde_json::from_str(&escape_control_chars(text))? {
        Value::Object(object) => Ok(object),
        Value::Array(_) => Err(PayloadError::NotAnObject("array")),
        Value::String(_) => Err(PayloadError::NotAnObject("string")),
        Value::Number(_) => Err(PayloadError::NotAnObject("number")),
        Value::Bool(_) => Err(PayloadError::NotAnObject("boolean")),
        Value::Null => Err(PayloadError::NotAnObject("null")),
    }
}

/// Escapes raw control characters inside string literals so a strict parser accepts them
fn escape_control_chars(text: &str) -> Cow<'_, str> {
    if !text.chars().any(char::is_control) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            } else if (c as u32) < 0x20 {
                out.push_str(&format!("\\u{:04x}", c as u32));
                continue;
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    Cow::Owned(out)
}
