//! Terminal events to broker messages
//!
//! Value events of controllable entities go to the entity's STAT topic as a raw
//! scalar. Every other subscribed event goes to the shared state topic as
//! `{"state": name, "args": [...], "kwargs": {...}}`. The conversational output
//! event has its own handler and publishes the spoken text verbatim.

use super::link::Link;
use super::mqtt_handler::ConnectionState;
use crate::catalog::topics::Topics;
use crate::catalog::ControllableIndex;
use crate::host::EventHandler;
use rumqttc::QoS;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Terminal lifecycle events mirrored to the state topic
pub const STATE_EVENTS: &[&str] = &[
    "start_record",
    "stop_record",
    "start_talking",
    "stop_talking",
    "speech_recognized_success",
    "voice_activated",
    "music_status",
];

/// Event carrying the terminal's conversational output
pub const CONVERSATION_EVENT: &str = "cmd";
const QUERY_KWARG: &str = "qry";

#[derive(Serialize)]
struct StatePayload<'a> {
    state: &'a str,
    args: &'a [Value],
    kwargs: &'a Map<String, Value>,
}

pub struct EventRouter {
    link: Arc<dyn Link>,
    topics: Topics,
    index: ControllableIndex,
    connection: watch::Receiver<ConnectionState>,
}

impl EventRouter {
    pub fn new(
        link: Arc<dyn Link>,
        topics: Topics,
        index: ControllableIndex,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            link,
            topics,
            index,
            connection,
        }
    }

    /// Handler table registered on the terminal's event bus
    pub fn handler_table(self: &Arc<Self>) -> Vec<(Vec<&'static str>, Arc<dyn EventHandler>)> {
        let mut state_events: Vec<&'static str> = STATE_EVENTS.to_vec();
        state_events.extend(self.index.controls().map(|control| control.event_name()));
        vec![
            (state_events, Arc::new(StateHandler(self.clone())) as Arc<dyn EventHandler>),
            (
                vec![CONVERSATION_EVENT],
                Arc::new(ConversationHandler(self.clone())) as Arc<dyn EventHandler>,
            ),
        ]
    }

    pub fn on_event(&self, name: &str, args: &[Value], kwargs: &Map<String, Value>) {
        debug!("Send state: {} {:?} {:?}", name, args, kwargs);
        if let Some(outbound) = self.index.outbound(name) {
            if *self.connection.borrow() != ConnectionState::Connected {
                debug!("Dropping '{}' value while disconnected", name);
                return;
            }
            let Some(value) = args.first() else {
                debug!("Dropping '{}' event without a value", name);
                return;
            };
            if !outbound.accepts(value) {
                debug!("Dropping out-of-range '{}' value {}", name, value);
                return;
            }
            self.publish(&outbound.state_topic, scalar_payload(value));
            return;
        }

        let payload = StatePayload {
            state: name,
            args,
            kwargs,
        };
        match serde_json::to_vec(&payload) {
            Ok(body) => self.publish(&self.topics.state, body),
            Err(e) => warn!("Failed to encode state '{}': {}", name, e),
        }
    }

    pub fn on_conversation(&self, kwargs: &Map<String, Value>) {
        debug!("Send text: {:?}", kwargs);
        let text = match kwargs.get(QUERY_KWARG) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => return,
            Some(other) => other.to_string(),
        };
        if !text.is_empty() {
            self.publish(&self.topics.conversation, text.into_bytes());
        }
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) {
        if let Err(e) = self.link.publish(topic, QoS::AtMostOnce, false, payload) {
            warn!("Failed to publish to {}: {}", topic, e);
        }
    }
}

/// Raw payload of a controllable value: strings unquoted, other scalars as JSON text
fn scalar_payload(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.clone().into_bytes(),
        Value::Null => Vec::new(),
        other => other.to_string().into_bytes(),
    }
}

struct StateHandler(Arc<EventRouter>);

impl EventHandler for StateHandler {
    fn on_event(&self, name: &str, args: &[Value], kwargs: &Map<String, Value>) {
        self.0.on_event(name, args, kwargs);
    }
}

struct ConversationHandler(Arc<EventRouter>);

impl EventHandler for ConversationHandler {
    fn on_event(&self, _name: &str, _args: &[Value], kwargs: &Map<String, Value>) {
        self.0.on_conversation(kwargs);
    }
}
