//! Entity descriptors and the fixed declaration table
//!
//! # Compatibility
//!
//! Unique ids are `<device id><n>` where `n` counts declarations from 1 in the
//! order of [`DECLARATIONS`]. A hub treats a changed unique id as a different
//! entity, so entries may only ever be appended to the table, never reordered
//! or removed.

use super::identity::DeviceIdentity;
use crate::host::Command;
use serde_json::Value;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Discovery component of an entity, in unique id assignment order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    BinarySensor,
    Sensor,
    Number,
    Switch,
}

impl EntityKind {
    pub const ORDER: [EntityKind; 4] = [
        EntityKind::BinarySensor,
        EntityKind::Sensor,
        EntityKind::Number,
        EntityKind::Switch,
    ];

    pub fn component(&self) -> &'static str {
        match self {
            Self::BinarySensor => "binary_sensor",
            Self::Sensor => "sensor",
            Self::Number => "number",
            Self::Switch => "switch",
        }
    }
}

/// Terminal values that can be set from the broker and are reported back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Controllable {
    Volume,
    MusicVolume,
    Listener,
}

impl Controllable {
    /// Name of the terminal event that reports this value
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::MusicVolume => "music_volume",
            Self::Listener => "listener",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "volume" => Some(Self::Volume),
            "music_volume" => Some(Self::MusicVolume),
            "listener" => Some(Self::Listener),
            _ => None,
        }
    }

    /// Terminal command that sets this value. `music_volume` maps to `mvolume`.
    pub fn command(&self) -> Command {
        match self {
            Self::Volume => Command::Volume,
            Self::MusicVolume => Command::MusicVolume,
            Self::Listener => Command::Listener,
        }
    }
}

/// Shared channel a read-only entity reads its state from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    State,
    Conversation,
}

#[derive(Debug, Clone, Copy)]
pub enum Shape {
    Binary {
        channel: Channel,
        payload_on: &'static str,
        payload_off: &'static str,
        device_class: Option<&'static str>,
        value_template: &'static str,
    },
    Text {
        channel: Channel,
        force_update: bool,
    },
    Level {
        control: Controllable,
        min: i64,
        max: i64,
    },
    Toggle {
        control: Controllable,
        payload_on: &'static str,
        payload_off: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Declaration {
    pub kind: EntityKind,
    pub name: &'static str,
    pub icon: Option<&'static str>,
    pub shape: Shape,
}

const STATE_TEMPLATE: &str = "{{ value_json.state }}";

pub const DECLARATIONS: &[Declaration] = &[
    Declaration {
        kind: EntityKind::BinarySensor,
        name: "record",
        icon: Some("hass:microphone"),
        shape: Shape::Binary {
            channel: Channel::State,
            payload_on: "start_record",
            payload_off: "stop_record",
            device_class: None,
            value_template: STATE_TEMPLATE,
        },
    },
    Declaration {
        kind: EntityKind::BinarySensor,
        name: "talking",
        icon: None,
        shape: Shape::Binary {
            channel: Channel::State,
            payload_on: "start_talking",
            payload_off: "stop_talking",
            device_class: Some("sound"),
            value_template: STATE_TEMPLATE,
        },
    },
    Declaration {
        kind: EntityKind::Sensor,
        name: "say",
        icon: Some("hass:face-recognition"),
        shape: Shape::Text {
            channel: Channel::Conversation,
            force_update: true,
        },
    },
    Declaration {
        kind: EntityKind::Number,
        name: "Volume",
        icon: Some("hass:volume-vibrate"),
        shape: Shape::Level {
            control: Controllable::Volume,
            min: 0,
            max: 100,
        },
    },
    Declaration {
        kind: EntityKind::Number,
        name: "Music Volume",
        icon: Some("hass:volume-vibrate"),
        shape: Shape::Level {
            control: Controllable::MusicVolume,
            min: 0,
            max: 100,
        },
    },
    Declaration {
        kind: EntityKind::Switch,
        name: "Mic enabled",
        icon: Some("hass:microphone-settings"),
        shape: Shape::Toggle {
            control: Controllable::Listener,
            payload_on: "on",
            payload_off: "off",
        },
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityVariant {
    BinarySensor {
        payload_on: &'static str,
        payload_off: &'static str,
        device_class: Option<&'static str>,
        value_template: &'static str,
    },
    Sensor {
        force_update: bool,
    },
    Number {
        command_topic: String,
        control: Controllable,
        min: i64,
        max: i64,
    },
    Switch {
        command_topic: String,
        control: Controllable,
        payload_on: &'static str,
        payload_off: &'static str,
    },
}

/// One exposed entity with its resolved topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub unique_id: String,
    pub name: &'static str,
    pub icon: Option<&'static str>,
    pub state_topic: String,
    pub device: Arc<DeviceIdentity>,
    pub availability_topic: Arc<str>,
    pub variant: EntityVariant,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self.variant {
            EntityVariant::BinarySensor { .. } => EntityKind::BinarySensor,
            EntityVariant::Sensor { .. } => EntityKind::Sensor,
            EntityVariant::Number { .. } => EntityKind::Number,
            EntityVariant::Switch { .. } => EntityKind::Switch,
        }
    }

    pub fn command_topic(&self) -> Option<&str> {
        match &self.variant {
            EntityVariant::Number { command_topic, .. }
            | EntityVariant::Switch { command_topic, .. } => Some(command_topic),
            _ => None,
        }
    }

    pub fn control(&self) -> Option<Controllable> {
        match self.variant {
            EntityVariant::Number { control, .. } | EntityVariant::Switch { control, .. } => {
                Some(control)
            }
            _ => None,
        }
    }
}

/// Where a controllable value is published, and which values it accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub state_topic: String,
    pub range: Option<RangeInclusive<i64>>,
}

impl Outbound {
    /// Numbers must lie in the entity's range; other scalars always pass
    pub fn accepts(&self, value: &Value) -> bool {
        match (&self.range, value) {
            (Some(range), Value::Number(n)) => n
                .as_f64()
                .is_some_and(|v| v >= *range.start() as f64 && v <= *range.end() as f64),
            _ => true,
        }
    }
}
