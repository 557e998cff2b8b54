//! # Entity Catalog
//!
//! Builds the static description of everything the terminal exposes to the hub:
//!
//! ```text
//! catalog/
//! ├── identity.rs  - device id and identity block
//! ├── topics.rs    - topic namespace under terminals/<id>
//! └── entity.rs    - entity kinds, declaration table, descriptors
//! ```
//!
//! The catalog is built once before the first connection and never changes while
//! the process runs. [`ControllableIndex`] is derived from it and answers the two
//! lookups the message paths need: which value a command topic sets, and where a
//! value event is published.

pub mod entity;
pub mod identity;
pub mod topics;

use entity::{Controllable, Entity, EntityVariant, Outbound, Shape, DECLARATIONS};
use identity::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use topics::Topics;
use tracing::{debug, info};

pub use entity::{Channel, EntityKind};

/// Which entity kinds are registered
///
/// Disabled kinds still consume their indices, so toggling a kind never changes
/// the unique ids of the others.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CatalogOptions {
    pub binary_sensors: bool,
    pub sensors: bool,
    pub numbers: bool,
    pub switches: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            binary_sensors: true,
            sensors: true,
            numbers: true,
            switches: true,
        }
    }
}

impl CatalogOptions {
    pub fn enabled(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::BinarySensor => self.binary_sensors,
            EntityKind::Sensor => self.sensors,
            EntityKind::Number => self.numbers,
            EntityKind::Switch => self.switches,
        }
    }
}

/// Lookup tables for controllable entities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllableIndex {
    commands: BTreeMap<String, Controllable>,
    values: BTreeMap<Controllable, Outbound>,
}

impl ControllableIndex {
    fn register(&mut self, entity: &Entity, range: Option<std::ops::RangeInclusive<i64>>) {
        let (Some(command_topic), Some(control)) = (entity.command_topic(), entity.control())
        else {
            return;
        };
        self.commands.insert(command_topic.to_string(), control);
        self.values.insert(
            control,
            Outbound {
                state_topic: entity.state_topic.clone(),
                range,
            },
        );
    }

    /// Controllable set by messages on `topic`
    pub fn command_for(&self, topic: &str) -> Option<Controllable> {
        self.commands.get(topic).copied()
    }

    /// Outbound route of the value reported by event `name`
    pub fn outbound(&self, name: &str) -> Option<&Outbound> {
        Controllable::from_event_name(name).and_then(|control| self.values.get(&control))
    }

    pub fn command_topics(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn controls(&self) -> impl Iterator<Item = Controllable> + '_ {
        self.values.keys().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub device: Arc<DeviceIdentity>,
    pub entities: Vec<Entity>,
    pub index: ControllableIndex,
}

impl Catalog {
    pub fn build(device: DeviceIdentity, topics: &Topics, options: &CatalogOptions) -> Self {
        let device = Arc::new(device);
        let availability: Arc<str> = Arc::from(topics.availability.as_str());
        let mut entities = Vec::with_capacity(DECLARATIONS.len());
        let mut index = ControllableIndex::default();

        // Indices follow kind order first, declaration order second
        let ordered = EntityKind::ORDER
            .iter()
            .flat_map(|kind| DECLARATIONS.iter().filter(move |d| d.kind == *kind));

        for (position, declaration) in ordered.enumerate() {
            if !options.enabled(declaration.kind) {
                debug!("Skipping disabled {} '{}'", declaration.kind.component(), declaration.name);
                continue;
            }
            let unique_id = format!("{}{}", device.id, position + 1);
            let channel_topic = |channel: Channel| match channel {
                Channel::State => topics.state.clone(),
                Channel::Conversation => topics.conversation.clone(),
            };

            let (state_topic, variant, range) = match declaration.shape {
                Shape::Binary {
                    channel,
                    payload_on,
                    payload_off,
                    device_class,
                    value_template,
                } => (
                    channel_topic(channel),
                    EntityVariant::BinarySensor {
                        payload_on,
                        payload_off,
                        device_class,
                        value_template,
                    },
                    None,
                ),
                Shape::Text {
                    channel,
                    force_update,
                } => (
                    channel_topic(channel),
                    EntityVariant::Sensor { force_update },
                    None,
                ),
                Shape::Level { control, min, max } => (
                    topics.status(&unique_id),
                    EntityVariant::Number {
                        command_topic: topics.control(&unique_id),
                        control,
                        min,
                        max,
                    },
                    Some(min..=max),
                ),
                Shape::Toggle {
                    control,
                    payload_on,
                    payload_off,
                } => (
                    topics.status(&unique_id),
                    EntityVariant::Switch {
                        command_topic: topics.control(&unique_id),
                        control,
                        payload_on,
                        payload_off,
                    },
                    None,
                ),
            };

            let entity = Entity {
                unique_id,
                name: declaration.name,
                icon: declaration.icon,
                state_topic,
                device: device.clone(),
                availability_topic: availability.clone(),
                variant,
            };
            index.register(&entity, range);
            entities.push(entity);
        }

        info!(
            "Catalog for {} built with {} entities ({} controllable)",
            device.id,
            entities.len(),
            index.values.len()
        );
        Self {
            device,
            entities,
            index,
        }
    }
}
