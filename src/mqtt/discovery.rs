//! Home Assistant discovery, availability and default values
//!
//! Discovery payloads use the hub's abbreviated keys:
//!
//! ```json
//! {
//!   "name": "Volume",
//!   "uniq_id": "mdmt2_1a2b3c4",
//!   "dev": {"ids": "mdmt2_1a2b3c", "mf": "Aculeasis", "mdl": "Smart Speaker", "name": "mdmTerminal2", "sw": "0.1.0"},
//!   "avty": [{"topic": "terminals/mdmt2_1a2b3c/availability"}],
//!   "stat_t": "terminals/mdmt2_1a2b3c/STAT/mdmt2_1a2b3c4",
//!   "cmd_t": "terminals/mdmt2_1a2b3c/CTL/mdmt2_1a2b3c4",
//!   "icon": "hass:volume-vibrate",
//!   "min": 0,
//!   "max": 100
//! }
//! ```

use super::event_router::EventRouter;
use super::link::Link;
use crate::catalog::entity::{Controllable, Entity, EntityVariant};
use crate::catalog::identity::DeviceIdentity;
use crate::catalog::topics::Topics;
use crate::catalog::Catalog;
use crate::host::Terminal;
use rumqttc::QoS;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

#[derive(Serialize, Debug, PartialEq)]
pub struct DeviceBlock<'a> {
    ids: &'a str,
    mf: &'a str,
    mdl: &'a str,
    name: &'a str,
    sw: &'a str,
}

impl<'a> From<&'a DeviceIdentity> for DeviceBlock<'a> {
    fn from(device: &'a DeviceIdentity) -> Self {
        Self {
            ids: &device.id,
            mf: &device.manufacturer,
            mdl: &device.model,
            name: &device.name,
            sw: &device.firmware_version,
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct AvailabilityRef<'a> {
    topic: &'a str,
}

/// Discovery descriptor of one entity
#[derive(Serialize, Debug, PartialEq)]
pub struct DiscoveryPayload<'a> {
    name: &'a str,
    uniq_id: &'a str,
    dev: DeviceBlock<'a>,
    avty: [AvailabilityRef<'a>; 1],
    stat_t: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd_t: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dev_cla: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pl_on: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pl_off: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    val_tpl: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frc_upd: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<i64>,
}

impl<'a> From<&'a Entity> for DiscoveryPayload<'a> {
    fn from(entity: &'a Entity) -> Self {
        let mut payload = Self {
            name: entity.name,
            uniq_id: &entity.unique_id,
            dev: DeviceBlock::from(entity.device.as_ref()),
            avty: [AvailabilityRef {
                topic: &entity.availability_topic,
            }],
            stat_t: &entity.state_topic,
            cmd_t: entity.command_topic(),
            icon: entity.icon,
            dev_cla: None,
            pl_on: None,
            pl_off: None,
            val_tpl: None,
            frc_upd: None,
            min: None,
            max: None,
        };
        match &entity.variant {
            EntityVariant::BinarySensor {
                payload_on,
                payload_off,
                device_class,
                value_template,
            } => {
                payload.pl_on = Some(*payload_on);
                payload.pl_off = Some(*payload_off);
                payload.dev_cla = *device_class;
                payload.val_tpl = Some(*value_template);
            }
            EntityVariant::Sensor { force_update } => {
                payload.frc_upd = Some(*force_update);
            }
            EntityVariant::Number { min, max, .. } => {
                payload.min = Some(*min);
                payload.max = Some(*max);
            }
            EntityVariant::Switch {
                payload_on,
                payload_off,
                ..
            } => {
                payload.pl_on = Some(*payload_on);
                payload.pl_off = Some(*payload_off);
            }
        }
        payload
    }
}

pub struct DiscoveryPublisher {
    link: Arc<dyn Link>,
    catalog: Arc<Catalog>,
    topics: Topics,
    router: Arc<EventRouter>,
    terminal: Arc<dyn Terminal>,
    /// Set once `offline` is announced; guards every later `online`
    retired: Mutex<bool>,
}

impl DiscoveryPublisher {
    pub fn new(
        link: Arc<dyn Link>,
        catalog: Arc<Catalog>,
        topics: Topics,
        router: Arc<EventRouter>,
        terminal: Arc<dyn Terminal>,
    ) -> Self {
        Self {
            link,
            catalog,
            topics,
            router,
            terminal,
            retired: Mutex::new(false),
        }
    }

    /// Discovery, availability and current values, in that order
    ///
    /// Skipped entirely once the publisher is retired.
    pub fn initial_sync(&self) {
        if self.is_retired() {
            debug!("Publisher retired, skipping initial sync");
            return;
        }
        info!("Sending initial data for {}", self.catalog.device.id);
        self.publish_all();
        if self.publish_availability(true) {
            self.publish_default_values();
        }
    }

    pub fn publish_all(&self) {
        for entity in &self.catalog.entities {
            let topic = self.topics.discovery(entity.kind(), &entity.unique_id);
            let body = match serde_json::to_vec(&DiscoveryPayload::from(entity)) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to encode discovery for {}: {}", entity.unique_id, e);
                    continue;
                }
            };
            debug!("Discovery for {} on {}", entity.unique_id, topic);
            if let Err(e) = self.link.publish(&topic, QoS::AtLeastOnce, false, body) {
                warn!("Failed to publish discovery to {}: {}", topic, e);
            }
        }
    }

    pub fn is_retired(&self) -> bool {
        *self.retired.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Announces `offline` and refuses every later `online`
    pub fn retire(&self) {
        let mut retired = self.retired.lock().unwrap_or_else(|e| e.into_inner());
        *retired = true;
        self.send_availability(OFFLINE);
    }

    /// Retained availability; returns false when retired and nothing was sent
    ///
    /// The lock is held while the request is queued, so `online` can never be
    /// queued after the final `offline`.
    pub fn publish_availability(&self, online: bool) -> bool {
        let retired = self.retired.lock().unwrap_or_else(|e| e.into_inner());
        if *retired {
            debug!("Publisher retired, not announcing availability");
            return false;
        }
        self.send_availability(if online { ONLINE } else { OFFLINE });
        true
    }

    fn send_availability(&self, status: &str) {
        debug!("Availability {} on {}", status, self.topics.availability);
        if let Err(e) = self.link.publish(
            &self.topics.availability,
            QoS::AtLeastOnce,
            true,
            status.as_bytes().to_vec(),
        ) {
            warn!("Failed to publish availability {}: {}", status, e);
        }
    }

    /// Pushes the terminal's current controllable values through the event path
    pub fn publish_default_values(&self) {
        let volume = self.terminal.volume_status();
        let listener = if self.terminal.is_listening() { "on" } else { "off" };
        let values = [
            (Controllable::Volume, Value::from(volume.volume)),
            (Controllable::MusicVolume, Value::from(volume.music_volume)),
            (Controllable::Listener, Value::from(listener)),
        ];
        let none = Map::new();
        for (control, value) in values {
            // Only controllables registered in the catalog have a value topic
            if self.catalog.index.outbound(control.event_name()).is_some() {
                self.router.on_event(control.event_name(), &[value], &none);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogOptions;
    use crate::mqtt::mqtt_handler::ConnectionState;
    use crate::testing::{test_device, FakeTerminal, LinkOp, RecordingLink};
    use serde_json::json;
    use tokio::sync::watch;

    fn publisher() -> (DiscoveryPublisher, Arc<RecordingLink>, Arc<FakeTerminal>) {
        let topics = Topics::new("dev", "homeassistant");
        let catalog = Arc::new(Catalog::build(
            test_device("dev"),
            &topics,
            &CatalogOptions::default(),
        ));
        let link = Arc::new(RecordingLink::default());
        let terminal = Arc::new(FakeTerminal::default());
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let router = Arc::new(EventRouter::new(
            link.clone(),
            topics.clone(),
            catalog.index.clone(),
            rx,
        ));
        let publisher =
            DiscoveryPublisher::new(link.clone(), catalog, topics, router, terminal.clone());
        (publisher, link, terminal)
    }

    fn discovery_json(link: &RecordingLink, topic: &str) -> Value {
        let (_, payload, _) = link
            .publishes()
            .into_iter()
            .find(|(t, _, _)| t == topic)
            .unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    #[test]
    fn number_descriptor() {
        let (publisher, link, _) = publisher();
        publisher.publish_all();
        assert_eq!(
            discovery_json(&link, "homeassistant/number/dev4/config"),
            json!({
                "name": "Volume",
                "uniq_id": "dev4",
                "dev": {"ids": "dev", "mf": "Aculeasis", "mdl": "Smart Speaker", "name": "mdmTerminal2", "sw": "1.2.3"},
                "avty": [{"topic": "terminals/dev/availability"}],
                "stat_t": "terminals/dev/STAT/dev4",
                "cmd_t": "terminals/dev/CTL/dev4",
                "icon": "hass:volume-vibrate",
                "min": 0,
                "max": 100
            })
        );
    }

    #[test]
    fn sensor_descriptors() {
        let (publisher, link, _) = publisher();
        publisher.publish_all();
        assert_eq!(link.publishes().len(), 6);

        let talking = discovery_json(&link, "homeassistant/binary_sensor/dev2/config");
        assert_eq!(talking["dev_cla"], "sound");
        assert_eq!(talking["pl_on"], "start_talking");
        assert_eq!(talking["val_tpl"], "{{ value_json.state }}");
        assert_eq!(talking["stat_t"], "terminals/dev/state");
        assert!(talking.get("icon").is_none());
        assert!(talking.get("cmd_t").is_none());

        let say = discovery_json(&link, "homeassistant/sensor/dev3/config");
        assert_eq!(say["frc_upd"], true);
        assert_eq!(say["stat_t"], "terminals/dev/conversation");

        let mic = discovery_json(&link, "homeassistant/switch/dev6/config");
        assert_eq!(mic["pl_off"], "off");
        assert_eq!(mic["cmd_t"], "terminals/dev/CTL/dev6");
    }

    #[test]
    fn initial_sync_order() {
        let (publisher, link, terminal) = publisher();
        terminal.set_volume(35, 70);
        terminal.set_listening(false);
        publisher.initial_sync();

        let ops = link.ops();
        assert_eq!(ops.len(), 10);
        assert!(ops[..6].iter().all(|op| matches!(
            op,
            LinkOp::Publish { topic, .. } if topic.starts_with("homeassistant/")
        )));
        assert_eq!(
            ops[6..].to_vec(),
            vec![
                LinkOp::publish("terminals/dev/availability", "online", true),
                LinkOp::publish("terminals/dev/STAT/dev4", "35", false),
                LinkOp::publish("terminals/dev/STAT/dev5", "70", false),
                LinkOp::publish("terminals/dev/STAT/dev6", "off", false),
            ]
        );
    }

    #[test]
    fn availability_is_retained() {
        let (publisher, link, _) = publisher();
        assert!(publisher.publish_availability(false));
        assert_eq!(
            link.ops(),
            vec![LinkOp::publish("terminals/dev/availability", "offline", true)]
        );
    }

    #[test]
    fn retired_publisher_never_goes_back_online() {
        let (publisher, link, _) = publisher();
        publisher.retire();
        assert!(publisher.is_retired());

        assert!(!publisher.publish_availability(true));
        publisher.initial_sync();

        assert_eq!(
            link.ops(),
            vec![LinkOp::publish("terminals/dev/availability", "offline", true)]
        );
    }
}
