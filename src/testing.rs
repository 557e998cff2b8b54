//! In-memory fakes of the broker link and host seams, shared by unit tests

use crate::catalog::identity::DeviceIdentity;
use crate::catalog::topics::Topics;
use crate::catalog::{Catalog, CatalogOptions};
use crate::error::{BridgeError, HostError};
use crate::host::{Command, EventBus, EventHandler, SubscriptionId, Terminal, VolumeStatus};
use crate::mqtt::discovery::DiscoveryPublisher;
use crate::mqtt::event_router::EventRouter;
use crate::mqtt::link::Link;
use crate::mqtt::message_manager::CommandDispatcher;
use crate::mqtt::mqtt_handler::{BrokerSession, ConnectionState};
use crate::mqtt::worker::{Job, Worker, JOB_CAPACITY};
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

pub fn test_device(id: &str) -> DeviceIdentity {
    DeviceIdentity {
        id: id.to_string(),
        manufacturer: "Aculeasis".to_string(),
        model: "Smart Speaker".to_string(),
        name: "mdmTerminal2".to_string(),
        firmware_version: "1.2.3".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkOp {
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Disconnect,
}

impl LinkOp {
    pub fn publish(topic: &str, payload: &str, retain: bool) -> Self {
        Self::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        }
    }

    pub fn subscribe(topic: &str, qos: QoS) -> Self {
        Self::Subscribe {
            topic: topic.to_string(),
            qos,
        }
    }
}

/// Records every request instead of sending it
#[derive(Default)]
pub struct RecordingLink {
    ops: Mutex<Vec<LinkOp>>,
    fail_disconnect: AtomicBool,
}

impl RecordingLink {
    pub fn ops(&self) -> Vec<LinkOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<(String, String, bool)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                LinkOp::Publish {
                    topic,
                    payload,
                    retain,
                } => Some((topic, payload, retain)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }
}

impl Link for RecordingLink {
    fn publish(
        &self,
        topic: &str,
        _qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BridgeError> {
        self.ops.lock().unwrap().push(LinkOp::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8(payload).unwrap(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BridgeError> {
        self.ops.lock().unwrap().push(LinkOp::subscribe(topic, qos));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(BridgeError::Connect("link closed".to_string()));
        }
        self.ops.lock().unwrap().push(LinkOp::Disconnect);
        Ok(())
    }
}

/// Terminal that records calls and notices
pub struct FakeTerminal {
    calls: Mutex<Vec<(Command, Value)>>,
    notices: Mutex<Vec<String>>,
    settings: Mutex<Vec<(String, String, Value)>>,
    volume: Mutex<VolumeStatus>,
    listening: AtomicBool,
}

impl Default for FakeTerminal {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            notices: Mutex::default(),
            settings: Mutex::default(),
            volume: Mutex::new(VolumeStatus {
                volume: 50,
                music_volume: 50,
            }),
            listening: AtomicBool::new(true),
        }
    }
}

impl FakeTerminal {
    pub fn calls(&self) -> Vec<(Command, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }

    pub fn settings(&self) -> Vec<(String, String, Value)> {
        self.settings.lock().unwrap().clone()
    }

    pub fn set_volume(&self, volume: i64, music_volume: i64) {
        *self.volume.lock().unwrap() = VolumeStatus {
            volume,
            music_volume,
        };
    }

    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
    }
}

impl Terminal for FakeTerminal {
    fn terminal_call(&self, command: Command, value: Value) -> Result<(), HostError> {
        self.calls.lock().unwrap().push((command, value));
        Ok(())
    }

    fn say(&self, text: &str) {
        self.notices.lock().unwrap().push(text.to_string());
    }

    fn volume_status(&self) -> VolumeStatus {
        *self.volume.lock().unwrap()
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn override_settings(&self, section: &str, key: &str, value: Value) {
        self.settings
            .lock()
            .unwrap()
            .push((section.to_string(), key.to_string(), value));
    }

    fn version(&self) -> String {
        "1.2.3".to_string()
    }
}

/// Bus that tracks registrations and can be told to fail an unsubscribe
#[derive(Default)]
pub struct FakeBus {
    next_id: AtomicU64,
    active: Mutex<HashSet<SubscriptionId>>,
    failing: Mutex<HashSet<SubscriptionId>>,
    unsubscribe_attempts: AtomicUsize,
}

impl FakeBus {
    pub fn fail_unsubscribe_of(&self, id: SubscriptionId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn active(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn unsubscribe_attempts(&self) -> usize {
        self.unsubscribe_attempts.load(Ordering::SeqCst)
    }
}

impl EventBus for FakeBus {
    fn subscribe(
        &self,
        _names: &[&str],
        _handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, HostError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.active.lock().unwrap().insert(id);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), HostError> {
        self.unsubscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&id) {
            return Err(HostError::Subscription(format!("{:?} is busy", id)));
        }
        self.active.lock().unwrap().remove(&id);
        Ok(())
    }
}

pub struct NullHandler;

impl EventHandler for NullHandler {
    fn on_event(&self, _name: &str, _args: &[Value], _kwargs: &Map<String, Value>) {}
}

#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<(String, Vec<Value>)>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<(String, Vec<Value>)> {
        self.events.lock().unwrap().clone()
    }
}

impl EventHandler for RecordingHandler {
    fn on_event(&self, name: &str, args: &[Value], _kwargs: &Map<String, Value>) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), args.to_vec()));
    }
}

/// A broker session wired to fakes, with the worker run by hand
pub struct Harness {
    pub link: Arc<RecordingLink>,
    pub terminal: Arc<FakeTerminal>,
    pub bus: Arc<FakeBus>,
    pub session: Arc<BrokerSession>,
    pub jobs: mpsc::Receiver<Job>,
    worker: Worker,
}

impl Harness {
    /// Device `dev` with every entity kind enabled
    pub fn new() -> Self {
        let topics = Topics::new("dev", "homeassistant");
        let catalog = Arc::new(Catalog::build(
            test_device("dev"),
            &topics,
            &CatalogOptions::default(),
        ));
        let link = Arc::new(RecordingLink::default());
        let terminal = Arc::new(FakeTerminal::default());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (jobs_tx, jobs) = mpsc::channel(JOB_CAPACITY);

        let router = Arc::new(EventRouter::new(
            link.clone(),
            topics.clone(),
            catalog.index.clone(),
            state_rx,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            terminal.clone(),
            catalog.index.clone(),
            topics.hub_status(),
        ));
        let discovery = Arc::new(DiscoveryPublisher::new(
            link.clone(),
            catalog.clone(),
            topics.clone(),
            router,
            terminal.clone(),
        ));
        let session = Arc::new(BrokerSession::new(
            link.clone(),
            &topics,
            &catalog.index,
            dispatcher.clone(),
            discovery.clone(),
            state_tx,
            jobs_tx,
        ));

        Self {
            link,
            terminal,
            bus: Arc::new(FakeBus::default()),
            session,
            jobs,
            worker: Worker::new(dispatcher, discovery),
        }
    }

    /// Processes every queued job on the calling thread
    pub fn run_jobs(&mut self) {
        while let Ok(job) = self.jobs.try_recv() {
            self.worker.process(job);
        }
    }
}
