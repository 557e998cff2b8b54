//! Bridge lifecycle as a typestate machine
//!
//! # State Machine
//!
//! ```text
//! Configured ──start──► Running ──shutdown──► Stopped
//!     │
//!     └──(connect failure)──► Err, nothing registered
//! ```
//!
//! `create` refuses to build a bridge without a usable broker address. `start`
//! subscribes to terminal events only after the broker acknowledged the first
//! connection, so a failed start leaves nothing attached to the host.

use crate::catalog::identity::{self, DeviceIdentity};
use crate::catalog::topics::Topics;
use crate::catalog::Catalog;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host::{notice, EventBus, Subscriptions, Terminal};
use crate::mqtt::config::MqttConfig;
use crate::mqtt::discovery::DiscoveryPublisher;
use crate::mqtt::event_router::EventRouter;
use crate::mqtt::link::Link;
use crate::mqtt::message_manager::CommandDispatcher;
use crate::mqtt::mqtt_handler::{Backoff, BrokerSession, ConnectionState};
use crate::mqtt::worker::{Worker, JOB_CAPACITY};
use rumqttc::AsyncClient;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(5);

mod sealed {
    pub trait Sealed {}
}

/// Lifecycle states of [`Bridge`]
pub trait BridgeState: sealed::Sealed {}

/// Identity, topics and catalog resolved
#[derive(Debug, Clone)]
pub struct Configured;

/// Connected once, supervisor and worker alive
#[derive(Debug, Clone)]
pub struct Running;

/// Offline announced, tasks joined
#[derive(Debug, Clone)]
pub struct Stopped;

impl sealed::Sealed for Configured {}
impl sealed::Sealed for Running {}
impl sealed::Sealed for Stopped {}
impl BridgeState for Configured {}
impl BridgeState for Running {}
impl BridgeState for Stopped {}

pub struct Bridge<S: BridgeState> {
    config: MqttConfig,
    terminal: Arc<dyn Terminal>,
    bus: Arc<dyn EventBus>,
    topics: Topics,
    catalog: Arc<Catalog>,
    session: Option<Arc<BrokerSession>>,
    subscriptions: Option<Subscriptions>,
    supervisor: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    state: PhantomData<S>,
}

impl<S: BridgeState> Bridge<S> {
    pub fn device_id(&self) -> &str {
        &self.catalog.device.id
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn transition<N: BridgeState>(self) -> Bridge<N> {
        Bridge {
            config: self.config,
            terminal: self.terminal,
            bus: self.bus,
            topics: self.topics,
            catalog: self.catalog,
            session: self.session,
            subscriptions: self.subscriptions,
            supervisor: self.supervisor,
            worker: self.worker,
            state: PhantomData,
        }
    }
}

impl Bridge<Configured> {
    /// Resolves the broker endpoint, identity, topics and catalog
    ///
    /// Without a usable broker address the terminal is told and the bridge stays off.
    pub fn create(
        config: &BridgeConfig,
        terminal: Arc<dyn Terminal>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self, BridgeError> {
        let device_id = identity::resolve(Some(&config.smarthome.terminal));
        let mqtt = match MqttConfig::from_config(config, &device_id) {
            Ok(mqtt) => mqtt,
            Err(e) => {
                error!("MQTT bridge disabled: {}", e);
                terminal.say(notice::NO_BROKER);
                return Err(BridgeError::Disabled(e));
            }
        };

        let device = DeviceIdentity {
            id: device_id.clone(),
            manufacturer: config.device.manufacturer.clone(),
            model: config.device.model.clone(),
            name: config.device.name.clone(),
            firmware_version: terminal.version(),
        };
        let topics = Topics::new(&device_id, &config.mqtt.discovery_prefix);
        let catalog = Arc::new(Catalog::build(device, &topics, &config.entities));
        info!(
            "Bridge configured for {} with {} entities",
            device_id,
            catalog.entities.len()
        );

        Ok(Self {
            config: mqtt,
            terminal,
            bus,
            topics,
            catalog,
            session: None,
            subscriptions: None,
            supervisor: None,
            worker: None,
            state: PhantomData,
        })
    }

    /// Connects, then attaches the worker, the supervisor and the host event handlers
    pub async fn start(mut self) -> Result<Bridge<Running>, BridgeError> {
        let options = self.config.mqtt_options(&self.topics.availability);
        let (client, mut eventloop) = AsyncClient::new(options, self.config.request_capacity);
        info!("MQTT connecting to {}", self.config.endpoint);

        let link: Arc<dyn Link> = Arc::new(client);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (jobs_tx, jobs_rx) = mpsc::channel(JOB_CAPACITY);

        let router = Arc::new(EventRouter::new(
            link.clone(),
            self.topics.clone(),
            self.catalog.index.clone(),
            state_rx,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            self.terminal.clone(),
            self.catalog.index.clone(),
            self.topics.hub_status(),
        ));
        let discovery = Arc::new(DiscoveryPublisher::new(
            link.clone(),
            self.catalog.clone(),
            self.topics.clone(),
            router.clone(),
            self.terminal.clone(),
        ));
        let session = Arc::new(BrokerSession::new(
            link,
            &self.topics,
            &self.catalog.index,
            dispatcher.clone(),
            discovery.clone(),
            state_tx,
            jobs_tx,
        ));

        if let Err(e) = session.connect(&mut eventloop, self.config.connect_timeout).await {
            error!("MQTT connection error: {}", e);
            self.terminal.say(notice::CONNECT_FAILED);
            return Err(e);
        }

        self.terminal
            .override_settings("smarthome", "disable_http", Value::Bool(true));

        let worker = Worker::new(dispatcher, discovery).spawn(jobs_rx);
        let backoff = Backoff::new(
            self.config.reconnect_min_delay,
            self.config.reconnect_max_delay,
        );
        let supervisor = tokio::spawn(session.clone().supervise(eventloop, backoff));

        let subscriptions = match Subscriptions::register(self.bus.clone(), router.handler_table()) {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!("Failed to subscribe to terminal events: {}", e);
                session.shutdown(None);
                return Err(e.into());
            }
        };
        debug!("Registered {} host event handlers", subscriptions.len());

        self.session = Some(session);
        self.subscriptions = Some(subscriptions);
        self.supervisor = Some(supervisor);
        self.worker = Some(worker);
        info!("MQTT bridge running");
        Ok(self.transition())
    }
}

impl Bridge<Running> {
    pub fn connection(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.session.as_ref().map(|session| session.connection())
    }

    /// Releases host handlers, announces offline, disconnects and joins both tasks
    pub async fn shutdown(mut self) -> Bridge<Stopped> {
        info!("Stopping MQTT bridge for {}", self.catalog.device.id);

        if let Some(session) = self.session.take() {
            session.shutdown(self.subscriptions.take());
        }

        if let Some(mut supervisor) = self.supervisor.take() {
            match tokio::time::timeout(STOP_GRACE, &mut supervisor).await {
                Ok(Ok(())) => debug!("MQTT supervisor joined"),
                Ok(Err(e)) => warn!("MQTT supervisor failed: {}", e),
                Err(_) => {
                    warn!("MQTT supervisor did not stop in time, aborting");
                    supervisor.abort();
                }
            }
        }

        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(STOP_GRACE, worker).await.is_err() {
                warn!("Command worker did not stop in time");
            }
        }

        info!("MQTT bridge stopped");
        self.transition()
    }
}

impl Bridge<Stopped> {}
