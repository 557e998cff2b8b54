//! Broker session: connection lifecycle and inbound routing
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──ConnAck──► Connected ──transport error──► Disconnected
//!      ▲                                                       │
//!      └──────────────── backoff, poll again ◄─────────────────┘
//! ```
//!
//! Entering `Connected` subscribes the command topic, every controllable command
//! topic and the hub status topic, then queues Initial Sync. The hub announcing
//! `online` queues Initial Sync again, whatever the current state.

use super::discovery::DiscoveryPublisher;
use super::link::Link;
use super::message_manager::{CommandDispatcher, Inbound};
use super::worker::Job;
use crate::catalog::topics::Topics;
use crate::catalog::ControllableIndex;
use crate::error::BridgeError;
use crate::host::Subscriptions;
use rumqttc::{ConnectReturnCode, Event, EventLoop, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const HUB_ONLINE: &str = "online";

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Exponential reconnect delay, doubling from `min` up to `max`
#[derive(Clone, Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            next: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Whether the event loop keeps running after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

pub struct BrokerSession {
    link: Arc<dyn Link>,
    dispatcher: Arc<CommandDispatcher>,
    discovery: Arc<DiscoveryPublisher>,
    subscriptions: Vec<(String, QoS)>,
    state: watch::Sender<ConnectionState>,
    jobs: mpsc::Sender<Job>,
    stopping: CancellationToken,
}

impl BrokerSession {
    pub fn new(
        link: Arc<dyn Link>,
        topics: &Topics,
        index: &ControllableIndex,
        dispatcher: Arc<CommandDispatcher>,
        discovery: Arc<DiscoveryPublisher>,
        state: watch::Sender<ConnectionState>,
        jobs: mpsc::Sender<Job>,
    ) -> Self {
        let mut subscriptions = vec![(topics.cmd.clone(), QoS::AtLeastOnce)];
        subscriptions.extend(
            index
                .command_topics()
                .map(|topic| (topic.to_string(), QoS::AtMostOnce)),
        );
        subscriptions.push((topics.hub_status(), QoS::AtMostOnce));

        Self {
            link,
            dispatcher,
            discovery,
            subscriptions,
            state,
            jobs,
            stopping: CancellationToken::new(),
        }
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscriptions(&self) -> &[(String, QoS)] {
        &self.subscriptions
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    /// Routes one event of the transport loop
    pub fn handle_event(&self, event: &Event) -> LoopControl {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                self.on_connected();
            }
            Event::Incoming(Packet::ConnAck(ack)) => {
                warn!("Broker refused connection: {:?}", ack.code);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.on_publish(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::Disconnect) => {
                self.on_connection_lost("broker sent disconnect");
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                info!("Disconnect sent, stopping network loop");
                return LoopControl::Stop;
            }
            other => debug!("MQTT event: {:?}", other),
        }
        LoopControl::Continue
    }

    fn on_connected(&self) {
        info!(
            "MQTT connected, subscribing to {} topics",
            self.subscriptions.len()
        );
        self.state.send_replace(ConnectionState::Connected);
        for (topic, qos) in &self.subscriptions {
            debug!("Subscribing to {} ({:?})", topic, qos);
            if let Err(e) = self.link.subscribe(topic, *qos) {
                error!("Failed to subscribe to {}: {}", topic, e);
            }
        }
        self.queue(Job::InitialSync);
    }

    pub fn on_connection_lost(&self, reason: &str) {
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if self.is_stopping() {
            debug!("Connection closed during shutdown: {}", reason);
        } else if previous == ConnectionState::Connected {
            error!("MQTT disconnected, reconnecting. Reason: {}", reason);
        } else {
            warn!("MQTT reconnect failed: {}", reason);
        }
    }

    fn on_publish(&self, topic: &str, payload: &[u8]) {
        match self.dispatcher.classify(topic, payload) {
            Inbound::HubStatus(status) => {
                info!("Home Assistant: {}", status);
                if status == HUB_ONLINE {
                    self.queue(Job::InitialSync);
                }
            }
            inbound => self.queue(Job::Message(inbound)),
        }
    }

    fn queue(&self, job: Job) {
        match self.jobs.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Command worker busy, dropping {:?}", job);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Command worker stopped, ignoring job");
            }
        }
    }

    /// Polls until the broker acknowledges the first connection
    ///
    /// A failed or timed out first connection is not retried.
    pub async fn connect(&self, eventloop: &mut EventLoop, timeout: Duration) -> Result<(), BridgeError> {
        let handshake = async {
            loop {
                let event = eventloop
                    .poll()
                    .await
                    .map_err(|e| BridgeError::Connect(e.to_string()))?;
                let connected = matches!(
                    &event,
                    Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success
                );
                self.handle_event(&event);
                if connected {
                    return Ok(());
                }
            }
        };
        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| BridgeError::ConnectTimeout(timeout.as_secs()))?
    }

    /// Drives the transport until shutdown, reconnecting with backoff after every loss
    pub async fn supervise(self: Arc<Self>, mut eventloop: EventLoop, mut backoff: Backoff) {
        info!("MQTT supervisor started");
        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    if matches!(event, Event::Incoming(Packet::ConnAck(_))) {
                        backoff.reset();
                    }
                    if self.handle_event(&event) == LoopControl::Stop {
                        break;
                    }
                }
                Err(e) => {
                    self.on_connection_lost(&e.to_string());
                    if self.is_stopping() {
                        break;
                    }
                    let delay = backoff.next_delay();
                    info!("Next MQTT connection attempt in {:?}", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.stopping.cancelled() => break,
                    }
                }
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!("MQTT supervisor stopped");
    }

    /// Unsubscribes host events, stops reconnecting, announces offline and disconnects
    ///
    /// Every step runs even when an earlier one fails.
    pub fn shutdown(&self, subscriptions: Option<Subscriptions>) {
        if let Some(subscriptions) = subscriptions {
            let errors = subscriptions.release();
            if !errors.is_empty() {
                warn!("{} host subscriptions could not be released", errors.len());
            }
        }
        self.stopping.cancel();
        self.discovery.retire();
        if let Err(e) = self.link.disconnect() {
            warn!("Failed to request disconnect: {}", e);
        }
    }
}
