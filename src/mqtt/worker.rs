//! Bounded worker for everything that calls the terminal
//!
//! The network loop only classifies inbound packets and queues a [`Job`]. Commands
//! and Initial Sync (which reads current values from the terminal) run here, on a
//! blocking-pool thread, so a slow terminal never delays broker keepalives.

use super::discovery::DiscoveryPublisher;
use super::message_manager::{CommandDispatcher, Inbound};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const JOB_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Discovery, availability and default values
    InitialSync,
    /// A classified inbound message to execute
    Message(Inbound),
}

pub struct Worker {
    dispatcher: Arc<CommandDispatcher>,
    discovery: Arc<DiscoveryPublisher>,
}

impl Worker {
    pub fn new(dispatcher: Arc<CommandDispatcher>, discovery: Arc<DiscoveryPublisher>) -> Self {
        Self {
            dispatcher,
            discovery,
        }
    }

    pub fn process(&self, job: Job) {
        debug!("Processing job {:?}", job);
        match job {
            Job::InitialSync => self.discovery.initial_sync(),
            Job::Message(inbound) => self.dispatcher.execute(inbound),
        }
    }

    /// Drains `jobs` until every sender is dropped
    pub fn spawn(self, mut jobs: mpsc::Receiver<Job>) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            info!("Command worker started");
            while let Some(job) = jobs.blocking_recv() {
                self.process(job);
            }
            info!("Command worker stopped");
        })
    }
}
