//! # MQTT Integration Module
//!
//! Connects the terminal to an MQTT broker and presents it to Home Assistant
//! through discovery.
//!
//! ## Why This Module Exists
//!
//! The hub only knows what the terminal announces. This module keeps both sides
//! in step:
//! - Discovery descriptors and availability so the hub builds the entities
//! - Terminal events mirrored to the state, conversation and STAT topics
//! - Hub commands validated and executed on the terminal
//! - Reconnects with a full resync, and a resync whenever the hub restarts
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address parsing and transport options
//! ├── link.rs             - Outgoing request seam over the rumqttc client
//! ├── mqtt_handler.rs     - Broker session: connection state, subscriptions, supervision
//! ├── message_manager.rs  - Inbound classification and command dispatch
//! ├── event_router.rs     - Terminal events to broker messages
//! ├── discovery.rs        - Discovery, availability and default values
//! └── worker.rs           - Blocking worker for everything that calls the terminal
//! ```
//!
//! ## Threading
//!
//! ```text
//! EventLoop task ──classify──► Job channel ──► Worker (blocking pool) ──► Terminal
//!       ▲                                            │
//!       └──────────── AsyncClient requests ◄──────────┘
//! Host event threads ──► EventRouter ──► AsyncClient requests
//! ```
//!
//! The network loop never calls the terminal, and no publisher waits on the
//! network loop.

pub mod config;
pub mod discovery;
pub mod event_router;
pub mod link;
pub mod message_manager;
pub mod mqtt_handler;
pub mod worker;
