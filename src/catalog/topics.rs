//! Topic namespace of one terminal
//!
//! Every topic is a fixed suffix of `terminals/<device id>`, plus the discovery
//! topics under the hub's discovery prefix.

use super::entity::EntityKind;

pub const TOPIC_PREFIX: &str = "terminals";
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub root: String,
    pub conversation: String,
    pub cmd: String,
    pub state: String,
    pub availability: String,
    discovery_prefix: String,
}

impl Topics {
    pub fn new(device_id: &str, discovery_prefix: &str) -> Self {
        let root = format!("{}/{}", TOPIC_PREFIX, device_id);
        Self {
            conversation: format!("{}/conversation", root),
            cmd: format!("{}/cmd", root),
            state: format!("{}/state", root),
            availability: format!("{}/availability", root),
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_string(),
            root,
        }
    }

    /// Per-entity command topic
    pub fn control(&self, unique_id: &str) -> String {
        format!("{}/CTL/{}", self.root, unique_id)
    }

    /// Per-entity value topic
    pub fn status(&self, unique_id: &str) -> String {
        format!("{}/STAT/{}", self.root, unique_id)
    }

    pub fn discovery(&self, kind: EntityKind, unique_id: &str) -> String {
        format!("{}/{}/{}/config", self.discovery_prefix, kind.component(), unique_id)
    }

    /// Birth/will topic of the hub itself
    pub fn hub_status(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }
}
