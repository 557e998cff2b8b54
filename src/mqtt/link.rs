//! Outgoing side of the broker connection
//!
//! [`Link`] is the narrow set of requests the bridge sends to the broker. The
//! rumqttc implementation only enqueues requests on the client's channel, so every
//! call is non-blocking and safe from any thread while the event loop task keeps
//! delivering incoming packets.

use crate::error::BridgeError;
use rumqttc::{AsyncClient, QoS};

pub trait Link: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>)
        -> Result<(), BridgeError>;

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BridgeError>;

    fn disconnect(&self) -> Result<(), BridgeError>;
}

impl Link for AsyncClient {
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BridgeError> {
        Ok(self.try_publish(topic, qos, retain, payload)?)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BridgeError> {
        Ok(self.try_subscribe(topic, qos)?)
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        Ok(self.try_disconnect()?)
    }
}
