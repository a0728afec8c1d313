//! Transport seam between the receiver state machine and an MQTT client

use std::time::Duration;

use async_trait::async_trait;

use super::broker_url::BrokerUrl;
use crate::credentials::Credentials;
use crate::error::ReceiverError;

/// SUBACK return code signalling a refused subscription
pub const SUBACK_FAILURE: u8 = 0x80;

/// Everything needed to open a broker session
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub broker: BrokerUrl,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_start: bool,
    pub credentials: Option<Credentials>,
}

/// A publish as delivered by the broker, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Opens broker sessions
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open the transport and complete the connect handshake.
    ///
    /// A refused handshake is a [`ReceiverError::Transport`].
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn BrokerSession>, ReceiverError>;
}

/// An established broker session
#[async_trait]
pub trait BrokerSession: Send {
    /// Subscribe to `topics` at `qos`.
    ///
    /// Returns one granted code per topic in request order: the granted QoS
    /// level, or [`SUBACK_FAILURE`].
    async fn subscribe(&mut self, topics: &[String], qos: u8) -> Result<Vec<u8>, ReceiverError>;

    /// Next publish; `Ok(None)` once the broker has closed the session
    async fn next_publish(&mut self) -> Result<Option<InboundPublish>, ReceiverError>;

    /// Send DISCONNECT and release the transport
    async fn disconnect(&mut self) -> Result<(), ReceiverError>;
}
