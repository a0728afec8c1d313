//! rumqttc-backed broker session (MQTT 3.1.1)

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubscribeFilter, SubscribeReasonCode, Transport,
};
use tracing::{debug, warn};

use super::session::{BrokerConnector, BrokerSession, ConnectRequest, InboundPublish, SUBACK_FAILURE};
use crate::error::ReceiverError;

/// Capacity of the rumqttc request queue between client and event loop
pub const DEFAULT_REQUEST_CAPACITY: usize = 10;

/// Upper bound on flushing DISCONNECT during shutdown
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to a broker with rumqttc
#[derive(Debug, Clone)]
pub struct MqttConnector {
    request_capacity: usize,
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

impl MqttConnector {
    pub fn new(request_capacity: usize) -> Self {
        Self {
            request_capacity: request_capacity.max(1),
        }
    }
}

fn to_qos(level: u8) -> Result<QoS, ReceiverError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ReceiverError::transport(format!("invalid QoS level {}", other))),
    }
}

fn inbound(publish: Publish) -> InboundPublish {
    InboundPublish {
        topic: String::from_utf8_lossy(publish.topic.as_ref()).into_owned(),
        payload: publish.payload.to_vec(),
    }
}

/// SUBACK return code as the granted QoS level, or [`SUBACK_FAILURE`]
fn granted_code(code: &SubscribeReasonCode) -> u8 {
    match code {
        SubscribeReasonCode::Success(granted) => *granted as u8,
        SubscribeReasonCode::Failure => SUBACK_FAILURE,
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn BrokerSession>, ReceiverError> {
        let mut options = MqttOptions::new(
            request.client_id.clone(),
            request.broker.host.clone(),
            request.broker.port,
        );
        options.set_keep_alive(request.keep_alive);
        options.set_clean_session(request.clean_start);
        if let Some(credentials) = &request.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }
        if request.broker.uses_tls() {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, self.request_capacity);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(ReceiverError::transport(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    debug!(broker = %request.broker, session_present = ack.session_present, "Connected");
                    break;
                },
                Ok(_) => continue,
                Err(e) => {
                    return Err(ReceiverError::transport(format!(
                        "connecting to {}: {}",
                        request.broker, e
                    )))
                },
            }
        }

        Ok(Box::new(MqttSession {
            client,
            eventloop,
            pending: VecDeque::new(),
        }))
    }
}

/// Live rumqttc session
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Publishes that arrived while waiting for a SUBACK
    pending: VecDeque<InboundPublish>,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn subscribe(&mut self, topics: &[String], qos: u8) -> Result<Vec<u8>, ReceiverError> {
        let qos = to_qos(qos)?;
        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), qos))
            .collect();
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| ReceiverError::transport(format!("sending SUBSCRIBE: {}", e)))?;

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    return Ok(ack.return_codes.iter().map(granted_code).collect());
                },
                Ok(Event::Incoming(Packet::Publish(publish))) => self.pending.push_back(inbound(publish)),
                Ok(_) => {},
                Err(e) => return Err(ReceiverError::transport(format!("awaiting SUBACK: {}", e))),
            }
        }
    }

    async fn next_publish(&mut self) -> Result<Option<InboundPublish>, ReceiverError> {
        if let Some(publish) = self.pending.pop_front() {
            return Ok(Some(publish));
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => return Ok(Some(inbound(publish))),
                Ok(Event::Incoming(Packet::Disconnect)) => return Ok(None),
                Ok(_) => {},
                Err(e) => return Err(ReceiverError::transport(e.to_string())),
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ReceiverError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| ReceiverError::transport(format!("sending DISCONNECT: {}", e)))?;

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
                    Ok(_) => {},
                    // the broker drops the connection once DISCONNECT is seen
                    Err(_) => return,
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await.is_err() {
            warn!("Timed out flushing DISCONNECT");
        }
        Ok(())
    }
}
