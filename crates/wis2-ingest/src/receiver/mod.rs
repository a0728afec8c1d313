//! Broker message receiver
//!
//! [`MessageReceiver`] owns the broker session. Creation connects and
//! subscribes as one step: it either fails or hands back a receiver that is
//! already streaming. Afterwards a pump task moves publishes into a bounded
//! mailbox and [`MessageReceiver::next`] decodes them one at a time.
//!
//! ```text
//! (connect, subscribe) -> Streaming -> Disconnected (clean)
//!                                   -> Failed (error retained)
//! ```
//!
//! A full mailbox suspends the pump, so a slow consumer slows broker
//! consumption instead of losing messages. Cancelling the token handed to
//! [`MessageReceiver::connect`] makes the pump send DISCONNECT and close the
//! mailbox; queued messages are still delivered before `next` returns `None`.

pub mod broker_url;
pub mod decode;
pub mod mqtt;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wis2_common::types::Notification;

use crate::credentials::{CredentialChain, CredentialProvider};
use crate::error::ReceiverError;

pub use broker_url::{BrokerScheme, BrokerUrl};
pub use mqtt::MqttConnector;
pub use session::{BrokerConnector, BrokerSession, ConnectRequest, InboundPublish, SUBACK_FAILURE};

/// Default mailbox capacity between the broker pump and the consumer
pub const DEFAULT_MAILBOX_CAPACITY: usize = 16;

/// Default keep-alive interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default subscription QoS
pub const DEFAULT_QOS: u8 = 1;

/// Default environment prefix for broker credentials
pub const DEFAULT_CREDENTIALS_ENV_PREFIX: &str = "WIS2";

type Mailbox = mpsc::Receiver<Result<InboundPublish, ReceiverError>>;

/// Lifecycle state of a [`MessageReceiver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Streaming,
    /// Terminal; the stream ended without error
    Disconnected,
    /// Terminal; see [`MessageReceiver::error`]
    Failed,
}

impl ReceiverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReceiverState::Disconnected | ReceiverState::Failed)
    }
}

/// Connection and subscription options
#[derive(Clone)]
pub struct ReceiverOptions {
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_start: bool,
    pub qos: u8,
    pub ignore_topic_errors: bool,
    pub mailbox_capacity: usize,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_start: true,
            qos: DEFAULT_QOS,
            ignore_topic_errors: false,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            credentials: Arc::new(CredentialChain::standard(
                None,
                DEFAULT_CREDENTIALS_ENV_PREFIX,
                None,
            )),
        }
    }
}

impl std::fmt::Debug for ReceiverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverOptions")
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("clean_start", &self.clean_start)
            .field("qos", &self.qos)
            .field("ignore_topic_errors", &self.ignore_topic_errors)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .finish_non_exhaustive()
    }
}

/// Random client identifier of the form `wis2-<uuid>`
pub fn default_client_id() -> String {
    format!("wis2-{}", uuid::Uuid::new_v4())
}

/// A stream of decoded notifications
#[async_trait]
pub trait NotificationSource: Send {
    /// Next notification, or `None` once the stream has ended
    async fn next(&mut self) -> Option<Notification>;

    /// Why the stream ended, if it ended with an error
    fn error(&self) -> Option<&ReceiverError>;
}

/// Receives and decodes notifications from a broker
pub struct MessageReceiver {
    broker: BrokerUrl,
    source: String,
    state: ReceiverState,
    mailbox: Mailbox,
    pump: Option<JoinHandle<()>>,
    pump_cancel: CancellationToken,
    error: Option<ReceiverError>,
}

impl MessageReceiver {
    /// Connect to `broker_url` with rumqttc and subscribe to `topics`
    pub async fn connect(
        broker_url: &str,
        topics: &[String],
        options: ReceiverOptions,
        cancel: CancellationToken,
    ) -> Result<Self, ReceiverError> {
        Self::connect_with(&MqttConnector::default(), broker_url, topics, options, cancel).await
    }

    /// Connect through an explicit [`BrokerConnector`].
    ///
    /// # Arguments
    /// * `connector` - Opens the broker session
    /// * `broker_url` - `tcp://host[:port]` or `ssl://host[:port]`
    /// * `topics` - Topic filters to subscribe to
    /// * `options` - Session and subscription options
    /// * `cancel` - Cancelling this ends the stream cleanly
    ///
    /// # Errors
    /// Any failure before streaming starts: bad URL, credential lookup,
    /// transport or handshake, or refused subscriptions unless
    /// `ignore_topic_errors` is set.
    pub async fn connect_with(
        connector: &dyn BrokerConnector,
        broker_url: &str,
        topics: &[String],
        options: ReceiverOptions,
        cancel: CancellationToken,
    ) -> Result<Self, ReceiverError> {
        let broker = BrokerUrl::parse(broker_url)?;
        let credentials = options.credentials.credentials_for(&broker.host)?;

        let request = ConnectRequest {
            broker: broker.clone(),
            client_id: options.client_id.clone(),
            keep_alive: options.keep_alive,
            clean_start: options.clean_start,
            credentials,
        };

        debug!(broker = %broker, client_id = %request.client_id, "Connecting to broker");
        let mut session = connector.connect(&request).await?;

        let granted = session.subscribe(topics, options.qos).await?;
        let failed: Vec<String> = topics
            .iter()
            .enumerate()
            .filter(|(i, _)| granted.get(*i).copied() != Some(options.qos))
            .map(|(_, topic)| topic.clone())
            .collect();

        if !failed.is_empty() {
            if !options.ignore_topic_errors {
                if let Err(e) = session.disconnect().await {
                    warn!(error = %e, "Disconnect after refused subscription failed");
                }
                return Err(ReceiverError::Subscription { failed });
            }
            for topic in &failed {
                warn!(topic = %topic, qos = options.qos, "Subscription not granted, continuing");
            }
        }
        info!(
            broker = %broker,
            subscribed = topics.len() - failed.len(),
            refused = failed.len(),
            "Subscribed"
        );

        let (tx, mailbox) = mpsc::channel(options.mailbox_capacity.max(1));
        let pump_cancel = cancel.child_token();
        let pump = tokio::spawn(pump(session, tx, pump_cancel.clone()));

        Ok(Self {
            source: broker.to_string(),
            broker,
            state: ReceiverState::Streaming,
            mailbox,
            pump: Some(pump),
            pump_cancel,
            error: None,
        })
    }

    pub fn broker(&self) -> &BrokerUrl {
        &self.broker
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Terminal error, if the stream failed
    pub fn error(&self) -> Option<&ReceiverError> {
        self.error.as_ref()
    }

    /// Next decoded notification.
    ///
    /// Returns `None` once the stream has ended; check [`MessageReceiver::error`]
    /// to tell a clean end from a failure. The first decode error ends the
    /// stream.
    pub async fn next(&mut self) -> Option<Notification> {
        if self.state.is_terminal() {
            return None;
        }

        match self.mailbox.recv().await {
            Some(Ok(publish)) => match decode::decode_notification(&publish, &self.source) {
                Ok(notification) => Some(notification),
                Err(e) => {
                    self.finish(Some(e)).await;
                    None
                },
            },
            Some(Err(e)) => {
                self.finish(Some(e)).await;
                None
            },
            None => {
                self.finish(None).await;
                None
            },
        }
    }

    async fn finish(&mut self, error: Option<ReceiverError>) {
        self.pump_cancel.cancel();
        self.mailbox.close();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                error!(error = %e, "Broker pump task failed");
            }
        }

        match error {
            Some(e) => {
                error!(broker = %self.broker, error = %e, "Notification stream failed");
                self.error = Some(e);
                self.state = ReceiverState::Failed;
            },
            None => {
                info!(broker = %self.broker, "Notification stream ended");
                self.state = ReceiverState::Disconnected;
            },
        }
    }
}

#[async_trait]
impl NotificationSource for MessageReceiver {
    async fn next(&mut self) -> Option<Notification> {
        MessageReceiver::next(self).await
    }

    fn error(&self) -> Option<&ReceiverError> {
        MessageReceiver::error(self)
    }
}

/// Move publishes from the session into the mailbox until cancelled, the
/// session ends, or the consumer goes away.
async fn pump(
    mut session: Box<dyn BrokerSession>,
    mailbox: mpsc::Sender<Result<InboundPublish, ReceiverError>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = session.next_publish() => next,
        };

        match next {
            Ok(Some(publish)) => {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = mailbox.send(Ok(publish)) => sent,
                };
                if sent.is_err() {
                    debug!("Mailbox closed, stopping broker pump");
                    break;
                }
            },
            Ok(None) => {
                info!("Broker closed the session");
                return;
            },
            Err(e) => {
                // consumer may already be gone; nothing else to report to
                let _ = mailbox.send(Err(e)).await;
                return;
            },
        }
    }

    match session.disconnect().await {
        Ok(()) => info!("Disconnected from broker"),
        Err(e) => warn!(error = %e, "Broker disconnect failed"),
    }
}
