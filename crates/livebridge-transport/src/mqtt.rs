//! MQTT connector built on `rumqttc`.
//!
//! [`MqttConnector::run`] drives the client event loop until cancelled. On
//! every `ConnAck` it re-subscribes to the full topic set and publishes an
//! empty status query so the remote controller re-announces its session
//! state. On any connection error it logs, waits the reconnect interval and
//! polls again; `rumqttc` reconnects on the next poll.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use livebridge_core::metrics::TRANSPORT_RECONNECTS_TOTAL;
use livebridge_core::{Envelope, Topics, TransportError};
use livebridge_settings::BrokerSettings;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::publisher::Publisher;

/// Capacity of the client request queue between handles and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Broker connection state as seen by the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected (initial state, or after an error).
    Disconnected,
    /// A `ConnAck` was received and the resync requests were queued.
    Connected,
}

/// A request queued right after a successful connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectAction {
    /// Subscribe to a topic pattern.
    Subscribe(String),
    /// Publish a message.
    Publish {
        /// Target topic.
        topic: String,
        /// Payload bytes.
        payload: Bytes,
    },
}

/// The requests issued on every (re)connect: one subscription per pattern
/// in [`Topics::subscriptions`], then an empty status query.
pub fn connect_actions(topics: &Topics) -> Vec<ConnectAction> {
    let mut actions: Vec<ConnectAction> = topics
        .subscriptions()
        .iter()
        .map(|p| ConnectAction::Subscribe(p.as_str().to_owned()))
        .collect();
    actions.push(ConnectAction::Publish {
        topic: topics.status_query(),
        payload: Bytes::new(),
    });
    actions
}

/// Owns the `rumqttc` client and event loop.
pub struct MqttConnector {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Topics,
    reconnect_interval: Duration,
    state_tx: watch::Sender<ConnectionState>,
    stopped: CancellationToken,
}

impl std::fmt::Debug for MqttConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConnector")
            .field("topics", &self.topics)
            .field("reconnect_interval", &self.reconnect_interval)
            .finish_non_exhaustive()
    }
}

impl MqttConnector {
    /// Build a connector from broker settings.
    ///
    /// Fails only when a configured CA certificate cannot be read. No
    /// network I/O happens until [`run`](Self::run).
    pub fn new(settings: &BrokerSettings, topics: Topics) -> Result<Self, TransportError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        let _ = options.set_keep_alive(settings.keep_alive());
        if let Some(username) = &settings.username {
            let password = settings.password.clone().unwrap_or_default();
            let _ = options.set_credentials(username, password);
        }
        if let Some(path) = &settings.ca_cert_path {
            let ca = std::fs::read(path).map_err(|e| TransportError::Connection {
                message: format!("cannot read CA certificate {path}: {e}"),
            })?;
            let _ = options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            client,
            eventloop,
            topics,
            reconnect_interval: settings.reconnect_interval(),
            state_tx,
            stopped: CancellationToken::new(),
        })
    }

    /// A publisher handle sharing this connector's client.
    ///
    /// Once [`run`](Self::run) returns, the handle fails with
    /// [`TransportError::Closed`].
    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::new(MqttPublisher {
            client: self.client.clone(),
            stopped: self.stopped.clone(),
        })
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Drive the event loop until `cancel` fires or `inbound` is closed.
    ///
    /// Never returns on connection errors.
    pub async fn run(mut self, inbound: mpsc::Sender<Envelope>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("broker connected, resubscribing");
                    let _ = self.state_tx.send_replace(ConnectionState::Connected);
                    self.resync();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let envelope = Envelope::new(publish.topic, publish.payload);
                    if inbound.send(envelope).await.is_err() {
                        debug!("inbound stream closed, stopping connector");
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
                    metrics::counter!(TRANSPORT_RECONNECTS_TOTAL).increment(1);
                    warn!(
                        %error,
                        retry_in = ?self.reconnect_interval,
                        "broker connection error"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.reconnect_interval) => {}
                    }
                }
            }
        }

        let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
        self.stopped.cancel();
        if let Err(error) = self.client.try_disconnect() {
            debug!(%error, "disconnect request not queued");
        }
        info!("connector stopped");
    }

    // Queued without awaiting: the event loop that drains the request
    // channel is this task.
    fn resync(&self) {
        for action in connect_actions(&self.topics) {
            let result = match &action {
                ConnectAction::Subscribe(pattern) => {
                    self.client.try_subscribe(pattern.as_str(), QoS::AtMostOnce)
                }
                ConnectAction::Publish { topic, payload } => self.client.try_publish(
                    topic.as_str(),
                    QoS::AtMostOnce,
                    false,
                    payload.to_vec(),
                ),
            };
            if let Err(error) = result {
                warn!(?action, %error, "failed to queue resync request");
            }
        }
    }
}

struct MqttPublisher {
    client: AsyncClient,
    stopped: CancellationToken,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.stopped.is_cancelled() {
            return Err(TransportError::Closed);
        }
        // try_publish never blocks while the connection is down; a full
        // request queue is reported as a failed publish.
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| TransportError::Publish {
                topic: topic.to_owned(),
                message: e.to_string(),
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
