//! Hub control loop
//!
//! One task owns the registry of connected users. Every membership change and
//! every routing decision arrives as a [`HubCommand`] and is applied in
//! arrival order, so the map needs no lock and a recipient's queue only ever
//! has one producer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::envelope::{Envelope, UserId};
use crate::error::HubError;
use crate::metrics::HubMetrics;

/// Distinguishes successive connections of the same user.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity asserted by the layer that authenticated the connect request.
/// The hub does not verify it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// Registry entry as reported to callers of [`HubHandle::connected_users`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedUser {
    pub user_id: UserId,
    pub username: String,
    pub connection_id: ConnectionId,
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_queue_capacity: usize,
    /// Capacity of the command channel into the control loop
    pub control_channel_capacity: usize,
    /// How long a closing connection waits for its writer before dropping the transport
    pub writer_drain_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            control_channel_capacity: 1024,
            writer_drain_timeout: Duration::from_secs(5),
        }
    }
}

impl HubConfig {
    // tokio channels panic on zero capacity
    fn normalized(mut self) -> Self {
        self.outbound_queue_capacity = self.outbound_queue_capacity.max(1);
        self.control_channel_capacity = self.control_channel_capacity.max(1);
        self
    }
}

/// A live entry. Dropping it drops the only sender of the outbound queue,
/// which is how a connection's queue gets closed.
struct ConnectedClient {
    identity: Identity,
    connection_id: ConnectionId,
    outbox: mpsc::Sender<String>,
    /// Fired only on eviction. Dropped unfired on every other removal.
    evict: oneshot::Sender<()>,
}

/// Commands accepted by the control loop
pub(crate) enum HubCommand {
    Register {
        identity: Identity,
        outbox: mpsc::Sender<String>,
        evict: oneshot::Sender<()>,
        respond_to: oneshot::Sender<ConnectionId>,
    },
    Unregister {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    Route {
        envelope: Envelope,
    },
    ConnectedUsers {
        respond_to: oneshot::Sender<Vec<ConnectedUser>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// The control loop. Owns the registry exclusively.
pub struct Hub {
    registry: HashMap<UserId, ConnectedClient>,
    next_connection_id: u64,
    receiver: mpsc::Receiver<HubCommand>,
    metrics: Arc<HubMetrics>,
}

impl Hub {
    /// Start the control loop on the current runtime.
    pub fn spawn(config: HubConfig) -> HubHandle {
        Self::spawn_with_metrics(config, Arc::new(HubMetrics::new()))
    }

    pub fn spawn_with_metrics(config: HubConfig, metrics: Arc<HubMetrics>) -> HubHandle {
        let config = config.normalized();
        let (sender, receiver) = mpsc::channel(config.control_channel_capacity);

        let hub = Self {
            registry: HashMap::new(),
            next_connection_id: 1,
            receiver,
            metrics: metrics.clone(),
        };

        tokio::spawn(hub.run());

        HubHandle {
            sender,
            metrics,
            config: Arc::new(config),
        }
    }

    async fn run(mut self) {
        info!("Hub control loop started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                HubCommand::Register {
                    identity,
                    outbox,
                    evict,
                    respond_to,
                } => {
                    let connection_id = self.register(identity, outbox, evict);
                    let _ = respond_to.send(connection_id);
                }
                HubCommand::Unregister {
                    user_id,
                    connection_id,
                } => {
                    self.unregister(user_id, connection_id);
                }
                HubCommand::Route { envelope } => {
                    self.route(envelope);
                }
                HubCommand::ConnectedUsers { respond_to } => {
                    let _ = respond_to.send(self.connected_users());
                }
                HubCommand::Shutdown { respond_to } => {
                    let closed = self.registry.len();
                    for _ in self.registry.drain() {
                        self.metrics.connection_removed();
                    }
                    info!(closed, "Hub shutting down, closed all outbound queues");
                    let _ = respond_to.send(());
                    break;
                }
            }
        }

        info!("Hub control loop stopped");
    }

    fn register(
        &mut self,
        identity: Identity,
        outbox: mpsc::Sender<String>,
        evict: oneshot::Sender<()>,
    ) -> ConnectionId {
        let connection_id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        let user_id = identity.user_id;
        info!(%user_id, conn_id = %connection_id, username = %identity.username, "Registered connection");

        let client = ConnectedClient {
            identity,
            connection_id,
            outbox,
            evict,
        };
        self.metrics.connection_registered();

        // Last connect wins; dropping the old entry closes its queue.
        if let Some(previous) = self.registry.insert(user_id, client) {
            info!(
                %user_id,
                old_conn_id = %previous.connection_id,
                new_conn_id = %connection_id,
                "Superseded earlier connection"
            );
            self.metrics.connection_superseded();
        }

        connection_id
    }

    fn unregister(&mut self, user_id: UserId, connection_id: ConnectionId) -> bool {
        match self.registry.get(&user_id) {
            Some(current) if current.connection_id == connection_id => {
                self.registry.remove(&user_id);
                self.metrics.connection_removed();
                info!(%user_id, conn_id = %connection_id, "Unregistered connection");
                true
            }
            Some(current) => {
                debug!(
                    %user_id,
                    stale_conn_id = %connection_id,
                    current_conn_id = %current.connection_id,
                    "Ignoring stale unregister"
                );
                false
            }
            None => {
                debug!(%user_id, conn_id = %connection_id, "Unregister for connection already gone");
                false
            }
        }
    }

    fn route(&mut self, envelope: Envelope) {
        if !envelope.is_private_message() {
            debug!(kind = envelope.kind.as_str(), "Router ignoring envelope kind");
            self.metrics.envelope_ignored();
            return;
        }

        let recipient = envelope.to_user_id;
        let Some(client) = self.registry.get(&recipient) else {
            debug!(%recipient, from = %envelope.from_user_id, "Recipient offline, dropping message");
            self.metrics.message_undeliverable();
            return;
        };

        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(%recipient, "Dropping message: {}", e);
                return;
            }
        };

        match client.outbox.try_send(payload) {
            Ok(()) => {
                self.metrics.message_routed();
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%recipient, conn_id = %client.connection_id, "Outbound queue full, evicting slow consumer");
                self.evict(recipient);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%recipient, conn_id = %client.connection_id, "Outbound queue closed, evicting");
                self.evict(recipient);
            }
        }
    }

    /// Remove the entry and tell its connection to tear down without waiting
    /// on the writer, which may be stuck on a stalled transport.
    fn evict(&mut self, user_id: UserId) {
        if let Some(client) = self.registry.remove(&user_id) {
            let _ = client.evict.send(());
            self.metrics.connection_evicted();
        }
    }

    fn connected_users(&self) -> Vec<ConnectedUser> {
        let mut users: Vec<ConnectedUser> = self
            .registry
            .values()
            .map(|c| ConnectedUser {
                user_id: c.identity.user_id,
                username: c.identity.username.clone(),
                connection_id: c.connection_id,
            })
            .collect();
        users.sort_by_key(|u| u.user_id);
        users
    }
}

/// Handle to communicate with the hub's control loop
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    metrics: Arc<HubMetrics>,
    config: Arc<HubConfig>,
}

impl HubHandle {
    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Submit an envelope to the router. Delivery is best-effort: an offline
    /// recipient is not an error.
    pub async fn route(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubCommand::Route { envelope }).await
    }

    /// Entry point for the message-creation flow: synthesize and route a
    /// `private_message` envelope.
    pub async fn send_private_message(
        &self,
        from: UserId,
        to: UserId,
        content: impl Into<String>,
    ) -> Result<(), HubError> {
        self.route(Envelope::private_message(from, to, content)).await
    }

    /// Currently registered users, ordered by user id.
    pub async fn connected_users(&self) -> Result<Vec<ConnectedUser>, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::ConnectedUsers { respond_to }).await?;
        response.await.map_err(|_| HubError::NoReply)
    }

    /// Close every registered connection's queue and stop the control loop.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::Shutdown { respond_to }).await?;
        response.await.map_err(|_| HubError::NoReply)
    }

    pub(crate) fn outbox(&self) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(self.config.outbound_queue_capacity)
    }

    pub(crate) async fn register(
        &self,
        identity: Identity,
        outbox: mpsc::Sender<String>,
        evict: oneshot::Sender<()>,
    ) -> Result<ConnectionId, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::Register {
            identity,
            outbox,
            evict,
            respond_to,
        })
        .await?;
        response.await.map_err(|_| HubError::NoReply)
    }

    pub(crate) async fn unregister(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Unregister {
            user_id,
            connection_id,
        })
        .await
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.sender.send(command).await.map_err(|_| HubError::Closed)
    }
}
