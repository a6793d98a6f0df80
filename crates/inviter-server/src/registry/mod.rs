//! Daemon registry.
//!
//! Maps daemon ids to their live [`DaemonClient`] and fronts the durable
//! user-to-daemon bindings. Live entries are volatile: after a restart
//! daemons reconnect and handshake again.

pub mod store;

pub use store::{BindingStore, JsonFileBindingStore, MemoryBindingStore, UserBinding};

use crate::daemon::{ClientChannels, DaemonClient, DaemonSession};
use crate::error::ServerResult;
use inviter_core::{ProtocolVersion, RequestUser};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Process-wide table of connected daemons.
pub struct DaemonManager {
    /// Live clients indexed by daemon id.
    daemons: RwLock<HashMap<String, Arc<DaemonClient>>>,
    /// Durable user bindings.
    store: Arc<dyn BindingStore>,
    /// Monotonic connection ID counter.
    next_conn_id: AtomicU64,
    request_timeout: Option<Duration>,
}

impl DaemonManager {
    /// Create an empty registry backed by `store`.
    pub fn new(store: Arc<dyn BindingStore>, request_timeout: Option<Duration>) -> Self {
        Self {
            daemons: RwLock::new(HashMap::new()),
            store,
            next_conn_id: AtomicU64::new(1),
            request_timeout,
        }
    }

    /// Create and store a client for a freshly handshaken connection.
    ///
    /// A client already registered under `daemon_id` is closed first, so its
    /// outstanding requests fail instead of hanging.
    pub async fn register_daemon(
        &self,
        daemon_id: &str,
        version: ProtocolVersion,
        session_id: i64,
    ) -> (Arc<DaemonClient>, ClientChannels) {
        let connection_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let session = DaemonSession {
            daemon_id: daemon_id.to_string(),
            version,
            session_id,
            connection_id,
            connected_at: Instant::now(),
        };
        let (client, channels) = DaemonClient::new(session, self.request_timeout);
        let client = Arc::new(client);

        let previous = self
            .daemons
            .write()
            .await
            .insert(daemon_id.to_string(), client.clone());
        if let Some(previous) = previous {
            info!(
                daemon_id,
                old_connection = previous.session().connection_id,
                new_connection = connection_id,
                "daemon reconnected, closing superseded connection"
            );
            previous.close("superseded by a new connection").await;
        }

        info!(daemon_id, connection_id, session_id, "daemon registered");
        (client, channels)
    }

    /// Remove the entry for `daemon_id`, if any.
    pub async fn unregister_daemon(&self, daemon_id: &str) {
        if self.daemons.write().await.remove(daemon_id).is_some() {
            debug!(daemon_id, "daemon unregistered");
        }
    }

    /// Remove `client`'s entry only if it is still the registered one.
    ///
    /// A connection torn down after a reconnect replaced it must not evict
    /// its successor. Returns whether the entry was removed.
    pub async fn unregister_connection(&self, client: &Arc<DaemonClient>) -> bool {
        let mut daemons = self.daemons.write().await;
        match daemons.get(client.daemon_id()) {
            Some(current) if Arc::ptr_eq(current, client) => {
                daemons.remove(client.daemon_id());
                debug!(
                    daemon_id = %client.daemon_id(),
                    connection_id = client.session().connection_id,
                    "daemon unregistered"
                );
                true
            }
            _ => false,
        }
    }

    /// Look up a live daemon.
    pub async fn get_daemon_from_id(&self, daemon_id: &str) -> Option<Arc<DaemonClient>> {
        self.daemons.read().await.get(daemon_id).cloned()
    }

    /// Snapshot of every connected client.
    pub async fn connected_daemons(&self) -> Vec<Arc<DaemonClient>> {
        self.daemons.read().await.values().cloned().collect()
    }

    /// The daemon bound to `user_id`, whether or not it is connected.
    pub async fn get_daemon_id_from_user(&self, user_id: &str) -> ServerResult<Option<String>> {
        Ok(self
            .store
            .find_by_user_id(user_id)
            .await?
            .map(|binding| binding.daemon_id))
    }

    /// The binding pointing at `daemon_id`.
    pub async fn get_binding_for_daemon(&self, daemon_id: &str) -> ServerResult<Option<UserBinding>> {
        self.store.find_by_daemon_id(daemon_id).await
    }

    /// Link `user` to `daemon_id`, recording the daemon's version if it is
    /// connected right now.
    pub async fn bind_user(&self, user: &RequestUser, daemon_id: &str, locale: &str) -> ServerResult<()> {
        let daemon_version = self
            .get_daemon_from_id(daemon_id)
            .await
            .map(|client| client.session().version.to_string());
        self.store
            .upsert_by_user_id(UserBinding {
                user_id: user.id.clone(),
                user_name: user.name.clone(),
                daemon_id: daemon_id.to_string(),
                locale: locale.to_string(),
                daemon_version,
            })
            .await?;
        info!(user_id = %user.id, daemon_id, "user bound to daemon");
        Ok(())
    }

    /// Record the protocol version a bound daemon connected with.
    pub async fn record_daemon_version(&self, mut binding: UserBinding, version: &ProtocolVersion) -> ServerResult<()> {
        binding.daemon_version = Some(version.to_string());
        self.store.upsert_by_user_id(binding).await
    }

    /// Remove `user_id`'s binding. Returns whether one existed.
    pub async fn unbind_user(&self, user_id: &str) -> ServerResult<bool> {
        let removed = self.store.delete_by_user_id(user_id).await?;
        if removed {
            info!(user_id, "user unbound");
        }
        Ok(removed)
    }

    /// Number of connected daemons (point-in-time snapshot).
    pub async fn daemon_count(&self) -> usize {
        self.daemons.read().await.len()
    }

    /// Number of linked users (point-in-time snapshot).
    pub async fn user_count(&self) -> ServerResult<usize> {
        self.store.count().await
    }
}
