//! Workflow id → observer connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use consult_core::{ConnectionId, Message, WorkflowId};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::connection::{Connection, TransportError};

/// Why a connection could not be registered.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    /// The registry already holds its maximum number of connections.
    #[error("connection limit reached ({0})")]
    AtCapacity(usize),
    /// The `connection_ack` could not be queued.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Every registered connection, grouped by workflow.
///
/// All mutation goes through [`register`](Self::register) and
/// [`unregister`](Self::unregister). Readers get snapshot copies, so callers
/// never iterate the map while another task mutates it.
pub struct ConnectionRegistry {
    by_workflow: RwLock<HashMap<WorkflowId, HashMap<ConnectionId, Arc<Connection>>>>,
    total: AtomicUsize,
    max_connections: usize,
    heartbeat_interval_secs: u64,
    heartbeat_timeout_secs: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry. The liveness constants are advertised to
    /// every new connection in its `connection_ack`.
    pub fn new(heartbeat_interval_secs: u64, heartbeat_timeout_secs: u64) -> Self {
        Self {
            by_workflow: RwLock::new(HashMap::new()),
            total: AtomicUsize::new(0),
            max_connections: usize::MAX,
            heartbeat_interval_secs,
            heartbeat_timeout_secs,
        }
    }

    /// Cap the number of registered connections.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Mark a connection connected, queue its `connection_ack`, then add it.
    ///
    /// The ack is queued before the connection becomes visible to
    /// broadcasts, so it is always the first frame. A failed ack or a full
    /// registry leaves the connection closed and unregistered.
    pub async fn register(&self, connection: Arc<Connection>) -> Result<(), RegisterError> {
        connection.mark_connected();
        let ack = Message::connection_ack(
            connection.workflow_id(),
            connection.id(),
            connection.session_id(),
            self.heartbeat_interval_secs,
            self.heartbeat_timeout_secs,
        );
        connection.send(&ack).await?;

        {
            let mut map = self.by_workflow.write();
            // `total` only changes under the write lock, so this check holds.
            if self.total.load(Ordering::Relaxed) >= self.max_connections {
                drop(map);
                connection.close();
                warn!(
                    conn_id = %connection.id(),
                    max = self.max_connections,
                    "connection limit reached, refusing registration"
                );
                return Err(RegisterError::AtCapacity(self.max_connections));
            }
            let set = map.entry(connection.workflow_id().clone()).or_default();
            if set
                .insert(connection.id().clone(), Arc::clone(&connection))
                .is_none()
            {
                let _ = self.total.fetch_add(1, Ordering::Relaxed);
            }
        }
        info!(
            conn_id = %connection.id(),
            workflow_id = %connection.workflow_id(),
            "connection registered"
        );
        Ok(())
    }

    /// Remove a connection. Returns whether it was registered.
    ///
    /// Membership only; closing the transport is the caller's business.
    pub fn unregister(&self, connection: &Connection) -> bool {
        let mut map = self.by_workflow.write();
        let Some(set) = map.get_mut(connection.workflow_id()) else {
            return false;
        };
        let removed = set.remove(connection.id()).is_some();
        if set.is_empty() {
            let _ = map.remove(connection.workflow_id());
        }
        if removed {
            let _ = self.total.fetch_sub(1, Ordering::Relaxed);
            debug!(conn_id = %connection.id(), "connection unregistered");
        }
        removed
    }

    /// Snapshot of every connection.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.by_workflow
            .read()
            .values()
            .flat_map(|set| set.values().cloned())
            .collect()
    }

    /// Snapshot of one workflow's connections.
    pub fn for_workflow(&self, workflow_id: &WorkflowId) -> Vec<Arc<Connection>> {
        self.by_workflow
            .read()
            .get(workflow_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total registered connections.
    pub fn count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Connections observing one workflow.
    pub fn count_for(&self, workflow_id: &WorkflowId) -> usize {
        self.by_workflow.read().get(workflow_id).map_or(0, HashMap::len)
    }

    /// Workflows with at least one connection.
    pub fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.by_workflow.read().keys().cloned().collect()
    }

    /// Advertised heartbeat interval.
    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval_secs
    }

    /// Advertised liveness timeout.
    pub fn heartbeat_timeout_secs(&self) -> u64 {
        self.heartbeat_timeout_secs
    }
}
