//! Heartbeat broadcasting and stale-connection eviction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use consult_core::ConnectionId;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::broadcast::{Broadcaster, DeliveryReport};
use super::registry::ConnectionRegistry;
use crate::metrics::WS_EVICTIONS_TOTAL;

/// Timing for the two supervisor loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessTiming {
    /// Time between heartbeat broadcasts.
    pub heartbeat_interval: Duration,
    /// Time between stale-connection sweeps.
    pub cleanup_interval: Duration,
    /// Idle time after which a connection is evicted.
    pub timeout: Duration,
}

/// Join handles for the running loops.
pub struct SupervisorHandles {
    /// Heartbeat loop.
    pub heartbeat: JoinHandle<()>,
    /// Cleanup loop.
    pub cleanup: JoinHandle<()>,
}

impl SupervisorHandles {
    /// Both handles, for a shutdown drain.
    pub fn into_vec(self) -> Vec<JoinHandle<()>> {
        vec![self.heartbeat, self.cleanup]
    }
}

/// Keeps the registry honest: heartbeats every observer on one timer and
/// evicts the ones that have gone quiet on another.
pub struct LivenessSupervisor {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    timing: LivenessTiming,
    started: AtomicBool,
}

impl LivenessSupervisor {
    /// Create a stopped supervisor.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        timing: LivenessTiming,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            timing,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn both loops. They run until `cancel` fires.
    ///
    /// Only the first call spawns anything; later calls return `None`.
    pub fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Option<SupervisorHandles> {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("liveness supervisor already running");
            return None;
        }
        info!(
            heartbeat_secs = self.timing.heartbeat_interval.as_secs(),
            cleanup_secs = self.timing.cleanup_interval.as_secs(),
            timeout_secs = self.timing.timeout.as_secs(),
            "liveness supervisor started"
        );

        let heartbeat = {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(this.timing.heartbeat_interval);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let _ = this.heartbeat_tick().await;
                        }
                    }
                }
                debug!("heartbeat loop stopped");
            })
        };

        let cleanup = {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(this.timing.cleanup_interval);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let _ = this.sweep_stale();
                        }
                    }
                }
                debug!("cleanup loop stopped");
            })
        };

        Some(SupervisorHandles { heartbeat, cleanup })
    }

    /// Send one heartbeat to every connection, pruning failures.
    pub async fn heartbeat_tick(&self) -> DeliveryReport {
        if self.registry.count() == 0 {
            return DeliveryReport::default();
        }
        self.broadcaster
            .broadcast_heartbeats(self.timing.heartbeat_interval.as_secs())
            .await
    }

    /// Close and unregister every connection idle longer than the timeout.
    /// Returns the evicted ids.
    pub fn sweep_stale(&self) -> Vec<ConnectionId> {
        let stale: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|conn| conn.idle_for() > self.timing.timeout)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for conn in stale {
            info!(
                conn_id = %conn.id(),
                workflow_id = %conn.workflow_id(),
                idle_secs = conn.idle_for().as_secs(),
                "evicting stale connection"
            );
            conn.close();
            if self.registry.unregister(&conn) {
                metrics::counter!(WS_EVICTIONS_TOTAL).increment(1);
            }
            evicted.push(conn.id().clone());
        }
        evicted
    }
}

/// Interval whose first tick fires one period from now rather than
/// immediately.
fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
