//! One observer connection.
//!
//! A [`Connection`] never touches the socket directly. It owns the server
//! side of two bounded channels; the hosting WebSocket session holds the
//! other side ([`TransportEnds`]) and pumps frames between them and the
//! socket. Tests drive a connection through the same channels.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use consult_core::{ConnectionId, Message, SessionId, WorkflowId};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet registered.
    Connecting,
    /// Registered and acknowledged.
    Connected,
    /// Closed by either side or after a failed send. Terminal.
    Disconnected,
}

/// A frame received from the observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// A WebSocket-level ping or pong.
    Pong,
    /// The observer closed the socket.
    Close,
}

/// Why a send failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport is gone.
    #[error("connection closed")]
    Closed,
    /// The outbound queue stayed full for the whole send timeout.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    /// The message could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The transport side of a connection's channels.
#[derive(Debug)]
pub struct TransportEnds {
    /// Frames to write to the socket.
    pub outbound: mpsc::Receiver<Arc<String>>,
    /// Where the socket reader delivers frames.
    pub inbound: mpsc::Sender<Inbound>,
}

/// A connected observer of one workflow.
pub struct Connection {
    id: ConnectionId,
    workflow_id: WorkflowId,
    session_id: SessionId,
    connected_at: DateTime<Utc>,
    state: Mutex<ConnectionState>,
    last_liveness: Mutex<Instant>,
    outbound: mpsc::Sender<Arc<String>>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Inbound>>,
    send_timeout: Duration,
    closed: CancellationToken,
}

impl Connection {
    /// Open a connection in `Connecting` state.
    pub fn open(
        workflow_id: WorkflowId,
        session_id: SessionId,
        capacity: usize,
        send_timeout: Duration,
    ) -> (Arc<Self>, TransportEnds) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            workflow_id,
            session_id,
            connected_at: Utc::now(),
            state: Mutex::new(ConnectionState::Connecting),
            last_liveness: Mutex::new(Instant::now()),
            outbound: out_tx,
            inbound: tokio::sync::Mutex::new(in_rx),
            send_timeout,
            closed: CancellationToken::new(),
        });
        let ends = TransportEnds {
            outbound: out_rx,
            inbound: in_tx,
        };
        (conn, ends)
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Workflow this connection observes.
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Owning session.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// When the connection was opened.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move from `Connecting` to `Connected`. No effect once disconnected.
    pub fn mark_connected(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Connected;
        }
    }

    /// Serialize and send a message.
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let frame = Arc::new(message.to_json()?);
        self.send_raw(frame).await
    }

    /// Send an already serialized frame.
    ///
    /// Any failure closes the connection; the caller decides whether to
    /// unregister it. There is no retry.
    pub async fn send_raw(&self, frame: Arc<String>) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Disconnected {
            return Err(TransportError::Closed);
        }
        let result = match self.outbound.send_timeout(frame, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(TransportError::Timeout(self.send_timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(TransportError::Closed),
        };
        if let Err(ref e) = result {
            debug!(conn_id = %self.id, error = %e, "send failed, closing connection");
            self.close();
        }
        result
    }

    /// Wait for the next inbound frame.
    ///
    /// Returns `None` once the observer closes the socket or the connection
    /// is force-closed. Every frame counts as liveness.
    pub async fn receive(&self) -> Option<Inbound> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => None,
            frame = inbound.recv() => match frame {
                None | Some(Inbound::Close) => None,
                Some(frame) => {
                    self.touch_liveness();
                    Some(frame)
                }
            },
        }
    }

    /// Record that the observer is alive.
    pub fn touch_liveness(&self) {
        *self.last_liveness.lock() = Instant::now();
    }

    /// Time since the last liveness signal.
    pub fn idle_for(&self) -> Duration {
        self.last_liveness.lock().elapsed()
    }

    /// Force-close. Idempotent.
    pub fn close(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
        self.closed.cancel();
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("workflow_id", &self.workflow_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
