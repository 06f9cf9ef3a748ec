//! WebSocket session lifecycle: one observer from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use consult_core::{SessionId, WorkflowId};
use futures::{SinkExt, StreamExt};
use metrics::histogram;
use tracing::{debug, info, instrument, warn};

use super::connection::{Inbound, TransportEnds};
use super::handler::handle_client_text;
use crate::metrics::WS_CONNECTION_DURATION_SECONDS;
use crate::orchestration::OrchestrationService;

/// How long the writer gets to flush a close frame after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a WebSocket session for one observer.
///
/// 1. Registers the connection (ack, then state recovery if the workflow exists)
/// 2. Pumps outbound frames to the socket and inbound frames to the connection
/// 3. Dispatches inbound text frames, replying to this connection only
/// 4. Unregisters on close, transport failure, or eviction
#[instrument(skip_all, fields(workflow_id = %workflow_id))]
pub async fn run_ws_session(
    mut ws: WebSocket,
    service: Arc<OrchestrationService>,
    workflow_id: WorkflowId,
    session_id: Option<SessionId>,
) {
    let (connection, ends) = match service.connect(workflow_id, session_id).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "failed to register connection");
            let _ = ws.send(WsMessage::Close(None)).await;
            return;
        }
    };
    let started = Instant::now();
    let conn_id = connection.id().clone();
    info!(conn_id = %conn_id, "observer connected");

    let TransportEnds {
        mut outbound,
        inbound,
    } = ends;
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Outbound forwarder. Sends a close frame once the connection is closed.
    let writer_conn = Arc::clone(&connection);
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(String::clone(&text).into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                () = writer_conn.closed() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
        // A dead socket makes every later send fail, which prunes the
        // connection from broadcasts.
        writer_conn.close();
    });

    // Inbound pump. Dropping `inbound` ends the handler loop below.
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            let frame = match frame {
                WsMessage::Text(text) => Inbound::Text(text.to_string()),
                WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => Inbound::Text(text.to_owned()),
                    Err(_) => {
                        debug!(len = data.len(), "non-UTF8 binary frame");
                        Inbound::Pong
                    }
                },
                WsMessage::Ping(_) | WsMessage::Pong(_) => Inbound::Pong,
                WsMessage::Close(_) => Inbound::Close,
            };
            let closing = frame == Inbound::Close;
            if inbound.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(frame) = connection.receive().await {
        let Inbound::Text(text) = frame else { continue };
        if let Some(reply) = handle_client_text(&text, &connection, &service).await {
            if connection.send(&reply).await.is_err() {
                break;
            }
        }
    }

    service.disconnect(&connection);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    reader.abort();
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(conn_id = %conn_id, "observer disconnected");
}
