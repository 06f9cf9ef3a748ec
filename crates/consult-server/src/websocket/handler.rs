//! Inbound frame dispatch.

use consult_core::{ClientMessage, Message};
use tracing::{debug, instrument, warn};

use super::connection::Connection;
use crate::orchestration::OrchestrationService;

/// Handle one text frame from an observer.
///
/// Returns a reply for the sending connection only, if there is one.
/// Feedback results reach the sender through the workflow broadcast like
/// every other observer.
#[instrument(skip_all, fields(conn_id = %connection.id()))]
pub async fn handle_client_text(
    text: &str,
    connection: &Connection,
    service: &OrchestrationService,
) -> Option<Message> {
    let workflow_id = connection.workflow_id();
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "invalid client message");
            return Some(Message::error(
                workflow_id,
                "invalid_message",
                format!("Invalid message: {e}"),
            ));
        }
    };

    match message {
        ClientMessage::HeartbeatAck => None,
        ClientMessage::Ping => Some(Message::heartbeat(
            workflow_id,
            service.registry().heartbeat_interval_secs(),
        )),
        ClientMessage::Feedback(feedback) => {
            debug!(kind = %feedback.kind, "feedback over websocket");
            match service.submit_feedback(workflow_id, &feedback).await {
                Ok(_) => None,
                Err(e) => Some(Message::error(workflow_id, e.category(), e.to_string())),
            }
        }
        ClientMessage::RequestState => match service.snapshot(workflow_id).await {
            Ok(workflow) => Some(Message::state_recovery(&workflow)),
            Err(e) => Some(Message::error(workflow_id, e.category(), e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::websocket::connection::TransportEnds;
    use consult_core::{MessagePayload, WorkflowId, WorkflowPhase};
    use std::sync::Arc;

    async fn setup(known: bool) -> (OrchestrationService, Arc<Connection>, WorkflowId, TransportEnds) {
        let svc = OrchestrationService::new(&ServerConfig::default());
        let id = if known {
            svc.create_workflow(None, None).id
        } else {
            WorkflowId::from("ghost")
        };
        let (conn, ends) = svc.connect(id.clone(), None).await.unwrap();
        (svc, conn, id, ends)
    }

    fn error_code(msg: &Message) -> &str {
        match &msg.payload {
            MessagePayload::Error { code, .. } => code,
            other => panic!("expected error, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn invalid_json_gets_error_reply() {
        let (svc, conn, _, _ends) = setup(true).await;
        let reply = handle_client_text("{nope", &conn, &svc).await.unwrap();
        assert_eq!(error_code(&reply), "invalid_message");
    }

    #[tokio::test]
    async fn unknown_type_gets_error_reply() {
        let (svc, conn, _, _ends) = setup(true).await;
        let reply = handle_client_text(r#"{"type":"subscribe"}"#, &conn, &svc)
            .await
            .unwrap();
        assert_eq!(error_code(&reply), "invalid_message");
    }

    #[tokio::test]
    async fn ping_gets_heartbeat() {
        let (svc, conn, _, _ends) = setup(true).await;
        let reply = handle_client_text(r#"{"type":"ping"}"#, &conn, &svc)
            .await
            .unwrap();
        assert_eq!(reply.kind(), "heartbeat");
    }

    #[tokio::test]
    async fn heartbeat_ack_is_silent() {
        let (svc, conn, _, _ends) = setup(true).await;
        assert!(handle_client_text(r#"{"type":"heartbeat_ack"}"#, &conn, &svc).await.is_none());
    }

    #[tokio::test]
    async fn feedback_applies_to_connection_workflow() {
        let (svc, conn, id, _ends) = setup(true).await;
        let reply = handle_client_text(
            r#"{"type":"feedback","kind":"approval","content":"go"}"#,
            &conn,
            &svc,
        )
        .await;
        assert!(reply.is_none());
        assert_eq!(svc.snapshot(&id).await.unwrap().phase, WorkflowPhase::Requirements);
    }

    #[tokio::test]
    async fn malformed_rating_over_websocket_is_recorded() {
        let (svc, conn, id, _ends) = setup(true).await;
        for rating in ["300", "-1", "4.5"] {
            let text = format!(r#"{{"type":"feedback","kind":"clarification","rating":{rating}}}"#);
            assert!(handle_client_text(&text, &conn, &svc).await.is_none());
        }
        let snap = svc.snapshot(&id).await.unwrap();
        assert_eq!(snap.feedback_history.len(), 3);
        assert!(snap.feedback_history.iter().all(|e| e.rating.is_none()));
        assert_eq!(snap.phase, WorkflowPhase::Initialization);
    }

    #[tokio::test]
    async fn feedback_for_unknown_workflow_is_not_found() {
        let (svc, conn, _, _ends) = setup(false).await;
        let reply = handle_client_text(r#"{"type":"feedback","kind":"approval"}"#, &conn, &svc)
            .await
            .unwrap();
        assert_eq!(error_code(&reply), "not_found");
    }

    #[tokio::test]
    async fn request_state_returns_snapshot() {
        let (svc, conn, id, _ends) = setup(true).await;
        let reply = handle_client_text(r#"{"type":"request_state"}"#, &conn, &svc)
            .await
            .unwrap();
        match reply.payload {
            MessagePayload::StateRecovery { workflow } => assert_eq!(workflow.id, id),
            other => panic!("expected state_recovery, got {}", other.kind()),
        }
    }
}
