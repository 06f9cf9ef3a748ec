//! End-to-end tests against a live server with real WebSocket clients.

use std::time::Duration;

use consult_server::config::ServerConfig;
use consult_server::metrics::detached_handle;
use consult_server::server::ConsultServer;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    server: ConsultServer,
    base: String,
    ws_base: String,
    http: reqwest::Client,
}

impl TestServer {
    async fn create_workflow(&self) -> String {
        let body: Value = self
            .http
            .post(format!("{}/workflows", self.base))
            .json(&json!({"sessionId": "S1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["id"].as_str().unwrap().to_owned()
    }

    async fn feedback(&self, workflow_id: &str, body: Value) -> reqwest::Response {
        self.http
            .post(format!("{}/workflows/{workflow_id}/feedback", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn connect(&self, workflow_id: &str) -> WsStream {
        let (ws, _) = connect_async(format!("{}/ws/{workflow_id}", self.ws_base))
            .await
            .unwrap();
        ws
    }
}

async fn boot(config: ServerConfig) -> TestServer {
    let server = ConsultServer::new(
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..config
        },
        detached_handle(),
    );
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        server,
        base: format!("http://{addr}"),
        ws_base: format!("ws://{addr}"),
        http: reqwest::Client::new(),
    }
}

async fn boot_default() -> TestServer {
    boot(ServerConfig::default()).await
}

/// Read the next text message as JSON, skipping heartbeats.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] != "heartbeat" {
                return value;
            }
        }
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn ack_then_state_recovery_on_connect() {
    let t = boot_default().await;
    let id = t.create_workflow().await;
    let mut ws = t.connect(&id).await;

    let ack = read_json(&mut ws).await;
    assert_eq!(ack["type"], "connection_ack");
    assert_eq!(ack["workflowId"], id.as_str());
    assert!(ack["data"]["connectionId"].is_string());
    assert!(ack["timestamp"].is_string());

    let recovery = read_json(&mut ws).await;
    assert_eq!(recovery["type"], "state_recovery");
    assert_eq!(recovery["data"]["workflow"]["phase"], "initialization");

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn feedback_reaches_every_observer_in_order() {
    let t = boot_default().await;
    let id = t.create_workflow().await;
    let mut a = t.connect(&id).await;
    let mut b = t.connect(&id).await;
    for ws in [&mut a, &mut b] {
        let _ = read_json(ws).await;
        let _ = read_json(ws).await;
    }

    for _ in 0..3 {
        let resp = t.feedback(&id, json!({"kind": "approval"})).await;
        assert!(resp.status().is_success());
    }

    for ws in [&mut a, &mut b] {
        let mut seen = Vec::new();
        for _ in 0..3 {
            let msg = read_json(ws).await;
            assert_eq!(msg["type"], "phase_change");
            seen.push(msg["data"]["progressPercentage"].as_u64().unwrap());
        }
        assert_eq!(seen, vec![20, 40, 60]);
    }

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn feedback_over_websocket_is_broadcast() {
    let t = boot_default().await;
    let id = t.create_workflow().await;
    let mut ws = t.connect(&id).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    send_json(&mut ws, json!({"type": "feedback", "kind": "clarification", "content": "why?"})).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "progress_update");
    assert_eq!(msg["data"]["phase"], "initialization");

    send_json(&mut ws, json!({"type": "feedback", "kind": "approval"})).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "phase_change");
    assert_eq!(msg["data"]["oldPhase"], "initialization");
    assert_eq!(msg["data"]["newPhase"], "requirements");

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn reconnect_recovers_latest_state() {
    let t = boot_default().await;
    let id = t.create_workflow().await;
    {
        let mut ws = t.connect(&id).await;
        let _ = read_json(&mut ws).await;
        let _ = read_json(&mut ws).await;
        ws.close(None).await.unwrap();
    }

    let _ = t.feedback(&id, json!({"kind": "approval"})).await;
    let _ = t.feedback(&id, json!({"kind": "approval", "rating": 5})).await;

    let mut ws = t.connect(&id).await;
    let _ = read_json(&mut ws).await;
    let recovery = read_json(&mut ws).await;
    assert_eq!(recovery["type"], "state_recovery");
    let workflow = &recovery["data"]["workflow"];
    assert_eq!(workflow["phase"], "architecture");
    assert_eq!(workflow["progressPercentage"], 40);
    assert_eq!(workflow["feedbackHistory"].as_array().unwrap().len(), 2);

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn unknown_workflow_gets_ack_only() {
    let t = boot_default().await;
    let mut ws = t.connect("wf_missing").await;
    let ack = read_json(&mut ws).await;
    assert_eq!(ack["type"], "connection_ack");

    send_json(&mut ws, json!({"type": "request_state"})).await;
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"]["code"], "not_found");

    let resp = t.feedback("wf_missing", json!({"kind": "approval"})).await;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn ping_and_invalid_frames_reply_to_sender() {
    let t = boot_default().await;
    let id = t.create_workflow().await;
    let mut ws = t.connect(&id).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    send_json(&mut ws, json!({"type": "ping"})).await;
    let reply = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected text frame");
    };
    let reply: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(reply["type"], "heartbeat");

    ws.send(Message::text("{not json")).await.unwrap();
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"]["code"], "invalid_message");

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn phase_output_is_broadcast() {
    let t = boot_default().await;
    let id = t.create_workflow().await;
    let mut ws = t.connect(&id).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    let resp = t
        .http
        .put(format!("{}/workflows/{id}/outputs/requirements", t.base))
        .json(&json!({"items": ["latency"]}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "workflow_update");
    assert_eq!(msg["data"]["outputKey"], "requirements");
    assert_eq!(msg["data"]["output"]["items"][0], "latency");

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn connection_limit_refuses_upgrade() {
    let t = boot(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let id = t.create_workflow().await;
    let mut first = t.connect(&id).await;
    let _ = read_json(&mut first).await;

    let second = connect_async(format!("{}/ws/{id}", t.ws_base)).await;
    assert!(second.is_err());

    let stats: Value = t
        .http
        .get(format!("{}/connections?workflowId={id}", t.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalConnections"], 1);
    assert_eq!(stats["connections"], 1);

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn silent_observer_is_evicted() {
    let t = boot(ServerConfig {
        heartbeat_interval_secs: 1,
        cleanup_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    })
    .await;
    let id = t.create_workflow().await;
    let mut ws = t.connect(&id).await;

    let closed = timeout(Duration::from_secs(10), async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "observer was never evicted");
    assert_eq!(t.server.service().registry().count(), 0);

    t.server.shutdown().shutdown();
}

#[tokio::test]
async fn health_reports_counts() {
    let t = boot_default().await;
    let _ = t.create_workflow().await;
    let body: Value = t
        .http
        .get(format!("{}/health", t.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["workflows"], 1);

    t.server.shutdown().shutdown();
}
