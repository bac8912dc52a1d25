#![allow(clippy::unwrap_used)]
// End-to-end tests for `Client` against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use atmlink_core::{Client, ClientConfig, NotificationLevel, ReconnectConfig, ShapeKind};

// ── Helpers ─────────────────────────────────────────────────────────

type ServerSocket = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = ClientConfig::new(Url::parse(&format!("ws://{addr}/ws")).unwrap());
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 0,
    };
    config.heartbeat_interval = Duration::from_secs(60);
    (listener, config)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn send(ws: &mut ServerSocket, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data });
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next text frame from the client, decoded.
async fn recv_json(ws: &mut ServerSocket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                return serde_json::from_str::<Value>(text.as_str()).unwrap();
            }
        }
    })
    .await
    .expect("timed out waiting for client frame")
}

/// Poll `cond` until it holds or five seconds pass.
async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_session_flow() {
    let (listener, config) = bind().await;
    let client = Client::new(config);
    client.connect().await.unwrap();

    let mut ws = accept(&listener).await;
    client
        .wait_for_transport(Duration::from_secs(5))
        .await
        .unwrap();

    // The client asks for the topology as soon as it connects.
    assert_eq!(recv_json(&mut ws).await, json!({"event": "get_nodes"}));

    send(
        &mut ws,
        "initial_data",
        json!({
            "node_info": {"nodes": {"n1": {"node_num": 1}}, "active_node": "n1"},
            "sim_data": {"simt": 30.0, "ntraf": 1, "state": 2, "scenname": "DEMO"},
            "traffic_data": {"id": ["KL204"], "lat": [52.3], "lon": [4.76]},
            "poly_data": {"polys": {"CTR": {"lat": [52.0, 52.5, 52.5], "lon": [4.5, 4.5, 5.0]}}},
            "polyline_data": {},
            "cmddict": {"HOLD": "Pause the simulation"},
        }),
    )
    .await;

    client.wait_for_sim(Duration::from_secs(5)).await.unwrap();
    let store = client.store();
    eventually(|| store.entity_batch.get().is_some()).await;

    let snap = store.snapshot();
    assert!(snap.transport_connected);
    assert!(snap.sim_connected);
    assert!(snap.receiving_data);
    assert_eq!(snap.active_context_id.as_deref(), Some("n1"));
    assert_eq!(snap.sim_info.unwrap().scenario, "DEMO");
    assert_eq!(snap.shapes.len(), 1);
    assert_eq!(snap.shapes[0].kind(), ShapeKind::Polygon);
    assert_eq!(snap.shapes[0].context_id.as_deref(), Some("n1"));

    assert!(client.send_command("  HOLD  "));
    assert_eq!(
        recv_json(&mut ws).await,
        json!({"event": "command", "data": {"command": "HOLD"}})
    );

    assert!(client.set_active_context("n2"));
    assert_eq!(
        recv_json(&mut ws).await,
        json!({"event": "set_active_node", "data": {"node_id": "n2"}})
    );

    client.disconnect().await;
    assert!(!client.is_connected());
    assert!(!client.send_command("OP"));
    assert!(!client.tracker().snapshot().transport_connected);
}

#[tokio::test]
async fn test_server_close_resets_simulation_state() {
    let (listener, config) = bind().await;
    let client = Client::new(config);
    client.connect().await.unwrap();

    let mut ws = accept(&listener).await;
    client
        .wait_for_transport(Duration::from_secs(5))
        .await
        .unwrap();
    send(&mut ws, "siminfo", json!({"simt": 1.0})).await;
    send(&mut ws, "poly", json!({"name": "A", "lat": [1.0], "lon": [1.0]})).await;
    client.wait_for_sim(Duration::from_secs(5)).await.unwrap();
    let store = client.store();
    eventually(|| store.shapes.len() == 1).await;

    ws.close(None).await.unwrap();
    drop(ws);

    eventually(|| !client.tracker().snapshot().transport_connected).await;
    let snap = store.snapshot();
    assert!(!snap.sim_connected);
    assert!(!snap.receiving_data);
    assert!(snap.sim_info.is_none());
    assert!(snap.shapes.is_empty());

    client.disconnect().await;
}

#[tokio::test]
async fn test_command_result_becomes_notification() {
    let (listener, config) = bind().await;
    let client = Client::new(config);
    let mut notes = client.notifications();
    client.connect().await.unwrap();

    let mut ws = accept(&listener).await;
    client
        .wait_for_transport(Duration::from_secs(5))
        .await
        .unwrap();
    send(
        &mut ws,
        "command_result",
        json!({"success": false, "command": "CRE"}),
    )
    .await;

    let note = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let note = notes.recv().await.unwrap();
            if note.level == NotificationLevel::Error {
                return note;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(note.message, "Command failed: CRE");

    client.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_server_gives_up() {
    let (listener, config) = bind().await;
    drop(listener);
    let client = Client::new(config);
    client.connect().await.unwrap();

    let err = client
        .wait_for_transport(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(
        matches!(err, atmlink_core::CoreError::ConnectionFailed { .. }),
        "{err:?}"
    );
    client.disconnect().await;
}
