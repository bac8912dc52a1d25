#![allow(clippy::unwrap_used)]
// Integration tests for `WebSocketHandle` against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use atmlink_api::protocol::OutboundMessage;
use atmlink_api::{InboundMessage, ReconnectConfig, TransportEvent, WebSocketHandle};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts,
    }
}

fn ws_url(listener: &TcpListener) -> Url {
    let addr = listener.local_addr().unwrap();
    Url::parse(&format!("ws://{addr}/ws")).unwrap()
}

/// Wait for the next event matching `pred`, skipping others.
async fn next_matching(
    rx: &mut broadcast::Receiver<TransportEvent>,
    pred: impl Fn(&TransportEvent) -> bool,
) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for transport event")
}

fn start(url: Url, reconnect: ReconnectConfig) -> (WebSocketHandle, broadcast::Receiver<TransportEvent>) {
    let (tx, rx) = broadcast::channel(64);
    let handle = WebSocketHandle::connect(url, reconnect, CancellationToken::new(), tx).unwrap();
    (handle, rx)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_receives_decoded_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = ws_url(&listener);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let frame = json!({
            "event": "siminfo",
            "data": { "simt": 12.5, "ntraf": 4, "scenname": "DEMO" }
        });
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        // Keep the connection open until the client goes away.
        while ws.next().await.is_some() {}
    });

    let (handle, mut rx) = start(url, fast_reconnect(0));

    next_matching(&mut rx, |e| matches!(e, TransportEvent::Connected)).await;
    assert!(handle.is_connected());

    let TransportEvent::Message(msg) =
        next_matching(&mut rx, |e| matches!(e, TransportEvent::Message(_))).await
    else {
        unreachable!()
    };
    let InboundMessage::SimInfo(info) = msg.as_ref() else {
        panic!("expected siminfo, got {msg:?}");
    };
    assert_eq!(info.ntraf, 4);
    assert_eq!(info.scenname, "DEMO");

    handle.shutdown();
}

#[tokio::test]
async fn test_outbound_messages_reach_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = ws_url(&listener);
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Text(text) = frame {
                seen_tx.send(serde_json::from_str(text.as_str()).unwrap()).unwrap();
            }
        }
    });

    let (handle, mut rx) = start(url, fast_reconnect(0));
    next_matching(&mut rx, |e| matches!(e, TransportEvent::Connected)).await;

    assert!(handle.send(OutboundMessage::Command {
        command: "CRE KL204 B744 52 4 90 FL100 250".into(),
    }));
    assert!(handle.send(OutboundMessage::SetActiveNode {
        node_id: "node-2".into(),
    }));

    let first = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        first,
        json!({ "event": "command", "data": { "command": "CRE KL204 B744 52 4 90 FL100 250" } })
    );
    let second = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        second,
        json!({ "event": "set_active_node", "data": { "node_id": "node-2" } })
    );

    handle.shutdown();
}

#[tokio::test]
async fn test_send_while_disconnected_returns_false() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = ws_url(&listener);
    drop(listener);

    let (handle, _rx) = start(url, fast_reconnect(0));

    assert!(!handle.is_connected());
    assert!(!handle.send(OutboundMessage::GetNodes));

    handle.shutdown();
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = ws_url(&listener);
    drop(listener);

    let (handle, mut rx) = start(url, fast_reconnect(2));

    let mut attempts = Vec::new();
    let failed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await.unwrap() {
                TransportEvent::Connecting { attempt } => attempts.push(attempt),
                TransportEvent::Failed { attempts: n } => return n,
                other => panic!("unexpected event {other:?}"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts, vec![0, 1, 2]);
    assert_eq!(failed, 2);
    assert_eq!(handle.reconnect_attempts(), 2);
}

#[tokio::test]
async fn test_reconnects_and_resets_attempt_counter() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = ws_url(&listener);

    tokio::spawn(async move {
        // First connection: accept and close straight away.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        // Second connection: stay up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let (handle, mut rx) = start(url, fast_reconnect(3));

    next_matching(&mut rx, |e| matches!(e, TransportEvent::Connected)).await;
    next_matching(&mut rx, |e| matches!(e, TransportEvent::Disconnected { .. })).await;
    let reconnecting =
        next_matching(&mut rx, |e| matches!(e, TransportEvent::Connecting { .. })).await;
    assert!(matches!(reconnecting, TransportEvent::Connecting { attempt: 1 }));

    next_matching(&mut rx, |e| matches!(e, TransportEvent::Connected)).await;
    assert!(handle.is_connected());
    assert_eq!(handle.reconnect_attempts(), 0);

    handle.shutdown();
}

#[tokio::test]
async fn test_shutdown_reports_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = ws_url(&listener);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let (handle, mut rx) = start(url, fast_reconnect(3));
    next_matching(&mut rx, |e| matches!(e, TransportEvent::Connected)).await;

    handle.shutdown();

    let event =
        next_matching(&mut rx, |e| matches!(e, TransportEvent::Disconnected { .. })).await;
    assert!(matches!(event, TransportEvent::Disconnected { ref reason } if reason == "client shutdown"));
    assert!(!handle.is_connected());
}
