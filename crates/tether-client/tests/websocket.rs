//! End-to-end tests against a real axum WebSocket server.

use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::Level;

use tether_client::{
    ConnectionHandle, ConnectionSupervisor, HeartbeatConfig, SupervisorConfig, Transport,
    TransportOptions, WsTransport,
};
use tether_core::logging::capture_logs;
use tether_core::{ConnectionEvent, ConnectionState};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side socket lifecycle, as seen by the test server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SocketEvent {
    Opened,
    Closed,
}

#[derive(Clone)]
struct ServerState {
    sockets: mpsc::UnboundedSender<SocketEvent>,
    handshake_delay: Option<Duration>,
}

/// Boot an echo server: answers `ping` with `pong`, echoes every other
/// event back, replies to `garbage` with a non-JSON frame, and drops the
/// socket on `kick`.
async fn boot_server() -> String {
    boot_server_with(None).await.0
}

/// Like [`boot_server`], optionally holding each upgrade response for
/// `handshake_delay`, and reporting socket opens and closes.
async fn boot_server_with(
    handshake_delay: Option<Duration>,
) -> (String, mpsc::UnboundedReceiver<SocketEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = ServerState {
        sockets: tx,
        handshake_delay,
    };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    }));
    (format!("ws://{addr}/ws"), rx)
}

async fn ws_handler(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    if let Some(delay) = state.handshake_delay {
        tokio::time::sleep(delay).await;
    }
    ws.on_upgrade(move |socket| async move {
        let _ = state.sockets.send(SocketEvent::Opened);
        handle_socket(socket).await;
        let _ = state.sockets.send(SocketEvent::Closed);
    })
}

async fn handle_socket(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let event = frame["event"].as_str().unwrap_or_default();
        let reply = match event {
            "ping" => json!({"event": "pong", "payload": frame["payload"]}).to_string(),
            "garbage" => "not a json frame".to_string(),
            "kick" => return,
            _ => json!({"event": event, "payload": frame["payload"]}).to_string(),
        };
        if socket.send(Message::Text(reply.into())).await.is_err() {
            return;
        }
    }
}

/// Collect socket events until the server has been quiet for a while.
/// Returns `(opened, closed)`.
async fn settle_sockets(sockets: &mut mpsc::UnboundedReceiver<SocketEvent>) -> (usize, usize) {
    let (mut opened, mut closed) = (0, 0);
    while let Ok(Some(event)) = timeout(Duration::from_millis(500), sockets.recv()).await {
        match event {
            SocketEvent::Opened => opened += 1,
            SocketEvent::Closed => closed += 1,
        }
    }
    (opened, closed)
}

fn config(url: String) -> SupervisorConfig {
    SupervisorConfig {
        url,
        transport: TransportOptions {
            reconnection: true,
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_millis(50),
            reconnection_delay_max: Duration::from_millis(200),
            send_buffer: 64,
        },
        heartbeat: HeartbeatConfig {
            interval: Duration::from_millis(200),
            timeout: Duration::from_millis(100),
            high_latency_threshold: Duration::from_millis(1_000),
        },
        max_reconnect_attempts: 5,
        force_reconnect_on_timeout: false,
    }
}

async fn connect(url: String) -> ConnectionHandle {
    let handle = ConnectionSupervisor::spawn(config(url), WsTransport::new()).unwrap();
    handle.connect();
    timeout(TIMEOUT, handle.wait_for_state(ConnectionState::Connected))
        .await
        .expect("connect timed out")
        .unwrap();
    handle
}

async fn wait_for_event<F>(rx: &mut broadcast::Receiver<ConnectionEvent>, pred: F) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    timeout(TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("event not observed")
}

#[tokio::test]
async fn connects_and_heartbeat_is_acknowledged() {
    let url = boot_server().await;
    let handle = ConnectionSupervisor::spawn(config(url), WsTransport::new()).unwrap();
    let mut events = handle.events();
    handle.connect();

    let _ = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::StateChanged { to: ConnectionState::Connected, .. })
    })
    .await;
    let _ = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::HeartbeatSent { .. })).await;
    let _ = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::HeartbeatAcknowledged { .. })
    })
    .await;

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.state, ConnectionState::Connected);
    assert_eq!(snap.attempts, 0);
    assert!(snap.heartbeat_running);
}

#[tokio::test]
async fn emitted_events_reach_subscribers() {
    let url = boot_server().await;
    let handle = connect(url).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = handle.subscribe("echo", move |payload| {
        let _ = tx.send(payload.clone());
    });

    handle.emit("echo", json!({"text": "hello"}));
    let payload = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload["text"], "hello");
}

#[tokio::test]
async fn server_drop_reconnects_and_keeps_subscriptions() {
    let url = boot_server().await;
    let handle = connect(url).await;
    let mut events = handle.events();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = handle.subscribe("echo", move |payload| {
        let _ = tx.send(payload.clone());
    });

    handle.emit("kick", Value::Null);
    let _ = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::StateChanged { to: ConnectionState::Reconnecting, .. })
    })
    .await;
    let _ = wait_for_event(&mut events, |e| {
        matches!(
            e,
            ConnectionEvent::StateChanged {
                from: ConnectionState::Reconnecting,
                to: ConnectionState::Connected,
            }
        )
    })
    .await;

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.attempts, 0);
    assert!(snap.heartbeat_running);

    handle.emit("echo", json!({"n": 2}));
    let payload = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload["n"], 2);
}

#[tokio::test]
async fn unreachable_endpoint_fails_after_budget() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut cfg = config(format!("ws://127.0.0.1:{port}/ws"));
    cfg.max_reconnect_attempts = 3;
    cfg.transport.reconnection_attempts = 3;
    cfg.transport.reconnection_delay = Duration::from_millis(10);
    cfg.transport.reconnection_delay_max = Duration::from_millis(20);

    let handle = ConnectionSupervisor::spawn(cfg, WsTransport::new()).unwrap();
    let mut events = handle.events();
    handle.connect();

    timeout(TIMEOUT, handle.wait_for_state(ConnectionState::Failed))
        .await
        .expect("never failed")
        .unwrap();
    let exhausted = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::RetryExhausted { .. })
    })
    .await;
    assert_eq!(exhausted, ConnectionEvent::RetryExhausted { attempts: 3 });

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.attempts, 3);
    assert!(!snap.has_transport);
}

#[tokio::test]
async fn disconnect_stops_heartbeat() {
    let url = boot_server().await;
    let handle = connect(url).await;
    handle.disconnect();
    timeout(TIMEOUT, handle.wait_for_state(ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    let snap = handle.snapshot().await.unwrap();
    assert!(!snap.has_transport);
    assert!(!snap.heartbeat_running);

    let mut events = handle.events();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn undecodable_frame_is_reported_and_connection_survives() {
    let (logs, _guard) = capture_logs();
    let url = boot_server().await;
    let handle = connect(url).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = handle.subscribe("echo", move |payload| {
        let _ = tx.send(payload.clone());
    });

    handle.emit("garbage", Value::Null);
    handle.emit("echo", json!({"n": 1}));
    let payload = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload["n"], 1);

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.state, ConnectionState::Connected);
    assert_eq!(snap.attempts, 0);
    assert!(snap.has_transport);
    assert!(logs.has_event(Level::WARN, "transport error"));
}

#[tokio::test]
async fn link_closed_mid_handshake_never_opens() {
    let (url, mut sockets) = boot_server_with(Some(Duration::from_millis(200))).await;
    let options = config(url.clone()).transport;
    let mut link = WsTransport::new().open(&url, &options);

    tokio::time::sleep(Duration::from_millis(50)).await;
    link.close();

    let next = timeout(TIMEOUT, link.next_notification())
        .await
        .expect("notification stream did not end");
    assert_eq!(next, None);

    let (opened, closed) = settle_sockets(&mut sockets).await;
    assert_eq!(opened, closed, "server kept a socket open");
}

#[tokio::test]
async fn disconnect_during_connect_never_reaches_connected() {
    let (url, mut sockets) = boot_server_with(Some(Duration::from_millis(200))).await;
    let handle = ConnectionSupervisor::spawn(config(url), WsTransport::new()).unwrap();
    let mut events = handle.events();

    handle.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), ConnectionState::Connecting);
    handle.disconnect();
    timeout(TIMEOUT, handle.wait_for_state(ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    let (opened, closed) = settle_sockets(&mut sockets).await;
    assert_eq!(opened, closed, "server kept a socket open");

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.state, ConnectionState::Disconnected);
    assert!(!snap.has_transport);
    assert!(!snap.heartbeat_running);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                ConnectionEvent::StateChanged { to: ConnectionState::Connected, .. }
                    | ConnectionEvent::HeartbeatSent { .. }
            ),
            "unexpected {event:?}"
        );
    }
}

#[tokio::test]
async fn immediate_disconnect_closes_every_server_socket() {
    let (url, mut sockets) = boot_server_with(None).await;
    for _ in 0..10 {
        let handle = ConnectionSupervisor::spawn(config(url.clone()), WsTransport::new()).unwrap();
        let mut events = handle.events();
        handle.connect();
        handle.disconnect();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.state, ConnectionState::Disconnected);
        assert!(!snap.has_transport);
        tokio::time::sleep(Duration::from_millis(20)).await;
        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, ConnectionEvent::StateChanged { to: ConnectionState::Connected, .. }),
                "unexpected {event:?}"
            );
        }
    }

    let (opened, closed) = settle_sockets(&mut sockets).await;
    assert_eq!(opened, closed, "server kept a socket open");
}
