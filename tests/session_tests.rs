use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use tick_digits::client::{FeedClient, FeedOptions};
use tick_digits::deriv::{api, FrameSender, SessionConfig, SessionEvent, WsSession};
use tick_digits::error::AppError;
use tick_digits::event::{AppEvent, WsConnectionStatus};

/// Replies to one inbound request; `true` hangs up after sending them.
type Handler = fn(&Value) -> (Vec<Value>, bool);

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_server(handler: Handler, drop_first: bool) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let count = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(stream, handler, drop_first && index == 0));
        }
    });
    (format!("ws://{}", addr), connections)
}

async fn serve(stream: TcpStream, handler: Handler, close_immediately: bool) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    if close_immediately {
        let _ = ws.close(None).await;
        return;
    }
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let (replies, hang_up) = handler(&frame);
        for reply in replies {
            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
        if hang_up {
            let _ = ws.close(None).await;
            return;
        }
    }
}

fn echo(frame: &Value) -> (Vec<Value>, bool) {
    (vec![frame.clone()], false)
}

fn history_frame(request: &Value, prices: &[f64]) -> Value {
    let times: Vec<u64> = (0..prices.len() as u64).map(|i| 1_700_000_000 + i).collect();
    json!({
        "msg_type": "history",
        "echo_req": request,
        "history": {"prices": prices, "times": times},
        "subscription": {"id": "sub-1"}
    })
}

fn tick_frame(request: &Value, symbol: &str, epoch: u64, quote: f64) -> Value {
    json!({
        "msg_type": "tick",
        "echo_req": request,
        "tick": {"symbol": symbol, "epoch": epoch, "quote": quote},
        "subscription": {"id": "sub-1"}
    })
}

fn deriv_like(frame: &Value) -> (Vec<Value>, bool) {
    if let Some(symbol) = frame.get("ticks_history").and_then(Value::as_str) {
        return (vec![
            json!({
                "msg_type": "history",
                "echo_req": frame,
                "history": {
                    "prices": [1.230, 1.231, 1.229],
                    "times": [1_700_000_000u64, 1_700_000_001u64, 1_700_000_002u64]
                },
                "subscription": {"id": "sub-1"}
            }),
            json!({
                "msg_type": "tick",
                "echo_req": frame,
                "tick": {"symbol": symbol, "epoch": 1_700_000_003u64, "quote": 1.232},
                "subscription": {"id": "sub-1"}
            }),
        ], false);
    }
    if frame.get("ping").is_some() {
        return (
            vec![json!({
                "msg_type": "ping",
                "echo_req": frame,
                "req_id": frame["req_id"],
                "ping": "pong"
            })],
            false,
        );
    }
    (Vec::new(), false)
}

fn hang_up_on_ping(frame: &Value) -> (Vec<Value>, bool) {
    (Vec::new(), frame.get("ping").is_some())
}

/// Snapshot plus a long burst of ticks, then the connection drops.
fn burst_then_hang_up(frame: &Value) -> (Vec<Value>, bool) {
    let Some(symbol) = frame.get("ticks_history").and_then(Value::as_str) else {
        return (Vec::new(), false);
    };
    let mut replies = vec![history_frame(frame, &[1.01, 1.02, 1.03])];
    for i in 0..400u64 {
        let quote = 1.0 + (i % 100) as f64 / 100.0;
        replies.push(tick_frame(frame, symbol, 1_700_000_100 + i, quote));
    }
    (replies, true)
}

fn session_config(url: String) -> SessionConfig {
    SessionConfig {
        url,
        reconnect_delay: Duration::from_millis(50),
        ping_interval: Duration::from_secs(30),
    }
}

async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("session event channel closed")
}

async fn expect_states(rx: &mut mpsc::Receiver<SessionEvent>, states: &[WsConnectionStatus]) {
    for expected in states {
        let event = loop {
            match next_event(rx).await {
                SessionEvent::Closed { .. } => continue,
                event => break event,
            }
        };
        assert_eq!(event, SessionEvent::State(*expected));
    }
}

#[tokio::test]
/// Verifies automatic reconnection: a dropped connection is reported and
/// re-established, and frames flow on the new connection.
async fn session_reconnects_after_server_drop() {
    use WsConnectionStatus::*;
    let (url, connections) = spawn_server(echo, true).await;
    let (tx, mut rx) = mpsc::channel(64);
    let session = WsSession::spawn(session_config(url), tx);
    let handle = session.handle();

    expect_states(&mut rx, &[Connecting, Connected]).await;
    assert_eq!(next_event(&mut rx).await, SessionEvent::Closed { generation: 1 });
    expect_states(&mut rx, &[Disconnected, Connecting, Connected]).await;
    assert!(handle.is_connected());
    assert_eq!(handle.generation(), 2);
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    handle.send_frame(r#"{"echo":1}"#.to_string()).unwrap();
    match next_event(&mut rx).await {
        SessionEvent::Frame(text) => {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame, json!({"echo": 1}));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    session.shutdown().await;
    expect_states(&mut rx, &[Disconnected]).await;
}

#[tokio::test]
/// Verifies a forced reconnect drops the live connection and dials again.
async fn forced_reconnect_cycles_connection() {
    use WsConnectionStatus::*;
    let (url, connections) = spawn_server(echo, false).await;
    let (tx, mut rx) = mpsc::channel(64);
    let session = WsSession::spawn(session_config(url), tx);
    let handle = session.handle();

    expect_states(&mut rx, &[Connecting, Connected]).await;
    handle.reconnect().unwrap();
    expect_states(&mut rx, &[Disconnected, Connecting, Connected]).await;
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    session.shutdown().await;
}

#[tokio::test]
/// Verifies shutdown is terminal: a final Disconnected is reported and the
/// event stream ends.
async fn shutdown_closes_event_stream() {
    use WsConnectionStatus::*;
    let (url, _) = spawn_server(echo, false).await;
    let (tx, mut rx) = mpsc::channel(64);
    let session = WsSession::spawn(session_config(url), tx);
    let handle = session.handle();

    expect_states(&mut rx, &[Connecting, Connected]).await;
    session.shutdown().await;
    expect_states(&mut rx, &[Disconnected]).await;
    assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
    assert!(!handle.is_connected());
    assert!(matches!(handle.reconnect(), Err(AppError::SessionClosed)));
}

#[tokio::test]
/// Verifies sending while no connection is open fails instead of queueing.
async fn send_while_disconnected_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, _rx) = mpsc::channel(64);
    let session = WsSession::spawn(session_config(format!("ws://{}", addr)), tx);
    let handle = session.handle();
    let result = handle.send_frame("{}".to_string());
    assert!(matches!(result, Err(AppError::NotConnected)));
    session.shutdown().await;
}

fn feed_options() -> FeedOptions {
    FeedOptions {
        symbol: "R_100".to_string(),
        capacity: 10,
        reference_digit: Some(5),
        recent_digits: 3,
        request_timeout: Some(WAIT),
    }
}

#[tokio::test]
/// Verifies the end-to-end path: connect, subscribe, apply snapshot and
/// increment, and serve a correlated call on the same socket.
async fn feed_client_streams_ticks_and_correlates_calls() {
    let (url, _) = spawn_server(deriv_like, false).await;
    let (client, mut events) = FeedClient::start(session_config(url), feed_options()).unwrap();

    let mut saw_connected = false;
    let update = loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for feed update")
            .expect("event channel closed");
        match event {
            AppEvent::WsStatus(WsConnectionStatus::Connected) => saw_connected = true,
            AppEvent::FeedUpdate(update) if update.snapshot.ticks.len() == 4 => break update,
            _ => {}
        }
    };
    assert!(saw_connected);
    assert_eq!(update.snapshot.symbol, "R_100");
    assert_eq!(update.snapshot.decimal_places, 3);
    assert_eq!(update.stats.current_digit, Some(2));
    assert_eq!(update.stats.recent_digits, vec![1, 9, 2]);
    assert!((update.stats.distribution[9] - 25.0).abs() < 1e-9);
    let cmp = update.stats.comparison.unwrap();
    assert!((cmp.over - 25.0).abs() < 1e-9);
    assert!((cmp.under - 75.0).abs() < 1e-9);

    api::ping(&client.correlator()).await.unwrap();
    assert_eq!(client.correlator().pending_count(), 0);

    client.shutdown().await;
}

#[tokio::test]
/// Verifies a call in flight when the connection drops is rejected rather
/// than left hanging.
async fn pending_call_fails_when_connection_drops() {
    let (url, _) = spawn_server(hang_up_on_ping, false).await;
    let mut options = feed_options();
    options.request_timeout = None;
    let (client, mut events) = FeedClient::start(session_config(url), options).unwrap();

    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if matches!(event, AppEvent::WsStatus(WsConnectionStatus::Connected)) {
            break;
        }
    }

    let result = timeout(WAIT, client.call("ping", json!({"ping": 1})))
        .await
        .expect("call was left hanging");
    assert!(matches!(result, Err(AppError::ConnectionLost { .. })));

    client.shutdown().await;
}

#[tokio::test]
/// Verifies invalid consumer arguments are rejected synchronously.
async fn feed_client_validates_arguments() {
    let (url, _) = spawn_server(deriv_like, false).await;
    let (client, _events) = FeedClient::start(session_config(url), feed_options()).unwrap();

    assert!(matches!(client.subscribe("", 10), Err(AppError::InvalidArgument(_))));
    assert!(matches!(client.subscribe("R_50", 0), Err(AppError::InvalidArgument(_))));
    assert!(matches!(client.change_symbol("   "), Err(AppError::InvalidArgument(_))));
    assert!(matches!(client.select_digit(Some(10)), Err(AppError::InvalidArgument(_))));
    assert!(client.select_digit(None).is_ok());

    client.shutdown().await;
}

#[tokio::test]
/// Verifies a silent upstream is detected: with no inbound traffic (not even
/// pongs) for two ping intervals the connection is dropped and redialled.
async fn silent_connection_is_dropped() {
    use WsConnectionStatus::*;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                // never polled again, so pings go unanswered
                held.push(ws);
            }
        }
    });

    let config = SessionConfig {
        url: format!("ws://{}", addr),
        reconnect_delay: Duration::from_millis(50),
        ping_interval: Duration::from_millis(100),
    };
    let (tx, mut rx) = mpsc::channel(64);
    let session = WsSession::spawn(config, tx);

    expect_states(&mut rx, &[Connecting, Connected, Disconnected, Connecting, Connected]).await;
    session.shutdown().await;
}

#[tokio::test]
/// Verifies a consumer that falls behind still sees every connectivity change,
/// while window updates collapse to the newest one.
async fn slow_consumer_keeps_status_events() {
    let (url, _) = spawn_server(burst_then_hang_up, false).await;
    let config = SessionConfig {
        reconnect_delay: Duration::from_secs(30),
        ..session_config(url)
    };
    let (client, mut events) = FeedClient::start(config, feed_options()).unwrap();

    let mut status = client.connection_status();
    timeout(WAIT, status.wait_for(|s| *s == WsConnectionStatus::Disconnected))
        .await
        .expect("connection never dropped")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut statuses = Vec::new();
    let mut updates = 0usize;
    let mut last_update = None;
    while statuses.len() < 3 {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            AppEvent::WsStatus(s) => statuses.push(s),
            AppEvent::FeedUpdate(update) => {
                updates += 1;
                last_update = Some(update);
            }
            AppEvent::SubscriptionError { message, .. } => panic!("unexpected error: {}", message),
        }
    }
    assert_eq!(
        statuses,
        vec![
            WsConnectionStatus::Connecting,
            WsConnectionStatus::Connected,
            WsConnectionStatus::Disconnected,
        ]
    );

    let latest = match last_update {
        Some(update) => update,
        None => events.latest_update().expect("no window update"),
    };
    assert!(updates <= 1);
    assert_eq!(latest.snapshot.ticks.len(), 10);
    assert_eq!(latest.snapshot.ticks.last().map(|t| t.epoch), Some(1_700_000_499));

    client.shutdown().await;
}
