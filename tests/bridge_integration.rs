//! End-to-end bridge tests
//!
//! Each test runs a real local tokio-tungstenite server and drives an
//! `EventBridge` through its polling API, covering ordering, malformed
//! input, peer close, stop, restart, and connection faults.

use bsevent_bridge::{
    BridgeConfig, ConnectionState, Event, EventBridge, EventRouteTable, Severity, Trigger,
};
use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

/// How the test server ends the conversation after sending its messages
#[derive(Clone, Copy)]
enum Ending {
    /// Send a close frame
    Close,
    /// Wait for the client to close; report it through the oneshot
    AwaitClient,
}

struct TestServer {
    url: String,
    handle: JoinHandle<()>,
    client_closed: Option<oneshot::Receiver<()>>,
}

async fn serve(messages: Vec<String>, ending: Ending) -> TestServer {
    serve_messages(messages.into_iter().map(Message::text).collect(), ending).await
}

async fn serve_messages(messages: Vec<Message>, ending: Ending) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        for message in messages {
            ws.send(message).await.unwrap();
        }

        match ending {
            Ending::Close => {
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
            }
            Ending::AwaitClient => {
                while let Some(msg) = ws.next().await {
                    match msg {
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                let _ = closed_tx.send(());
            }
        }
    });

    TestServer {
        url: format!("ws://{}/socket", addr),
        handle,
        client_closed: Some(closed_rx),
    }
}

fn bridge_for(url: &str) -> EventBridge {
    EventBridge::new(BridgeConfig {
        url: url.to_string(),
        ..Default::default()
    })
    .unwrap()
}

/// Tick the bridge until `n` triggers fired or the timeout elapses
async fn collect_triggers(bridge: &mut EventBridge, n: usize) -> Vec<Trigger> {
    let mut fired = Vec::new();
    let deadline = Instant::now() + TIMEOUT;
    while fired.len() < n && Instant::now() < deadline {
        let mut sink = |t: Trigger, _: &Event| fired.push(t);
        bridge.on_update(Instant::now(), &mut sink);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    fired
}

async fn wait_inactive(bridge: &EventBridge) {
    tokio::time::timeout(TIMEOUT, async {
        while bridge.is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bridge did not stop");
}

fn envelope(event: &str, time: i64) -> String {
    serde_json::json!({ "event": event, "time": time }).to_string()
}

/// Split `text` across `parts` raw frames: one text frame, then continuations
fn fragmented(text: &str, parts: usize) -> Vec<Message> {
    let bytes = text.as_bytes();
    (0..parts)
        .map(|i| {
            let chunk = bytes[i * bytes.len() / parts..(i + 1) * bytes.len() / parts].to_vec();
            let opcode = if i == 0 {
                OpCode::Data(Data::Text)
            } else {
                OpCode::Data(Data::Continue)
            };
            Message::Frame(Frame::message(chunk, opcode, i + 1 == parts))
        })
        .collect()
}

// ─── Scenarios ───────────────────────────────────────────────────

#[tokio::test]
async fn test_note_cut_fires_trigger_once() {
    let server = serve(vec![envelope("noteCut", 1234)], Ending::Close).await;
    let mut bridge = bridge_for(&server.url);
    bridge.start().unwrap();

    let fired = collect_triggers(&mut bridge, 1).await;
    assert_eq!(fired, vec![Trigger::NoteCut]);

    wait_inactive(&bridge).await;
    // Nothing left to fire
    let mut extra = Vec::new();
    let mut sink = |t: Trigger, _: &Event| extra.push(t);
    for _ in 0..5 {
        bridge.on_update(Instant::now(), &mut sink);
    }
    assert!(extra.is_empty());

    server.handle.await.unwrap();
}

#[tokio::test]
async fn test_missing_event_field_is_skipped() {
    let server = serve(
        vec![r#"{"time":1234}"#.to_string(), envelope("menu", 1)],
        Ending::Close,
    )
    .await;
    let mut bridge = bridge_for(&server.url);
    bridge.start().unwrap();

    // Only the valid envelope makes it through
    let fired = collect_triggers(&mut bridge, 1).await;
    assert_eq!(fired, vec![Trigger::Menu]);
    wait_inactive(&bridge).await;
    assert_eq!(bridge.pending(), 0);
}

#[tokio::test]
async fn test_pause_then_resume_in_order() {
    let server = serve(
        vec![envelope("pause", 1), envelope("resume", 2)],
        Ending::Close,
    )
    .await;
    let mut bridge = bridge_for(&server.url);
    bridge.start().unwrap();

    // Let both arrive before ticking: they still drain one per tick
    wait_inactive(&bridge).await;
    assert_eq!(bridge.pending(), 2);

    let mut fired = Vec::new();
    let mut sink = |t: Trigger, _: &Event| fired.push(t);
    assert_eq!(bridge.on_update(Instant::now(), &mut sink), Some(Trigger::Pause));
    assert_eq!(bridge.on_update(Instant::now(), &mut sink), Some(Trigger::Resume));
    assert_eq!(bridge.on_update(Instant::now(), &mut sink), None);
    assert_eq!(fired, vec![Trigger::Pause, Trigger::Resume]);
}

#[tokio::test]
async fn test_peer_close_stops_loop() {
    let server = serve(vec![], Ending::Close).await;
    let bridge = bridge_for(&server.url);
    let mut notes = bridge.subscribe_notifications();

    bridge.start().unwrap();
    assert!(bridge.is_active());
    wait_inactive(&bridge).await;

    assert_eq!(bridge.state(), ConnectionState::Closed);
    assert_eq!(bridge.pending(), 0);

    let mut messages = Vec::new();
    while let Ok(note) = notes.try_recv() {
        assert_eq!(note.severity, Severity::Info);
        messages.push(note.message);
    }
    assert_eq!(
        messages,
        vec!["WebSocket loop started", "WebSocket loop stopped"]
    );
    server.handle.await.unwrap();
}

// ─── Properties ──────────────────────────────────────────────────

#[tokio::test]
async fn test_fragmented_message_is_reassembled() {
    let mut messages = fragmented(&envelope("bombCut", 7), 3);
    messages.push(Message::text(envelope("menu", 8)));
    let server = serve_messages(messages, Ending::Close).await;

    let mut bridge = bridge_for(&server.url);
    bridge.start().unwrap();

    let fired = collect_triggers(&mut bridge, 2).await;
    assert_eq!(fired, vec![Trigger::BombCut, Trigger::Menu]);
}

#[tokio::test]
async fn test_message_over_fragment_cap_is_dropped() {
    let mut messages = fragmented(&envelope("noteCut", 1), 1001);
    // Exactly at the cap still goes through
    messages.extend(fragmented(&envelope("bombCut", 2), 1000));
    messages.push(Message::text(envelope("menu", 3)));
    let server = serve_messages(messages, Ending::Close).await;

    let mut bridge = bridge_for(&server.url);
    bridge.start().unwrap();
    wait_inactive(&bridge).await;

    let mut fired = Vec::new();
    let mut sink = |t: Trigger, _: &Event| fired.push(t);
    while bridge.on_update(Instant::now(), &mut sink).is_some() {}
    assert_eq!(fired, vec![Trigger::BombCut, Trigger::Menu]);
    assert_eq!(bridge.state(), ConnectionState::Closed);
    server.handle.await.unwrap();
}

#[tokio::test]
async fn test_small_fragment_cap_from_config() {
    let mut messages = fragmented(&envelope("noteCut", 1), 5);
    messages.push(Message::text(envelope("pause", 2)));
    let server = serve_messages(messages, Ending::Close).await;

    let mut bridge = EventBridge::new(BridgeConfig {
        url: server.url.clone(),
        max_fragments: 4,
        ..Default::default()
    })
    .unwrap();
    bridge.start().unwrap();

    let fired = collect_triggers(&mut bridge, 1).await;
    assert_eq!(fired, vec![Trigger::Pause]);
}

#[tokio::test]
async fn test_ordering_preserved_for_burst() {
    let names = ["noteCut", "noteMissed", "bombCut", "scoreChanged", "energyChanged"];
    let messages: Vec<String> = (0..200)
        .map(|i| envelope(names[i % names.len()], i as i64))
        .collect();
    let server = serve(messages, Ending::Close).await;

    let mut bridge = bridge_for(&server.url);
    bridge.start().unwrap();

    let mut timestamps = Vec::new();
    let deadline = Instant::now() + TIMEOUT;
    while timestamps.len() < 200 && Instant::now() < deadline {
        let mut sink = |_: Trigger, e: &Event| timestamps.push(e.timestamp());
        if bridge.on_update(Instant::now(), &mut sink).is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    assert_eq!(timestamps, (0..200).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_malformed_json_does_not_end_session() {
    let server = serve(
        vec![
            "{\"event\":".to_string(),
            "plain text".to_string(),
            envelope("hello", 0),
        ],
        Ending::AwaitClient,
    )
    .await;
    let mut bridge = bridge_for(&server.url);
    bridge.start().unwrap();

    let fired = collect_triggers(&mut bridge, 1).await;
    assert_eq!(fired, vec![Trigger::Hello]);
    assert!(bridge.is_active());
    assert_eq!(bridge.state(), ConnectionState::Open);

    bridge.stop();
    wait_inactive(&bridge).await;
}

#[tokio::test]
async fn test_stop_closes_connection() {
    let mut server = serve(vec![], Ending::AwaitClient).await;
    let bridge = bridge_for(&server.url);
    let mut state = bridge.subscribe_state();

    bridge.start().unwrap();
    tokio::time::timeout(TIMEOUT, state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .unwrap()
        .unwrap();

    bridge.stop();
    wait_inactive(&bridge).await;
    assert_eq!(bridge.state(), ConnectionState::Closed);

    let closed = server.client_closed.take().unwrap();
    tokio::time::timeout(TIMEOUT, closed).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_event_routes_to_fallback() {
    let server = serve(vec![envelope("mysteryEvent", 5)], Ending::Close).await;
    let mut bridge = bridge_for(&server.url)
        .with_routes(EventRouteTable::default().with_fallback(Trigger::Other));
    bridge.start().unwrap();

    let fired = collect_triggers(&mut bridge, 1).await;
    assert_eq!(fired, vec![Trigger::Other]);
}

#[tokio::test]
async fn test_status_forwarding() {
    let server = serve(
        vec![r#"{"event":"scoreChanged","time":3,"status":{"performance":{"score":900}}}"#
            .to_string()],
        Ending::Close,
    )
    .await;
    let mut bridge = EventBridge::new(BridgeConfig {
        url: server.url.clone(),
        forward_status: true,
        ..Default::default()
    })
    .unwrap();
    bridge.start().unwrap();
    wait_inactive(&bridge).await;

    let mut status = None;
    let mut sink = |_: Trigger, e: &Event| status = e.status().cloned();
    bridge.on_update(Instant::now(), &mut sink);

    let status = status.expect("status forwarded");
    assert_eq!(status["status"]["performance"]["score"], 900);
}

#[tokio::test]
async fn test_connection_refused_reports_fault() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let bridge = bridge_for(&format!("ws://{}/socket", addr));
    let mut notes = bridge.subscribe_notifications();

    bridge.start().unwrap();
    wait_inactive(&bridge).await;
    assert_eq!(bridge.state(), ConnectionState::Closed);

    let mut errors = Vec::new();
    while let Ok(note) = notes.try_recv() {
        if note.severity == Severity::Error {
            errors.push(note.title);
        }
    }
    assert_eq!(errors, vec!["bsevent::transport"]);
}

#[tokio::test]
async fn test_restart_after_peer_close() {
    let first = serve(vec![envelope("songStart", 1)], Ending::Close).await;
    let mut bridge = bridge_for(&first.url);
    bridge.start().unwrap();
    wait_inactive(&bridge).await;

    // Events queued before the close are still dispatched afterwards
    assert_eq!(collect_triggers(&mut bridge, 1).await, vec![Trigger::SongStart]);
    first.handle.await.unwrap();

    // The server is gone, so the restart faults and settles back to inactive
    bridge.start().unwrap();
    wait_inactive(&bridge).await;
    assert!(!bridge.is_active());
    assert_eq!(bridge.state(), ConnectionState::Closed);
}
