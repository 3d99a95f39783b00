use std::{path::Path, time::Duration};

use serde_json::{Value, json};
use tempfile::tempdir;
use tokio::net::{UnixListener, UnixStream};
use trackbridge_core::{
    BridgeClient, BridgeClientOptions, BridgeError, BridgeEvent, Command,
    bridge::protocol::{frame, read_frame, write_frame},
};

/// How the fake peer treats one request.
enum Reply {
    Ok(Value),
    Err(&'static str),
    Silent,
    Hangup,
}

async fn next_request(stream: &mut UnixStream) -> Option<Value> {
    let body = read_frame(stream).await.expect("fake peer read should succeed")?;
    Some(rmp_serde::from_slice(&body).expect("request should be msgpack"))
}

async fn send_value(stream: &mut UnixStream, value: &Value) {
    let body = rmp_serde::to_vec_named(value).expect("reply should encode");
    let framed = frame(body).expect("reply should fit a frame");
    write_frame(stream, &framed)
        .await
        .expect("fake peer write should succeed");
}

/// Accepts one connection and answers each request with `reply(cmd)`.
fn spawn_fake_peer(
    socket: &Path,
    reply: impl Fn(&str) -> Reply + Send + 'static,
) -> tokio::task::JoinHandle<Vec<Value>> {
    let listener = UnixListener::bind(socket).expect("fake peer should bind");
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("client should connect");
        let mut seen = Vec::new();
        while let Some(request) = next_request(&mut stream).await {
            let id = request["id"].clone();
            let cmd = request["cmd"].as_str().unwrap_or_default().to_string();
            seen.push(request);
            match reply(&cmd) {
                Reply::Ok(payload) => {
                    let response = json!({ "type": "response", "id": id, "ok": true, "payload": payload });
                    send_value(&mut stream, &response).await;
                }
                Reply::Err(message) => {
                    let response = json!({ "type": "response", "id": id, "ok": false, "error": message });
                    send_value(&mut stream, &response).await;
                }
                Reply::Silent => {}
                Reply::Hangup => break,
            }
        }
        seen
    })
}

fn client_for(socket: &Path, timeout: Duration) -> BridgeClient {
    BridgeClient::new(BridgeClientOptions {
        request_timeout: timeout,
        ..BridgeClientOptions::new(socket)
    })
}

#[tokio::test]
async fn responses_are_matched_to_requests() {
    let dir = tempdir().expect("tempdir should be creatable");
    let socket = dir.path().join("peer.sock");
    let peer = spawn_fake_peer(&socket, |cmd| Reply::Ok(json!({ "echo": cmd })));
    let client = client_for(&socket, Duration::from_secs(2));
    let mut events = client.subscribe();

    client.connect().await.expect("connect should succeed");
    assert_eq!(
        events.recv().await.expect("event expected"),
        BridgeEvent::Connected
    );

    let payload = client
        .send(Command::TransportSetBpm { bpm: 98.0 })
        .await
        .expect("request should succeed");
    assert_eq!(payload["echo"], "transport.set_bpm");
    let payload = client
        .send(Command::EditReset { track_count: 4 })
        .await
        .expect("request should succeed");
    assert_eq!(payload["echo"], "edit:reset");

    client.disconnect().await;
    let seen = peer.await.expect("fake peer should finish");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0]["type"], "request");
    assert_eq!(seen[0]["payload"]["bpm"], 98.0);
    assert_eq!(seen[1]["payload"]["track_count"], 4);
    assert_ne!(seen[0]["id"], seen[1]["id"]);
}

#[tokio::test]
async fn peer_errors_surface_with_command_name() {
    let dir = tempdir().expect("tempdir should be creatable");
    let socket = dir.path().join("peer.sock");
    let _peer = spawn_fake_peer(&socket, |_| Reply::Err("plugin not found: vst3:gone"));
    let client = client_for(&socket, Duration::from_secs(2));
    client.connect().await.expect("connect should succeed");

    let error = client
        .send(Command::VstLoad {
            plugin_uid: "vst3:gone".to_string(),
            track_id: 1,
        })
        .await
        .expect_err("peer should reject the load");

    assert!(error.is_not_found());
    assert_eq!(
        error,
        BridgeError::Peer {
            command: "vst:load".to_string(),
            message: "plugin not found: vst3:gone".to_string(),
        }
    );
    assert!(client.is_connected());
}

#[tokio::test]
async fn unanswered_requests_time_out_and_are_forgotten() {
    let dir = tempdir().expect("tempdir should be creatable");
    let socket = dir.path().join("peer.sock");
    let _peer = spawn_fake_peer(&socket, |_| Reply::Silent);
    let client = client_for(&socket, Duration::from_millis(100));
    client.connect().await.expect("connect should succeed");

    let error = client
        .send(Command::TransportPlay)
        .await
        .expect_err("request should time out");

    assert!(matches!(error, BridgeError::Timeout { timeout_ms: 100, .. }));
    assert_eq!(client.pending_requests(), 0);
    assert!(client.is_connected());
}

#[tokio::test]
async fn hangup_fails_pending_requests_and_reports_disconnect() {
    let dir = tempdir().expect("tempdir should be creatable");
    let socket = dir.path().join("peer.sock");
    let _peer = spawn_fake_peer(&socket, |_| Reply::Hangup);
    let client = client_for(&socket, Duration::from_secs(5));
    let mut events = client.subscribe();
    client.connect().await.expect("connect should succeed");

    let error = client
        .send(Command::TransportStop)
        .await
        .expect_err("request should fail on hangup");

    assert_eq!(
        error,
        BridgeError::Disconnected {
            command: "transport.stop".to_string()
        }
    );
    assert_eq!(
        events.recv().await.expect("event expected"),
        BridgeEvent::Connected
    );
    assert_eq!(
        events.recv().await.expect("event expected"),
        BridgeEvent::Disconnected
    );
    assert!(!client.is_connected());
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(
        client.send(Command::TransportPlay).await,
        Err(BridgeError::NotConnected)
    );
}

#[tokio::test]
async fn tick_events_are_parsed() {
    let dir = tempdir().expect("tempdir should be creatable");
    let socket = dir.path().join("peer.sock");
    let listener = UnixListener::bind(&socket).expect("fake peer should bind");
    let client = client_for(&socket, Duration::from_secs(2));
    let mut events = client.subscribe();
    let pusher = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("client should connect");
        let tick = json!({
            "type": "event",
            "event": "transport.tick",
            "payload": { "playing": true, "bpm": 110.0, "positionBeats": 6.5 }
        });
        send_value(&mut stream, &tick).await;
        let other = json!({ "type": "event", "event": "vst:scan-progress", "payload": { "done": 3 } });
        send_value(&mut stream, &other).await;
        stream
    });

    client.connect().await.expect("connect should succeed");
    assert_eq!(
        events.recv().await.expect("event expected"),
        BridgeEvent::Connected
    );
    match events.recv().await.expect("tick expected") {
        BridgeEvent::Tick(tick) => {
            assert!(tick.playing);
            assert!((tick.position_beats - 6.5).abs() < 1e-12);
            assert!((tick.bpm - 110.0).abs() < 1e-12);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match events.recv().await.expect("event expected") {
        BridgeEvent::Other { event, payload } => {
            assert_eq!(event, "vst:scan-progress");
            assert_eq!(payload["done"], 3);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    let _stream = pusher.await.expect("pusher should finish");
}

#[tokio::test]
async fn connecting_to_a_missing_socket_fails() {
    let dir = tempdir().expect("tempdir should be creatable");
    let client = client_for(&dir.path().join("absent.sock"), Duration::from_secs(1));
    assert!(matches!(client.connect().await, Err(BridgeError::Io(_))));
    assert!(!client.is_connected());
}
