use serde_json::{json, Value};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stepledger::broadcast::{
    Broadcaster, EmitRequest, Publisher, RetryPolicy, WebSocketHub, WebhookPublisher,
};
use stepledger::cache::MemoryStatusCache;
use stepledger::status::{StatusTracker, StepReport, TaskState};
use stepledger::store::MemoryHistoryStore;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

type Client = WebSocket<MaybeTlsStream<TcpStream>>;

fn tracker() -> StatusTracker {
    StatusTracker::new(
        Arc::new(MemoryStatusCache::new()),
        Arc::new(MemoryHistoryStore::new()),
    )
}

fn open_client(addr: std::net::SocketAddr) -> Client {
    let (client, _) = connect(format!("ws://{addr}")).expect("connect");
    if let MaybeTlsStream::Plain(stream) = client.get_ref() {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
    }
    client
}

fn next_json(client: &mut Client) -> Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match client.read().expect("read frame") {
            Message::Text(text) => return serde_json::from_str(&text).expect("json frame"),
            _ => continue,
        }
    }
    panic!("no frame before deadline");
}

#[test]
fn subscriber_receives_ack_then_snapshot_then_published_envelope() {
    let tracker = tracker();
    tracker
        .record(
            "h1",
            StepReport::new("Creating enrich data", TaskState::Completed, 20.0),
        )
        .expect("record");

    let hub = WebSocketHub::new(tracker.clone());
    let server = hub.spawn("127.0.0.1:0").expect("spawn hub");
    let mut client = open_client(server.local_addr());

    client
        .send(Message::Text(json!({"hypothesis_id": "h1"}).to_string()))
        .expect("subscribe");

    let ack = next_json(&mut client);
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["room"], "hypothesis_h1");

    let snapshot = next_json(&mut client);
    assert_eq!(snapshot["event"], "task_update");
    assert_eq!(snapshot["data"]["hypothesis_id"], "h1");
    assert_eq!(snapshot["data"]["status"], "pending");
    assert_eq!(snapshot["data"]["progress"], 20.0);

    let broadcaster = Broadcaster::new(
        tracker,
        Arc::new(hub.topic_hub().clone()),
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
        },
    );
    broadcaster
        .emit(
            "h1",
            EmitRequest::new("Getting gene data", TaskState::Started).with_progress(82.0),
        )
        .expect("emit");

    let update = next_json(&mut client);
    assert_eq!(update["event"], "task_update");
    assert_eq!(update["data"]["task"], "Getting gene data");
    assert_eq!(update["data"]["progress"], 82.0);

    let _ = client.close(None);
    server.shutdown();
}

#[test]
fn legacy_string_frame_is_accepted_and_bad_frames_get_errors() {
    let hub = WebSocketHub::new(tracker());
    let server = hub.spawn("127.0.0.1:0").expect("spawn hub");
    let mut client = open_client(server.local_addr());

    client
        .send(Message::Text("not json".to_string()))
        .expect("send");
    let error = next_json(&mut client);
    assert_eq!(error["event"], "error");
    assert_eq!(error["error"], "Invalid JSON format");

    let legacy = Value::String(json!({"hypothesis_id": "h9"}).to_string()).to_string();
    client.send(Message::Text(legacy)).expect("send");
    let ack = next_json(&mut client);
    assert_eq!(ack["room"], "hypothesis_h9");
    let snapshot = next_json(&mut client);
    assert_eq!(snapshot["data"]["status"], "pending");
    assert_eq!(snapshot["data"]["progress"], 0.0);

    let _ = client.close(None);
    server.shutdown();
}

#[test]
fn webhook_post_to_hub_port_reaches_subscribers() {
    let hub = WebSocketHub::new(tracker());
    let server = hub.spawn("127.0.0.1:0").expect("spawn hub");
    let mut client = open_client(server.local_addr());

    client
        .send(Message::Text(json!({"hypothesis_id": "h3"}).to_string()))
        .expect("subscribe");
    assert_eq!(next_json(&mut client)["event"], "subscribed");
    assert_eq!(next_json(&mut client)["data"]["status"], "pending");

    let publisher = WebhookPublisher::new(format!("http://{}", server.local_addr()));
    publisher
        .publish("hypothesis_h3", &json!({"task": "Querying gene data", "progress": 30.0}))
        .expect("publish over http");

    let update = next_json(&mut client);
    assert_eq!(update["event"], "task_update");
    assert_eq!(update["data"]["task"], "Querying gene data");

    let _ = client.close(None);
    server.shutdown();
}

#[test]
fn publish_endpoint_rejects_unknown_paths_and_bad_bodies() {
    let hub = WebSocketHub::new(tracker());
    let server = hub.spawn("127.0.0.1:0").expect("spawn hub");
    let base = format!("http://{}", server.local_addr());

    match ureq::post(&format!("{base}/rooms/h1")).send_string("{}") {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 404),
        other => panic!("expected 404, got {other:?}"),
    }
    match ureq::post(&format!("{base}/topics/hypothesis_h1")).send_string("not json") {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 400),
        other => panic!("expected 400, got {other:?}"),
    }

    server.shutdown();
}
