use super::hub::{Subscription, TopicHub};
use super::ingest::{read_publish_request, write_accepted, write_rejected, IngestError};
use super::{topic_for, Publisher, DEFAULT_TOPIC_PREFIX};
use crate::shared::InstanceId;
use crate::status::StatusTracker;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{accept, Message, WebSocket};

const ACCEPT_IDLE_SLEEP: Duration = Duration::from_millis(50);
const SOCKET_IDLE_SLEEP: Duration = Duration::from_millis(25);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Extracts the instance id from a subscribe frame.
///
/// Accepts `{"hypothesis_id": "..."}` and the same object double-encoded as
/// a JSON string.
pub fn parse_subscribe_frame(text: &str) -> Result<String, String> {
    let mut value: Value =
        serde_json::from_str(text).map_err(|_| "Invalid JSON format".to_string())?;
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner).map_err(|_| "Invalid JSON format".to_string())?;
    }
    let Some(raw) = value.get("hypothesis_id") else {
        return Err(r#"Expected format: {"hypothesis_id": "value"}"#.to_string());
    };
    let raw = raw
        .as_str()
        .ok_or_else(|| "hypothesis_id must be a string".to_string())?;
    InstanceId::parse(raw)
        .map(|id| id.as_str().to_string())
        .map_err(|_| "hypothesis_id is required".to_string())
}

/// WebSocket front of a [`TopicHub`].
///
/// Clients send a subscribe frame, join the instance's topic, get a status
/// snapshot and then every envelope published to that topic, each wrapped as
/// `{"event": "task_update", "data": ...}`.
///
/// The same port accepts `POST /topics/<topic>` with a JSON body, which is
/// republished to the topic. This is the endpoint a [`super::WebhookPublisher`]
/// in another process targets.
#[derive(Clone)]
pub struct WebSocketHub {
    hub: TopicHub,
    tracker: StatusTracker,
    topic_prefix: String,
}

/// Running server; dropping it does not stop the accept loop, call
/// [`WebSocketServerHandle::shutdown`].
#[derive(Debug)]
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl WebSocketServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl WebSocketHub {
    pub fn new(tracker: StatusTracker) -> Self {
        Self {
            hub: TopicHub::new(),
            tracker,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// The hub to hand to a [`super::Broadcaster`] as its publisher.
    pub fn topic_hub(&self) -> &TopicHub {
        &self.hub
    }

    pub fn spawn(&self, addr: impl ToSocketAddrs) -> std::io::Result<WebSocketServerHandle> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let hub = self.clone();
        let stop_for_thread = Arc::clone(&stop);
        let accept_thread = thread::spawn(move || {
            if let Err(err) = hub.serve(listener, &stop_for_thread) {
                hub.tracker
                    .log_warn("hub.accept.failed", &[("error", json!(err.to_string()))]);
            }
        });
        Ok(WebSocketServerHandle {
            local_addr,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    /// Accept loop; returns once `stop` is set.
    pub fn serve(&self, listener: TcpListener, stop: &Arc<AtomicBool>) -> std::io::Result<()> {
        listener.set_nonblocking(true)?;
        self.tracker.log_info(
            "hub.listening",
            &[("addr", json!(listener.local_addr()?.to_string()))],
        );
        while !stop.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let hub = self.clone();
                    let stop = Arc::clone(stop);
                    thread::spawn(move || hub.handle_connection(stream, peer, &stop));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_IDLE_SLEEP);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, stop: &AtomicBool) {
        if let Err(err) = prepare_stream(&stream) {
            self.tracker.log_warn(
                "hub.accept.stream_failed",
                &[("peer", json!(peer.to_string())), ("error", json!(err.to_string()))],
            );
            return;
        }
        let mut first = [0_u8; 1];
        match stream.peek(&mut first) {
            Ok(1) if first[0] == b'P' => return self.handle_publish(stream, peer),
            Ok(_) => {}
            Err(err) => {
                self.tracker.log_warn(
                    "hub.accept.stream_failed",
                    &[("peer", json!(peer.to_string())), ("error", json!(err.to_string()))],
                );
                return;
            }
        }

        let mut socket = match open_socket(stream) {
            Ok(socket) => socket,
            Err(reason) => {
                self.tracker.log_warn(
                    "hub.handshake.failed",
                    &[("peer", json!(peer.to_string())), ("error", json!(reason))],
                );
                return;
            }
        };
        let conn = connection_id();
        self.tracker.log_info(
            "hub.connected",
            &[("conn", json!(conn)), ("peer", json!(peer.to_string()))],
        );

        let mut subscriptions: Vec<Subscription> = Vec::new();
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            match socket.read() {
                Ok(Message::Text(text)) => {
                    if let Some(subscription) = self.handle_frame(&mut socket, &text) {
                        subscriptions.push(subscription);
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = socket.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(tungstenite::Error::Io(err))
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => break,
                Err(err) => {
                    self.tracker.log_warn(
                        "hub.read.failed",
                        &[("conn", json!(conn)), ("error", json!(err.to_string()))],
                    );
                    break;
                }
            }

            let mut delivered = false;
            for subscription in &subscriptions {
                while let Ok(payload) = subscription.try_recv() {
                    delivered = true;
                    let frame = json!({ "event": "task_update", "data": payload });
                    if send_text(&mut socket, frame.to_string()).is_err() {
                        break;
                    }
                }
            }
            let _ = socket.flush();
            if !delivered {
                thread::sleep(SOCKET_IDLE_SLEEP);
            }
        }

        for subscription in &subscriptions {
            let _ = self.hub.unsubscribe(subscription);
        }
        let _ = socket.close(None);
        self.tracker
            .log_info("hub.disconnected", &[("conn", json!(conn))]);
    }

    fn handle_publish(&self, mut stream: TcpStream, peer: SocketAddr) {
        let request = match read_publish_request(&mut stream) {
            Ok(request) => request,
            Err(err) => {
                self.tracker.log_warn(
                    "hub.publish.rejected",
                    &[("peer", json!(peer.to_string())), ("error", json!(err.to_string()))],
                );
                let _ = write_rejected(&mut stream, &err);
                return;
            }
        };
        let outcome = match self.hub.publish(&request.topic, &request.payload) {
            Ok(()) => write_accepted(&mut stream),
            Err(err) => write_rejected(&mut stream, &IngestError::from(err)),
        };
        if let Err(err) = outcome {
            self.tracker.log_warn(
                "hub.publish.reply_failed",
                &[("peer", json!(peer.to_string())), ("error", json!(err.to_string()))],
            );
            return;
        }
        self.tracker
            .log_info("hub.publish.accepted", &[("room", json!(request.topic))]);
    }

    fn handle_frame(&self, socket: &mut WebSocket<TcpStream>, text: &str) -> Option<Subscription> {
        let instance_id = match parse_subscribe_frame(text) {
            Ok(id) => id,
            Err(reason) => {
                let _ = send_text(socket, json!({ "event": "error", "error": reason }).to_string());
                return None;
            }
        };

        let topic = topic_for(&self.topic_prefix, &instance_id);
        let subscription = match self.hub.subscribe(&topic) {
            Ok(subscription) => subscription,
            Err(err) => {
                let _ = send_text(
                    socket,
                    json!({ "event": "error", "error": err.to_string() }).to_string(),
                );
                return None;
            }
        };
        let _ = send_text(
            socket,
            json!({ "event": "subscribed", "status": "subscribed", "room": topic }).to_string(),
        );
        self.tracker
            .log_info("hub.subscribed", &[("room", json!(topic))]);

        match self
            .tracker
            .snapshot(&instance_id)
            .map_err(|err| err.to_string())
            .and_then(|snapshot| serde_json::to_value(snapshot).map_err(|err| err.to_string()))
        {
            Ok(snapshot) => {
                let _ = self.hub.publish(&topic, &snapshot);
            }
            Err(reason) => {
                let _ = send_text(socket, json!({ "event": "error", "error": reason }).to_string());
            }
        }
        Some(subscription)
    }
}

fn prepare_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))
}

fn open_socket(stream: TcpStream) -> Result<WebSocket<TcpStream>, String> {
    let socket = accept(stream).map_err(|err| err.to_string())?;
    socket
        .get_ref()
        .set_read_timeout(None)
        .and_then(|_| socket.get_ref().set_nonblocking(true))
        .map_err(|err| err.to_string())?;
    Ok(socket)
}

fn connection_id() -> String {
    let mut bytes = [0_u8; 6];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => bytes.iter().map(|byte| format!("{byte:02x}")).collect(),
        Err(_) => format!("conn-{}", crate::shared::now_millis()),
    }
}

fn send_text(socket: &mut WebSocket<TcpStream>, text: String) -> Result<(), tungstenite::Error> {
    match socket.send(Message::Text(text)) {
        Ok(()) => Ok(()),
        // Queued in the write buffer; flushed on a later pass.
        Err(tungstenite::Error::Io(err)) if err.kind() == ErrorKind::WouldBlock => Ok(()),
        Err(err) => Err(err),
    }
}
