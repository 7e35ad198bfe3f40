#![allow(dead_code)]

use async_trait::async_trait;
use lavalink_nodes::http::{HttpClient, HttpRequest, HttpResponse, Method};
use lavalink_nodes::model::Track;
use lavalink_nodes::nodes::{BackoffConfig, Connector, Handshake, Transport};
use lavalink_nodes::{Error, Event, EventKind, Node, NodeConfig, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const BOT: u64 = 10;
pub const GUILD: u64 = 42;

pub fn config() -> NodeConfig {
    NodeConfig {
        name: "test".to_owned(),
        password: "youshallnotpass".to_owned(),
        user_id: BOT,
        backoff: BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 400,
            max_attempts: 4,
            jitter: 0.0,
        },
        ..Default::default()
    }
}

pub fn resumable_config() -> NodeConfig {
    NodeConfig {
        resume_key: Some("resume-me".to_owned()),
        resume_timeout: 60,
        ..config()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
    Accept,
    Refuse,
    Unauthorized,
}

/// Hands out in-memory transports, following a script of attempt outcomes.
pub struct MockConnector {
    script: Mutex<VecDeque<Attempt>>,
    fallback: Attempt,
    handshakes: Mutex<Vec<Handshake>>,
    servers: UnboundedSender<ServerEnd>,
}

impl MockConnector {
    pub fn new(script: Vec<Attempt>, fallback: Attempt) -> (Arc<Self>, UnboundedReceiver<ServerEnd>) {
        let (servers, accepted) = mpsc::unbounded_channel();

        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            handshakes: Mutex::new(Vec::new()),
            servers,
        });

        (connector, accepted)
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, handshake: &Handshake) -> Result<Box<dyn Transport>> {
        self.handshakes.lock().push(handshake.clone());

        let attempt = self.script.lock().pop_front().unwrap_or(self.fallback);

        match attempt {
            Attempt::Accept => {
                let (to_client, incoming) = mpsc::unbounded_channel();
                let (outgoing, from_client) = mpsc::unbounded_channel();

                self.servers
                    .send(ServerEnd {
                        handshake: handshake.clone(),
                        to_client,
                        from_client,
                    })
                    .ok();

                Ok(Box::new(MockTransport { incoming, outgoing }))
            },
            Attempt::Refuse => Err(Error::ConnectionLost),
            Attempt::Unauthorized => Err(Error::AuthorizationFailed),
        }
    }
}

struct MockTransport {
    incoming: UnboundedReceiver<String>,
    outgoing: UnboundedSender<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.outgoing.send(text).map_err(|_| Error::ConnectionLost)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.incoming.close();

        Ok(())
    }
}

/// The node's side of an accepted transport. Dropping it hangs up.
pub struct ServerEnd {
    pub handshake: Handshake,
    to_client: UnboundedSender<String>,
    from_client: UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn push(&self, message: Value) {
        self.to_client.send(message.to_string()).ok();
    }

    pub fn ready(&self, session_id: &str, resumed: bool) {
        self.push(json!({"op": "ready", "resumed": resumed, "sessionId": session_id}));
    }

    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}

/// Records requests and answers them like a node with no real players would.
#[derive(Default)]
pub struct MockHttp {
    requests: Mutex<Vec<HttpRequest>>,
    stalled: AtomicBool,
    failures: Mutex<VecDeque<u16>>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Player update bodies sent so far, in order.
    pub fn updates(&self) -> Vec<(String, Value)> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == Method::PATCH && request.url.contains("/players/"))
            .map(|request| {
                let body = serde_json::from_slice(request.body.as_deref().unwrap_or(b"null")).unwrap();

                (request.url, body)
            })
            .collect()
    }

    /// Makes every following request hang.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn fail_next(&self, status: u16) {
        self.failures.lock().push_back(status);
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request.clone());

        if self.stalled.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        if let Some(status) = self.failures.lock().pop_front() {
            return Ok(respond(status, json!({"status": status, "message": "mock failure"})));
        }

        if request.method == Method::DELETE {
            return Ok(respond(204, Value::Null));
        }

        if let Some(guild_id) = player_guild(&request.url) {
            return Ok(respond(200, player_info(guild_id)));
        }

        let body = request
            .body
            .as_deref()
            .map(|body| serde_json::from_slice(body).unwrap())
            .unwrap_or(Value::Null);

        Ok(respond(200, body))
    }
}

fn respond(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: if body.is_null() { Vec::new() } else { body.to_string().into_bytes() },
    }
}

fn player_guild(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/players/")?;

    Some(rest.split('?').next().unwrap_or(rest).to_owned())
}

fn player_info(guild_id: String) -> Value {
    json!({
        "guildId": guild_id,
        "track": null,
        "volume": 100,
        "paused": false,
        "state": {"time": 0, "position": 0, "connected": true, "ping": 10},
        "voice": {"token": "", "endpoint": "", "sessionId": ""},
        "filters": {},
    })
}

pub fn track(identifier: &str, length: u64) -> Track {
    serde_json::from_value(track_json(identifier, length)).unwrap()
}

pub fn track_json(identifier: &str, length: u64) -> Value {
    json!({
        "encoded": format!("enc-{}", identifier),
        "info": {
            "identifier": identifier,
            "isSeekable": true,
            "author": "author",
            "length": length,
            "isStream": false,
            "position": 0,
            "title": identifier,
            "uri": null,
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "http"
        },
        "pluginInfo": {},
        "userData": {}
    })
}

pub struct Harness {
    pub node: Node,
    pub connector: Arc<MockConnector>,
    pub http: Arc<MockHttp>,
    pub server: ServerEnd,
    pub accepted: UnboundedReceiver<ServerEnd>,
}

/// A started node that completed its handshake with session `s1`.
pub async fn connected(config: NodeConfig) -> Harness {
    connected_with(config, Vec::new(), Attempt::Accept).await
}

/// Like [`connected`], with the attempts following the first one scripted.
pub async fn connected_with(config: NodeConfig, script: Vec<Attempt>, fallback: Attempt) -> Harness {
    let mut script = script;
    script.insert(0, Attempt::Accept);

    let (connector, mut accepted) = MockConnector::new(script, fallback);
    let http = MockHttp::new();
    let node = Node::with_transport(config, connector.clone(), http.clone()).unwrap();

    node.start().unwrap();

    let server = accepted.recv().await.unwrap();
    server.ready("s1", false);
    assert_eq!(node.wait_connected().await.unwrap(), "s1");

    Harness {
        node,
        connector,
        http,
        server,
        accepted,
    }
}

/// Subscribes a channel to the given event kinds.
pub fn watch(node: &Node, kinds: &[EventKind]) -> UnboundedReceiver<Arc<Event>> {
    let (tx, rx) = mpsc::unbounded_channel();

    for kind in kinds {
        node.events().subscribe(*kind, tx.clone()).unwrap();
    }

    rx
}

pub async fn next_event(events: &mut UnboundedReceiver<Arc<Event>>) -> Arc<Event> {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Polls until the condition holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    panic!("condition never held");
}
