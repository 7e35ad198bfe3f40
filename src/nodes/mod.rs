mod node;
mod node_manager;
mod transport;

pub use self::node::Node;
pub(crate) use self::node::Shared;
pub use self::node_manager::NodeManager;
pub use self::transport::{Connector, Handshake, Transport, WsConnector};

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use crate::{Error, Result};

/// Protocol version of the node APIs.
pub const API_VERSION: u8 = 4;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Label used in logs and by the [`NodeManager`].
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Whether to use `wss`/`https`.
    pub secure: bool,
    pub password: String,
    /// The bot's user ID.
    pub user_id: u64,
    pub client_name: String,
    /// Enables session resumption when set.
    pub resume_key: Option<String>,
    /// Seconds the node keeps a disconnected session alive.
    pub resume_timeout: u64,
    /// Re-send player state after a new session replaced a lost one.
    pub replay_players: bool,
    pub backoff: BackoffConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 2333,
            secure: false,
            password: String::new(),
            user_id: 0,
            client_name: concat!("lavalink-nodes/", env!("CARGO_PKG_VERSION")).to_owned(),
            resume_key: None,
            resume_timeout: 180,
            replay_players: true,
            backoff: BackoffConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Checks the settings needed to open a session.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must be set"));
        }

        if self.port == 0 {
            return Err(Error::Config("port must be set"));
        }

        if self.password.is_empty() {
            return Err(Error::Config("password must be set"));
        }

        Ok(())
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };

        format!("{}://{}:{}/v{}/websocket", scheme, self.host, self.port, API_VERSION)
    }

    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };

        format!("{}://{}:{}/v{}", scheme, self.host, self.port, API_VERSION)
    }

    /// Builds the handshake, resuming `session_id` when given.
    pub fn handshake(&self, session_id: Option<&str>) -> Handshake {
        let mut headers = vec![
            ("authorization", self.password.clone()),
            ("user-id", self.user_id.to_string()),
            ("client-name", self.client_name.clone()),
        ];

        if let Some(session_id) = session_id {
            headers.push(("session-id", session_id.to_owned()));

            if let Some(ref key) = self.resume_key {
                headers.push(("resume-key", key.clone()));
            }
        }

        Handshake {
            url: self.websocket_url(),
            headers,
        }
    }

    /// Whether a session lost `elapsed` ago may still be resumed.
    ///
    /// This is only a hint; the node decides whether the resume succeeds.
    pub fn can_resume(&self, elapsed: Duration) -> bool {
        self.resume_key.is_some() && elapsed < Duration::from_secs(self.resume_timeout)
    }
}

/// Exponential reconnect backoff.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    /// Upper bound of a single delay.
    pub max_delay_ms: u64,
    /// Attempts before the node gives up; `0` retries forever.
    pub max_attempts: u32,
    /// Fraction (0 to 1) of each delay that is randomly shaved off.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Delay before the given attempt, counting from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let jitter = self.jitter.max(0.0).min(1.0);

        if jitter == 0.0 || base == 0 {
            return Duration::from_millis(base);
        }

        let cut = rand::thread_rng().gen_range(0.0..=jitter);

        Duration::from_millis(base - (base as f64 * cut) as u64)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}

/// Lifecycle of a node's session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected { session_id: String },
    Resuming,
    Reconnecting { attempt: u32 },
    Closed,
}

impl ConnectionState {
    /// The session ID, which exists only while connected.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { session_id } => Some(session_id),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}
