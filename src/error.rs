use hyper::http::uri::InvalidUri;
use std::result::Result as StdResult;
use tokio_tungstenite::tungstenite::Error as WebSocketError;

pub type Result<T, E = Error> = StdResult<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation needs an established node session.
    #[error("node is not connected")]
    NotConnected,
    /// A player is already registered for the guild.
    #[error("a player already exists for guild {0}")]
    DuplicateGuild(u64),
    /// No player is registered for the guild.
    #[error("no player exists for guild {0}")]
    NotFound(u64),
    /// The player command needs a current track.
    #[error("the player has no active track")]
    NoActiveTrack,
    #[error("volume {0} is out of range (0-1000)")]
    InvalidVolume(u16),
    /// The backend answered with a status or body that could not be used.
    #[error("bad backend response (status {status}): {}", message.as_deref().unwrap_or("no message"))]
    BadBackendResponse {
        status: u16,
        message: Option<String>,
    },
    /// The backend rejected the node password during the handshake.
    #[error("the node rejected the configured credentials")]
    AuthorizationFailed,
    /// An event listener was registered in a way the dispatcher can't drive.
    #[error("listener not supported: {0}")]
    NotSupported(&'static str),
    /// The session transport dropped while the operation was in flight.
    #[error("the node connection was lost")]
    ConnectionLost,
    #[error("invalid node configuration: {0}")]
    Config(&'static str),
    #[error(transparent)]
    WebSocket(#[from] WebSocketError),
    #[error(transparent)]
    Http(#[from] hyper::Error),
    #[error(transparent)]
    InvalidUri(#[from] InvalidUri),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn bad_response(status: u16, message: impl Into<String>) -> Self {
        Error::BadBackendResponse {
            status,
            message: Some(message.into()),
        }
    }
}
