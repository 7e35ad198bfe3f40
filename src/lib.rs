//! A client for audio nodes that speak the Lavalink v4 protocol.
//!
//! A [`Node`] keeps a resumable session to one node and owns the players of
//! the guilds it serves. Voice updates from the Discord gateway are fed to the
//! node, which merges them into credentials for the guild's player. Node
//! events reach the application through the node's [`EventDispatcher`].
//!
//! [`Node`]: nodes::Node
//! [`EventDispatcher`]: events::EventDispatcher

#[macro_use] extern crate log;

pub mod events;
pub mod http;
pub mod model;
pub mod nodes;
pub mod player;
pub mod rest;
pub mod voice;

mod error;

pub use self::error::{Error, Result};
pub use self::events::{listener, Event, EventDispatcher, EventKind};
pub use self::nodes::{ConnectionState, Node, NodeConfig, NodeManager};
pub use self::player::{AudioPlayer, AudioPlayerManager, PlayOptions, PlayerData};
pub use self::voice::{VoiceCredentials, VoiceServerUpdate, VoiceStateUpdate};
