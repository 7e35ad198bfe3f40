//! Messages pushed by the node over the session transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::player::PlayerState;
use super::snowflake;
use super::stats::Stats;
use super::track::{Exception, Track};

/// A decoded inbound message, discriminated by its `op` field.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Ready(Ready),
    PlayerUpdate(PlayerUpdate),
    Stats(Stats),
    Event(NodeEvent),
    /// A well-formed message with an unrecognised `op` or event `type`.
    Unknown(Value),
}

impl Incoming {
    /// Decodes a text frame.
    ///
    /// Fails only if the frame is not JSON; unrecognised shapes become
    /// [`Incoming::Unknown`].
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value = serde_json::from_str::<Value>(text)?;

        Ok(match Known::deserialize(&value) {
            Ok(Known::Ready(ready)) => Incoming::Ready(ready),
            Ok(Known::PlayerUpdate(update)) => Incoming::PlayerUpdate(update),
            Ok(Known::Stats(stats)) => Incoming::Stats(stats),
            Ok(Known::Event(event)) => Incoming::Event(event),
            Err(why) => {
                debug!("Unrecognised node message ({}): {}", why, value);

                Incoming::Unknown(value)
            },
        })
    }
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum Known {
    Ready(Ready),
    PlayerUpdate(PlayerUpdate),
    Stats(Stats),
    Event(NodeEvent),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub state: PlayerState,
}

/// Player events, discriminated by their `type` field.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent")]
    TrackStart(TrackStart),
    #[serde(rename = "TrackEndEvent")]
    TrackEnd(TrackEnd),
    #[serde(rename = "TrackExceptionEvent")]
    TrackException(TrackException),
    #[serde(rename = "TrackStuckEvent")]
    TrackStuck(TrackStuck),
    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed(WebSocketClosed),
}

impl NodeEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            NodeEvent::TrackStart(event) => event.guild_id,
            NodeEvent::TrackEnd(event) => event.guild_id,
            NodeEvent::TrackException(event) => event.guild_id,
            NodeEvent::TrackStuck(event) => event.guild_id,
            NodeEvent::WebSocketClosed(event) => event.guild_id,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackStart {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackEnd {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
    pub reason: TrackEndReason,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether the next queued track should be started.
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
    pub exception: Exception,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuck {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
    pub threshold_ms: u64,
}

/// The node's voice connection to Discord was closed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::track::tests::track_json;
    use serde_json::json;

    #[test]
    fn decodes_ready() {
        let msg = Incoming::decode(r#"{"op":"ready","resumed":false,"sessionId":"abc"}"#).unwrap();

        assert_eq!(
            msg,
            Incoming::Ready(Ready {
                resumed: false,
                session_id: "abc".to_owned(),
            }),
        );
    }

    #[test]
    fn decodes_track_end() {
        let text = json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "42",
            "track": track_json("a", 1000),
            "reason": "finished",
        })
        .to_string();

        match Incoming::decode(&text).unwrap() {
            Incoming::Event(NodeEvent::TrackEnd(end)) => {
                assert_eq!(end.guild_id, 42);
                assert!(end.reason.may_start_next());
            },
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_shapes_are_kept() {
        let msg = Incoming::decode(r#"{"op":"event","type":"SegmentsLoaded","guildId":"1"}"#).unwrap();
        assert!(matches!(msg, Incoming::Unknown(_)));

        assert!(Incoming::decode("not json").is_err());
    }
}
