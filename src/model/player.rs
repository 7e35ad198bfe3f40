//! Player payloads of the REST API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use super::snowflake;
use super::track::Track;

/// A player as reported by `GET /sessions/{session}/players[/{guild}]`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub state: PlayerState,
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: Filters,
}

/// Playback state of a player, pushed by `playerUpdate` messages.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unix timestamp in milliseconds.
    pub time: u64,
    /// Track position in milliseconds.
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
    /// Voice gateway latency in milliseconds, `-1` when not connected.
    pub ping: i64,
}

/// Voice credentials as the node expects them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Body of `PATCH /sessions/{session}/players/{guild}`.
///
/// Unset fields are left untouched by the node.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    /// `Some(None)` stops the current track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_track: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

/// Audio filters applied by the node. Unset filters are disabled.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<Band>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Oscillator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Oscillator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub plugin_filters: Map<String, Value>,
}

/// One of the 15 equalizer bands (0-14); gain ranges from -0.25 to 1.0.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Band {
    pub band: u8,
    pub gain: f32,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mono_level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_band: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_width: Option<f32>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Timescale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

/// Shared shape of the tremolo and vibrato filters.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Oscillator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_hz: Option<f64>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_left: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_right: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_left: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_right: Option<f32>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct LowPass {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_serializes_explicit_null() {
        let stop = UpdatePlayer {
            encoded_track: Some(None),
            ..Default::default()
        };

        assert_eq!(serde_json::to_value(&stop).unwrap(), json!({"encodedTrack": null}));
        assert_eq!(serde_json::to_value(UpdatePlayer::default()).unwrap(), json!({}));
    }

    #[test]
    fn player_info_reads_string_guild_ids() {
        let info: PlayerInfo = serde_json::from_value(json!({
            "guildId": "81384788765712384",
            "track": null,
            "volume": 100,
            "paused": false,
            "state": {"time": 1, "position": 0, "connected": true, "ping": 12},
            "voice": {"token": "t", "endpoint": "e", "sessionId": "s"},
            "filters": {"timescale": {"speed": 1.2, "pitch": null, "rate": null}},
        }))
        .unwrap();

        assert_eq!(info.guild_id, 81_384_788_765_712_384);
        assert_eq!(info.filters.timescale.unwrap().speed, Some(1.2));
    }

    #[test]
    fn unset_filter_settings_are_omitted() {
        let filters = Filters {
            timescale: Some(Timescale {
                speed: Some(1.5),
                pitch: None,
                rate: None,
            }),
            ..Default::default()
        };

        assert_eq!(serde_json::to_value(&filters).unwrap(), json!({"timescale": {"speed": 1.5}}));
    }
}
