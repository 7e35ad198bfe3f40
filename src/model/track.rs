//! Track metadata returned by the node when loading or decoding tracks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A playable track, as encoded by the node.
///
/// Two tracks are equal when their identifiers are; the encoded blob may
/// differ between loads of the same source item.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default)]
    pub plugin_info: Map<String, Value>,
    #[serde(default)]
    pub user_data: Map<String, Value>,
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.info.identifier == other.info.identifier
    }
}

impl Eq for Track {}

impl Track {
    /// The track length in milliseconds, if it is known.
    ///
    /// Streams have no meaningful length.
    pub fn duration(&self) -> Option<u64> {
        if self.info.is_stream {
            None
        } else {
            Some(self.info.length)
        }
    }

    /// Title of the track.
    pub fn label(&self) -> &str {
        &self.info.title
    }

    pub fn artist(&self) -> Artist {
        Artist {
            name: self.info.author.clone(),
            url: self.plugin_string("artistUrl"),
            artwork_url: self.plugin_string("artistArtworkUrl"),
        }
    }

    /// The album the track belongs to, if the source plugin reported one.
    pub fn album(&self) -> Option<Album> {
        let name = self.plugin_string("albumName")?;

        Some(Album {
            name,
            url: self.plugin_string("albumUrl"),
            artwork_url: self.info.artwork_url.clone(),
        })
    }

    pub fn preview_url(&self) -> Option<String> {
        self.plugin_string("previewUrl")
    }

    fn plugin_string(&self, key: &str) -> Option<String> {
        self.plugin_info
            .get(key)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Length in milliseconds.
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artist {
    pub name: String,
    pub url: Option<String>,
    pub artwork_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Album {
    pub name: String,
    pub url: Option<String>,
    pub artwork_url: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistKind {
    Album,
    Playlist,
    Artist,
    Recommendations,
}

/// A playlist resolved by a `loadtracks` request.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: Map<String, Value>,
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// The kind of collection, as reported by source plugins.
    pub fn kind(&self) -> Option<PlaylistKind> {
        self.plugin_info
            .get("type")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn url(&self) -> Option<&str> {
        self.plugin_info.get("url").and_then(Value::as_str)
    }

    pub fn artwork_url(&self) -> Option<&str> {
        self.plugin_info.get("artworkUrl").and_then(Value::as_str)
    }

    pub fn author(&self) -> Option<&str> {
        self.plugin_info.get("author").and_then(Value::as_str)
    }

    /// The number of tracks in the source collection, which may exceed the
    /// number of tracks that were loaded.
    pub fn total_tracks(&self) -> usize {
        self.plugin_info
            .get("totalTracks")
            .and_then(Value::as_u64)
            .map(|total| total as usize)
            .unwrap_or(self.tracks.len())
    }
}

impl PartialEq for Playlist {
    fn eq(&self, other: &Self) -> bool {
        match (self.url(), other.url()) {
            (Some(a), Some(b)) => a == b,
            _ => self.info == other.info && self.tracks == other.tracks,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, `-1` when none is selected.
    pub selected_track: i32,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Exception {
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct EmptyResult {}

/// Result of a `loadtracks` request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "loadType", content = "data", rename_all = "lowercase")]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    Search(Vec<Track>),
    Empty(EmptyResult),
    Error(Exception),
}

impl LoadResult {
    /// All tracks contained in the result, in load order.
    pub fn tracks(&self) -> Vec<Track> {
        match self {
            LoadResult::Track(track) => vec![track.clone()],
            LoadResult::Playlist(playlist) => playlist.tracks.clone(),
            LoadResult::Search(tracks) => tracks.clone(),
            LoadResult::Empty(_) | LoadResult::Error(_) => Vec::new(),
        }
    }
}

/// Search providers understood by the node and its source plugins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchSource {
    YouTube,
    YouTubeMusic,
    SoundCloud,
    Spotify,
    SpotifyRecommendations,
    AppleMusic,
    Deezer,
    DeezerIsrc,
    YandexMusic,
}

impl SearchSource {
    pub fn prefix(self) -> &'static str {
        match self {
            SearchSource::YouTube => "ytsearch",
            SearchSource::YouTubeMusic => "ytmsearch",
            SearchSource::SoundCloud => "scsearch",
            SearchSource::Spotify => "spsearch",
            SearchSource::SpotifyRecommendations => "sprec",
            SearchSource::AppleMusic => "amsearch",
            SearchSource::Deezer => "dzsearch",
            SearchSource::DeezerIsrc => "dzisrc",
            SearchSource::YandexMusic => "ymsearch",
        }
    }

    /// Builds a load identifier for the query.
    ///
    /// Links are passed through untouched so the node resolves them directly.
    pub fn identifier(self, query: &str) -> String {
        let query = query.trim();

        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_owned()
        } else {
            format!("{}:{}", self.prefix(), query)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn track_json(identifier: &str, length: u64) -> Value {
        json!({
            "encoded": format!("enc-{}", identifier),
            "info": {
                "identifier": identifier,
                "isSeekable": true,
                "author": "Rick Astley",
                "length": length,
                "isStream": false,
                "position": 0,
                "title": "Never Gonna Give You Up",
                "uri": format!("https://youtube.com/watch?v={}", identifier),
                "artworkUrl": null,
                "isrc": null,
                "sourceName": "youtube"
            },
            "pluginInfo": {
                "albumName": "Whenever You Need Somebody",
                "artistUrl": "https://example.com/rick"
            },
            "userData": {}
        })
    }

    #[test]
    fn track_equality_uses_identifier() {
        let a: Track = serde_json::from_value(track_json("dQw4w9WgXcQ", 212_000)).unwrap();
        let mut b = a.clone();
        b.encoded = "something else".to_owned();

        assert_eq!(a, b);
        assert_eq!(a.duration(), Some(212_000));
        assert_eq!(a.album().unwrap().name, "Whenever You Need Somebody");
        assert_eq!(a.artist().url.as_deref(), Some("https://example.com/rick"));
    }

    #[test]
    fn load_results_decode_by_load_type() {
        let empty: LoadResult =
            serde_json::from_value(json!({"loadType": "empty", "data": {}})).unwrap();
        assert!(empty.tracks().is_empty());

        let search: LoadResult = serde_json::from_value(json!({
            "loadType": "search",
            "data": [track_json("a", 1), track_json("b", 2)],
        }))
        .unwrap();
        assert_eq!(search.tracks().len(), 2);

        let playlist: LoadResult = serde_json::from_value(json!({
            "loadType": "playlist",
            "data": {
                "info": {"name": "Mix", "selectedTrack": -1},
                "pluginInfo": {"type": "album", "totalTracks": 12},
                "tracks": [track_json("a", 1)],
            },
        }))
        .unwrap();
        match playlist {
            LoadResult::Playlist(playlist) => {
                assert_eq!(playlist.kind(), Some(PlaylistKind::Album));
                assert_eq!(playlist.total_tracks(), 12);
            },
            other => panic!("unexpected result: {:?}", other),
        }

        let error: LoadResult = serde_json::from_value(json!({
            "loadType": "error",
            "data": {"message": "nope", "severity": "common", "cause": "x"},
        }))
        .unwrap();
        assert!(matches!(error, LoadResult::Error(ref e) if e.severity == Severity::Common));
    }

    #[test]
    fn search_identifiers_pass_links_through() {
        assert_eq!(SearchSource::SoundCloud.identifier(" lofi "), "scsearch:lofi");
        assert_eq!(
            SearchSource::YouTube.identifier("https://youtu.be/dQw4w9WgXcQ"),
            "https://youtu.be/dQw4w9WgXcQ",
        );
    }
}
