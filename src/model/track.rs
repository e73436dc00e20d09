use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single audio track as the node serializes it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    /// The base64 encoded track data.
    pub encoded: String,
    /// Info about the track.
    pub info: TrackInfoData,
    /// Addition track info provided by plugins.
    #[serde(default)]
    pub plugin_info: Value,
    /// Additional track data provided via the update player endpoint.
    #[serde(default)]
    pub user_data: Value,
}

/// Information about an audio track.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfoData {
    /// The track identifier.
    pub identifier: String,
    /// Whether the track is seekable.
    pub is_seekable: bool,
    /// The track author.
    pub author: String,
    /// The track length in milliseconds.
    pub length: u64,
    /// Whether the track is a stream.
    pub is_stream: bool,
    /// The track position in milliseconds.
    pub position: u64,
    /// The track title.
    pub title: String,
    /// The track uri.
    pub uri: Option<String>,
    /// The track artwork url.
    pub artwork_url: Option<String>,
    /// The track ISRC.
    pub isrc: Option<String>,
    /// The track source name.
    pub source_name: String,
}

/// The source a track was resolved from, normalized from the node's
/// free-form `sourceName` string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceName {
    Youtube,
    YoutubeMusic,
    Soundcloud,
    Spotify,
    Deezer,
    Tidal,
    VkMusic,
    Qobuz,
    Bandcamp,
    Twitch,
    Http,
    /// Any source the closed set doesn't know about.
    #[serde(untagged)]
    Other(String),
}

impl From<&str> for SourceName {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "youtube" => Self::Youtube,
            "youtubemusic" | "youtube music" => Self::YoutubeMusic,
            "soundcloud" => Self::Soundcloud,
            "spotify" => Self::Spotify,
            "deezer" => Self::Deezer,
            "tidal" => Self::Tidal,
            "vkmusic" => Self::VkMusic,
            "qobuz" => Self::Qobuz,
            "bandcamp" => Self::Bandcamp,
            "twitch" => Self::Twitch,
            "http" => Self::Http,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Track fields that can be retained by the `track_partial` configuration.
///
/// The encoded blob is always retained regardless of this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPartial {
    Title,
    Identifier,
    Author,
    Duration,
    Isrc,
    IsSeekable,
    IsStream,
    Uri,
    ArtworkUrl,
    SourceName,
    PluginInfo,
    CustomData,
    Requester,
}

/// An audio track after it has been built for a player.
///
/// Immutable by convention once built; mutations go through cloning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// The base64 encoded track data. Always retained.
    pub encoded: String,
    /// The track title.
    pub title: String,
    /// The track identifier.
    pub identifier: String,
    /// The track author.
    pub author: String,
    /// The track length in milliseconds.
    pub duration: u64,
    /// The track ISRC.
    pub isrc: Option<String>,
    /// Whether the track is seekable.
    pub is_seekable: bool,
    /// Whether the track is a stream.
    pub is_stream: bool,
    /// The track uri.
    pub uri: Option<String>,
    /// The track artwork url.
    pub artwork_url: Option<String>,
    /// Thumbnail derived from the identifier for YouTube tracks.
    pub thumbnail: Option<String>,
    /// The normalized track source.
    pub source_name: SourceName,
    /// Opaque plugin data, round-tripped untouched.
    #[serde(default)]
    pub plugin_info: Value,
    /// Opaque user data, round-tripped untouched.
    #[serde(default)]
    pub custom_data: Value,
    /// Opaque reference to whoever requested this track.
    #[serde(default)]
    pub requester: Value,
}

impl Track {
    /// Builds a track from the node's wire representation.
    ///
    /// When `partial` is given, only the listed fields are retained; the
    /// encoded blob is kept unconditionally.
    pub fn from_data(data: TrackData, requester: Value, partial: Option<&[TrackPartial]>) -> Self {
        let source_name = SourceName::from(data.info.source_name.as_str());

        let thumbnail = match source_name {
            SourceName::Youtube | SourceName::YoutubeMusic => Some(format!(
                "https://img.youtube.com/vi/{}/default.jpg",
                data.info.identifier
            )),
            _ => None,
        };

        let track = Self {
            encoded: data.encoded,
            title: data.info.title,
            identifier: data.info.identifier,
            author: data.info.author,
            duration: data.info.length,
            isrc: data.info.isrc,
            is_seekable: data.info.is_seekable,
            is_stream: data.info.is_stream,
            uri: data.info.uri,
            artwork_url: data.info.artwork_url,
            thumbnail,
            source_name,
            plugin_info: data.plugin_info,
            custom_data: data.user_data,
            requester,
        };

        match partial {
            Some(fields) => track.retain(fields),
            None => track,
        }
    }

    /// Rebuilds the wire shape, used when a synthetic node event is needed.
    pub(crate) fn to_data(&self) -> TrackData {
        TrackData {
            encoded: self.encoded.clone(),
            info: TrackInfoData {
                identifier: self.identifier.clone(),
                is_seekable: self.is_seekable,
                author: self.author.clone(),
                length: self.duration,
                is_stream: self.is_stream,
                position: 0,
                title: self.title.clone(),
                uri: self.uri.clone(),
                artwork_url: self.artwork_url.clone(),
                isrc: self.isrc.clone(),
                source_name: match &self.source_name {
                    SourceName::Other(name) => name.clone(),
                    other => serde_json::to_value(other)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_owned))
                        .unwrap_or_default(),
                },
            },
            plugin_info: self.plugin_info.clone(),
            user_data: self.custom_data.clone(),
        }
    }

    fn retain(self, fields: &[TrackPartial]) -> Self {
        let keep = |field: TrackPartial| fields.contains(&field);

        Self {
            encoded: self.encoded,
            title: if keep(TrackPartial::Title) {
                self.title
            } else {
                String::new()
            },
            identifier: if keep(TrackPartial::Identifier) {
                self.identifier
            } else {
                String::new()
            },
            author: if keep(TrackPartial::Author) {
                self.author
            } else {
                String::new()
            },
            duration: if keep(TrackPartial::Duration) {
                self.duration
            } else {
                0
            },
            isrc: self.isrc.filter(|_| keep(TrackPartial::Isrc)),
            is_seekable: self.is_seekable && keep(TrackPartial::IsSeekable),
            is_stream: self.is_stream && keep(TrackPartial::IsStream),
            uri: self.uri.filter(|_| keep(TrackPartial::Uri)),
            artwork_url: self.artwork_url.filter(|_| keep(TrackPartial::ArtworkUrl)),
            thumbnail: self.thumbnail,
            source_name: if keep(TrackPartial::SourceName) {
                self.source_name
            } else {
                SourceName::Other(String::new())
            },
            plugin_info: if keep(TrackPartial::PluginInfo) {
                self.plugin_info
            } else {
                Value::Null
            },
            custom_data: if keep(TrackPartial::CustomData) {
                self.custom_data
            } else {
                Value::Null
            },
            requester: if keep(TrackPartial::Requester) {
                self.requester
            } else {
                Value::Null
            },
        }
    }
}

/// Response for a load track request, tagged by `loadType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    /// A track has been loaded.
    Track(Box<TrackData>),
    /// A playlist has been loaded.
    Playlist(PlaylistData),
    /// A search result has been loaded.
    Search(Vec<TrackData>),
    /// There has been no matches to the identifier.
    Empty(Value),
    /// Loading has failed.
    Error(Exception),
}

/// A playlist as loaded by the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    /// Information about the playlist.
    pub info: PlaylistInfoData,
    /// Addition playlist info provided by plugins.
    #[serde(default)]
    pub plugin_info: Value,
    /// The tracks of the playlist.
    pub tracks: Vec<TrackData>,
}

/// Information about the playlist.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfoData {
    /// The name of the playlist.
    pub name: String,
    /// The selected track of the playlist (-1 if no track is selected).
    pub selected_track: i32,
}

/// An exception/error produced by the node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    /// The message of the exception.
    pub message: Option<String>,
    /// The severity of the exception.
    pub severity: Severity,
    /// The cause of the exception.
    pub cause: String,
}

/// The severity level of the exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    /// The cause is known and expected, indicates that there is nothing wrong with tidelink itself.
    Common,
    /// The cause might not be exactly known, but is possibly caused by outside factors.
    Suspicious,
    /// The probable cause is an issue with the node or there is no way to tell what the cause might be.
    Fault,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(source: &str, identifier: &str) -> TrackData {
        TrackData {
            encoded: "QAAAjQIA".to_owned(),
            info: TrackInfoData {
                identifier: identifier.to_owned(),
                is_seekable: true,
                author: "Rick Astley".to_owned(),
                length: 212_000,
                is_stream: false,
                position: 0,
                title: "Never Gonna Give You Up".to_owned(),
                uri: Some(format!("https://www.youtube.com/watch?v={}", identifier)),
                artwork_url: None,
                isrc: Some("GBARL9300135".to_owned()),
                source_name: source.to_owned(),
            },
            plugin_info: json!({"albumName": "Whenever You Need Somebody"}),
            user_data: Value::Null,
        }
    }

    #[test]
    fn youtube_tracks_derive_a_thumbnail() {
        let track = Track::from_data(data("youtube", "dQw4w9WgXcQ"), Value::Null, None);

        assert_eq!(track.source_name, SourceName::Youtube);
        assert_eq!(
            track.thumbnail.as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/default.jpg")
        );
    }

    #[test]
    fn partial_always_retains_the_encoded_blob() {
        let track = Track::from_data(
            data("spotify", "abc123"),
            json!({"id": "42"}),
            Some(&[TrackPartial::Title, TrackPartial::Duration]),
        );

        assert_eq!(track.encoded, "QAAAjQIA");
        assert_eq!(track.title, "Never Gonna Give You Up");
        assert_eq!(track.duration, 212_000);
        assert!(track.uri.is_none());
        assert!(track.isrc.is_none());
        assert_eq!(track.requester, Value::Null);
    }

    #[test]
    fn opaque_plugin_info_round_trips_byte_identical() {
        let track = Track::from_data(data("deezer", "1109731"), Value::Null, None);
        let serialized = serde_json::to_string(&track).unwrap();
        let restored: Track = serde_json::from_str(&serialized).unwrap();

        assert_eq!(restored.plugin_info, track.plugin_info);
        assert_eq!(
            serde_json::to_vec(&restored.plugin_info).unwrap(),
            serde_json::to_vec(&track.plugin_info).unwrap()
        );
    }

    #[test]
    fn load_result_parses_every_load_type() {
        let playlist: LoadResult = serde_json::from_value(json!({
            "loadType": "playlist",
            "data": {
                "info": {"name": "Mix", "selectedTrack": -1},
                "pluginInfo": {},
                "tracks": []
            }
        }))
        .unwrap();
        assert!(matches!(playlist, LoadResult::Playlist(p) if p.info.name == "Mix"));

        let empty: LoadResult = serde_json::from_value(json!({
            "loadType": "empty",
            "data": {}
        }))
        .unwrap();
        assert!(matches!(empty, LoadResult::Empty(_)));

        let error: LoadResult = serde_json::from_value(json!({
            "loadType": "error",
            "data": {"message": "boom", "severity": "common", "cause": "upstream"}
        }))
        .unwrap();
        assert!(matches!(error, LoadResult::Error(e) if e.severity == Severity::Common));
    }
}
