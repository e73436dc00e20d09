use serde::Deserialize;

use super::{Exception, TrackData};

/// Types of operations that can be emitted by the node.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpType {
    /// Emitted when the websocket connection is accepted.
    Ready,
    /// Emitted every x seconds with the latest player state.
    PlayerUpdate,
    /// Emitted when the node sends stats once per minute.
    Stats,
    /// Emitted when a player or voice event happens.
    Event,
}

/// Object used internally by the message parser to detect the type of operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpEnvelope {
    /// The op type.
    pub op: OpType,
}

/// Frame sent by the node when the connection is established.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyFrame {
    /// If a session was resumed.
    pub resumed: bool,
    /// The node session ID of this connection. Not to be confused with a voice session id.
    pub session_id: String,
}

/// Periodic player state report.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateFrame {
    /// The guild id.
    pub guild_id: String,
    /// The reported state.
    pub state: PlayerUpdateState,
}

/// State carried by a `playerUpdate` frame.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    /// Unix timestamp of the report in milliseconds.
    pub time: u64,
    /// The position of the track in milliseconds.
    pub position: u64,
    /// Whether the node is connected to the voice gateway.
    pub connected: bool,
    /// Roundtrip latency to the voice gateway in milliseconds (-1 if not connected).
    pub ping: i64,
}

/// Types of events that can be emitted by the node.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    /// Emitted when a track starts playing.
    TrackStartEvent,
    /// Emitted when a track ends.
    TrackEndEvent,
    /// Emitted when a track throws an exception.
    TrackExceptionEvent,
    /// Emitted when a track gets stuck while playing.
    TrackStuckEvent,
    /// Emitted when the websocket connection to the voice gateway is closed.
    WebSocketClosedEvent,
    /// Emitted when the sponsorblock plugin loads segments for a track.
    SegmentsLoaded,
    /// Emitted when the sponsorblock plugin skips a segment.
    SegmentSkipped,
    /// Emitted when the sponsorblock plugin loads chapters for a track.
    ChaptersLoaded,
    /// Emitted when a chapter starts.
    ChapterStarted,
}

/// Object used internally by the message parser to detect the type of event
/// in the case of the `event` operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventEnvelope {
    #[serde(rename = "type")]
    /// The type of event.
    pub event_type: EventType,
}

/// Information about the track that was started.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStartFrame {
    /// The guild id.
    pub guild_id: String,
    /// The track that started playing.
    pub track: TrackData,
}

/// The reason why a track was finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    /// The track finished playing. (May start next? Yes)
    Finished,
    /// The track failed to load. (May start next? Yes)
    LoadFailed,
    /// The track was stopped. (May start next? No)
    Stopped,
    /// The track was replaced. (May start next? No)
    Replaced,
    /// The track was cleaned up. (May start next? No)
    Cleanup,
}

/// Information about the track that was finished.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEndFrame {
    /// The guild id.
    pub guild_id: String,
    /// The track that ended playing.
    pub track: TrackData,
    /// The reason the track ended.
    pub reason: TrackEndReason,
}

/// Information about the track that threw an exception.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionFrame {
    /// The guild id.
    pub guild_id: String,
    /// The track that threw the exception.
    pub track: TrackData,
    /// The exception that occurred.
    pub exception: Exception,
}

/// Information about the track that got stuck.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuckFrame {
    /// The guild id.
    pub guild_id: String,
    /// The track that got stuck.
    pub track: TrackData,
    /// The threshold in milliseconds that was exceeded.
    pub threshold_ms: u64,
}

/// Information about the voice gateway connection that was closed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosedFrame {
    /// The guild id.
    pub guild_id: String,
    /// The close code.
    pub code: u16,
    /// The close reason.
    pub reason: String,
    /// Whether the connection was closed by the remote side.
    pub by_remote: bool,
}

/// A skippable segment reported by the sponsorblock plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorSegment {
    /// The category of the segment.
    pub category: String,
    /// Segment start in milliseconds.
    pub start: u64,
    /// Segment end in milliseconds.
    pub end: u64,
}

/// A chapter reported by the sponsorblock plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// The chapter name.
    pub name: String,
    /// Chapter start in milliseconds.
    pub start: u64,
    /// Chapter end in milliseconds.
    pub end: u64,
    /// Chapter duration in milliseconds.
    pub duration: u64,
}

/// Segments loaded for the current track.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentsLoadedFrame {
    /// The guild id.
    pub guild_id: String,
    /// The loaded segments.
    pub segments: Vec<SponsorSegment>,
}

/// A segment was skipped for the current track.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSkippedFrame {
    /// The guild id.
    pub guild_id: String,
    /// The skipped segment.
    pub segment: SponsorSegment,
}

/// Chapters loaded for the current track.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaptersLoadedFrame {
    /// The guild id.
    pub guild_id: String,
    /// The loaded chapters.
    pub chapters: Vec<Chapter>,
}

/// A chapter of the current track started.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterStartedFrame {
    /// The guild id.
    pub guild_id: String,
    /// The chapter that started.
    pub chapter: Chapter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_detect_op_and_event_type() {
        let op: OpEnvelope =
            serde_json::from_str(r#"{"op":"playerUpdate","guildId":"1"}"#).unwrap();
        assert!(matches!(op.op, OpType::PlayerUpdate));

        let event: EventEnvelope =
            serde_json::from_str(r#"{"op":"event","type":"SegmentSkipped"}"#).unwrap();
        assert!(matches!(event.event_type, EventType::SegmentSkipped));
    }

    #[test]
    fn track_end_reason_uses_the_wire_spelling() {
        let frame: TrackEndFrame = serde_json::from_str(
            r#"{
                "op": "event",
                "type": "TrackEndEvent",
                "guildId": "1",
                "track": {
                    "encoded": "QAAAjQIA",
                    "info": {
                        "identifier": "dQw4w9WgXcQ",
                        "isSeekable": true,
                        "author": "a",
                        "length": 1000,
                        "isStream": false,
                        "position": 0,
                        "title": "t",
                        "uri": null,
                        "artworkUrl": null,
                        "isrc": null,
                        "sourceName": "youtube"
                    }
                },
                "reason": "loadFailed"
            }"#,
        )
        .unwrap();

        assert_eq!(frame.reason, TrackEndReason::LoadFailed);
    }
}
