//! The manager event hub: a closed set of events delivered to one
//! [`EventHandler`] implementation.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::Error,
    model::{
        Chapter, Exception, Lyrics, LyricsLine, SponsorSegment, Track, TrackEndReason,
        WebSocketClosedFrame,
    },
    node::Node,
    player::{Player, PlayerState},
    queue::QueueAction,
};

/// The repeat mode a player ends up in after a repeat change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    None,
    Track,
    Queue,
    Dynamic,
}

/// What kind of track transition a [`StateChange::TrackChange`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackChangeKind {
    Start,
    End,
    Previous,
    TimeUpdate,
    AutoPlay,
}

/// Typed description of the single mutation behind a state-update event.
#[derive(Debug, Clone)]
pub enum StateChange {
    AutoplayChange {
        enabled: bool,
    },
    ConnectionChange {
        connected: bool,
    },
    RepeatChange(RepeatMode),
    PauseChange {
        paused: bool,
    },
    QueueChange(QueueAction),
    TrackChange(TrackChangeKind),
    VolumeChange {
        volume: u16,
    },
    ChannelChange {
        old_channel: Option<u64>,
        new_channel: Option<u64>,
    },
    PlayerCreate,
    PlayerDestroy,
    FilterChange,
}

/// Shallow copy of a player's scalar state, captured before a mutation.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub guild_id: u64,
    pub voice_channel_id: Option<u64>,
    pub text_channel_id: Option<u64>,
    /// Identifier of the node the player was attached to.
    pub node: String,
    pub volume: u16,
    pub playing: bool,
    pub paused: bool,
    pub position: u64,
    pub state: PlayerState,
    pub track_repeat: bool,
    pub queue_repeat: bool,
    pub dynamic_repeat: bool,
    pub autoplay: bool,
    /// The current track at capture time.
    pub current: Option<Track>,
    /// How many tracks were queued at capture time.
    pub upcoming_count: usize,
    /// How many previous tracks were held at capture time.
    pub previous_count: usize,
}

/// Event handler used by the manager to deliver everything that happens in
/// the pool. All methods default to doing nothing, implement what you need.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Internal diagnostics that don't fit any other event.
    async fn debug(&self, _message: String) {}

    /// A node was added to the pool.
    async fn node_create(&self, _node: Node) {}
    /// A node finished its websocket handshake.
    async fn node_connect(&self, _node: Node) {}
    /// A node is about to retry its websocket connection.
    async fn node_reconnect(&self, _node: Node, _attempt: u32) {}
    /// A node websocket closed.
    async fn node_disconnect(&self, _node: Node, _code: u16, _reason: String) {}
    /// A node was removed from the pool.
    async fn node_destroy(&self, _node: Node) {}
    /// A node produced an error outside of a direct call.
    async fn node_error(&self, _node: Node, _error: Error) {}
    /// A raw frame arrived on a node websocket, before any parsing.
    async fn node_raw(&self, _node: Node, _payload: Value) {}

    /// A player was created.
    async fn player_create(&self, _player: Player) {}
    /// A player was destroyed.
    async fn player_destroy(&self, _player: Player) {}
    /// A player was disconnected from its voice channel by the gateway.
    async fn player_disconnect(&self, _player: Player, _old_channel: Option<u64>) {}
    /// A player was moved between voice channels by the gateway.
    async fn player_move(&self, _player: Player, _old_channel: Option<u64>, _new_channel: u64) {}
    /// A player was restored from persisted state after a session resume.
    async fn player_restored(&self, _player: Player) {}
    /// One state mutation was applied to a player.
    async fn player_state_update(
        &self,
        _old_player: PlayerSnapshot,
        _player: Player,
        _change: StateChange,
    ) {
    }

    /// The queue ran out and autoplay found nothing to continue with.
    async fn queue_end(&self, _player: Player, _last_track: Option<Track>) {}

    /// A track started playing.
    async fn track_start(&self, _player: Player, _track: Track) {}
    /// A track ended.
    async fn track_end(&self, _player: Player, _track: Track, _reason: TrackEndReason) {}
    /// A track got stuck while playing.
    async fn track_stuck(&self, _player: Player, _track: Track, _threshold_ms: u64) {}
    /// A track threw an exception on the node.
    async fn track_error(&self, _player: Player, _track: Option<Track>, _exception: Exception) {}

    /// The node's connection to the voice gateway closed.
    async fn socket_closed(&self, _player: Player, _frame: WebSocketClosedFrame) {}

    /// The sponsorblock plugin loaded segments for the current track.
    async fn segments_loaded(&self, _player: Player, _segments: Vec<SponsorSegment>) {}
    /// The sponsorblock plugin skipped a segment.
    async fn segment_skipped(&self, _player: Player, _segment: SponsorSegment) {}
    /// The sponsorblock plugin loaded chapters for the current track.
    async fn chapters_loaded(&self, _player: Player, _chapters: Vec<Chapter>) {}
    /// A chapter of the current track started.
    async fn chapter_started(&self, _player: Player, _chapter: Chapter) {}

    /// Every player persisted before shutdown was restored (or swept).
    async fn restore_complete(&self, _restored: usize) {}

    /// Lyrics were found for the current track.
    async fn lyrics_found(&self, _player: Player, _lyrics: Lyrics) {}
    /// A timestamped lyrics line is live.
    async fn lyrics_line(&self, _player: Player, _line: LyricsLine) {}
    /// No lyrics were found for the current track.
    async fn lyrics_not_found(&self, _player: Player) {}
}

/// Handler that ignores every event. Useful as a default and in tests.
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {}
