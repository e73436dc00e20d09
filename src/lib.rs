//! # tidelink
//!
//! A client-side orchestrator for Lavalink-compatible audio nodes made with
//! tokio, independent of the Discord library.
//!
//! tidelink keeps one [`Player`] per guild consistent with a pool of remote
//! audio nodes: it drives them over the `/v4` REST API, follows their
//! websocket event stream, survives reconnects with session resuming, moves
//! players between nodes, and persists enough state to come back from a
//! restart.
//!
//! The host application owns the gateway socket. It forwards voice packets
//! to [`Manager::update_voice_state`] and receives outbound voice-channel
//! join payloads through the `send` callback in [`ManagerOptions`]; no
//! gateway transport is implemented here.
//!
//! ## Features
//!
//! - `redis-queue` = queues stored in Redis instead of process memory.
//! - `rustls-webpki-roots` (default), `rustls-native-roots`, `native-tls` =
//!   TLS root selection for REST and websocket connections.

mod autoplay;
mod error;
mod events;
mod filters;
mod manager;
mod model;
mod node;
mod persist;
mod player;
mod queue;
mod rest;
mod search;
mod session;
mod track_end;

pub use autoplay::{AutoplaySource, Platform};
pub use error::{Error, ErrorCode, Result};
pub use events::{
    EventHandler, NoopEventHandler, PlayerSnapshot, RepeatMode, StateChange, TrackChangeKind,
};
pub use filters::{Band, Distortion, Filters, Karaoke, Preset, Rotation, Timescale, Vibrato};
pub use manager::{
    Manager, ManagerOptions, NodeSelector, Plugin, SendCallback, StateStorage,
};
pub use model::*;
pub use node::{Node, NodeOptions, NodeState};
pub use persist::{PersistedPlayer, PersistedVoice};
pub use player::{
    PlayOptions, Player, PlayerOptions, PlayerState, DATA_AUTOPLAY_BOT_USER, DATA_PREVIOUS_SKIP,
};
pub use queue::{InMemoryQueue, JsonQueue, Queue, QueueAction, QueueExt};
#[cfg(feature = "redis-queue")]
pub use queue::RedisQueue;
pub use rest::{ErrorResponse, PlayerData, RestClient, UpdatePlayerData, VoiceData};
pub use search::{Playlist, SearchPlatform, SearchResult, SearchResultKind};
pub use session::SessionStore;

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client name presented to nodes in headers and user agents.
pub(crate) fn client_name() -> String {
    format!("tidelink/{}", VERSION)
}
