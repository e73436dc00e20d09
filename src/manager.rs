//! The manager: node pool, routing policy, player registry, voice-state
//! fan-in, persistence and graceful shutdown.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{stream, StreamExt};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{spawn, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    autoplay::{source_for, AutoplaySource, LastFmSource, Platform},
    error::{Error, Result},
    events::{EventHandler, StateChange},
    model::{LoadResult, Track, TrackData, TrackEndFrame, TrackEndReason, TrackPartial},
    node::{Node, NodeOptions},
    persist::{snapshot_player, PersistedPlayer, PlayerStateStore},
    player::{Player, PlayerOptions, PlayerState},
    queue::{InMemoryQueue, JsonQueue, Queue},
    search::{self, Playlist, SearchPlatform, SearchResult, SearchResultKind},
    session::SessionStore,
    track_end,
};

/// How often orphaned player snapshots are swept, in seconds.
const ORPHAN_SWEEP_INTERVAL_SECS: u64 = 300;
/// How long in-flight player updates may drain during shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Parallelism cap for the persist-all pass.
const SHUTDOWN_PERSIST_CONCURRENCY: usize = 16;

/// Callback emitting an outbound gateway payload; the host application owns
/// the gateway socket and routes the payload to the right shard.
pub type SendCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// A plugin loaded when the manager initializes.
pub trait Plugin: Send + Sync {
    /// Name shown in diagnostics.
    fn name(&self) -> &str;
    /// Called once during [`Manager::init`].
    fn load(&self, manager: &Manager);
}

/// Routing policy when priority mode is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelector {
    /// Pick the connected node with the lowest reported CPU load.
    LeastLoad,
    /// Pick the connected node with the fewest players.
    LeastPlayers,
}

/// Which queue backend players are created with.
#[derive(Clone)]
pub enum StateStorage {
    /// In-process queues, gone when the process exits.
    Memory,
    /// One JSON file per guild under the given directory.
    Json { directory: PathBuf },
    /// Queues shared through Redis.
    #[cfg(feature = "redis-queue")]
    Redis { url: String, prefix: String },
}

/// Configuration of a [`Manager`].
pub struct ManagerOptions {
    /// Seed of the node pool.
    pub nodes: Vec<NodeOptions>,
    /// The bot user id presented to nodes.
    pub client_id: u64,
    /// Client name presented to nodes. Defaults to `tidelink/<version>`.
    pub client_name: Option<String>,
    /// Plugins loaded during [`Manager::init`].
    pub plugins: Vec<Box<dyn Plugin>>,
    /// Advance the queue automatically when a track ends.
    pub play_next_on_end: bool,
    /// Platform plain-text searches are prefixed for.
    pub default_search_platform: SearchPlatform,
    /// Ordered autoplay strategy chain.
    pub autoplay_platforms: Vec<Platform>,
    /// Enables the Last.fm autoplay fallback.
    pub lastfm_api_key: Option<String>,
    /// Bound of each queue's history.
    pub max_previous_tracks: usize,
    /// Clean marketing noise out of YouTube titles during searches.
    pub normalize_youtube_titles: bool,
    /// When set, only the listed track fields are retained on build.
    pub track_partial: Option<Vec<TrackPartial>>,
    /// Weighted-random routing over node priorities.
    pub enable_priority_mode: bool,
    /// Routing policy when priority mode is off.
    pub node_selector: NodeSelector,
    /// Queue backend for new players.
    pub state_storage: StateStorage,
    /// Root for session ids and player snapshots.
    pub data_directory: PathBuf,
    /// Outbound gateway payload callback.
    pub send: SendCallback,
    /// Receiver of every manager event.
    pub handler: Arc<dyn EventHandler>,
}

impl ManagerOptions {
    /// Initializes options with the required parameters and defaults for the
    /// rest.
    pub fn new(client_id: u64, send: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self {
            nodes: Vec::new(),
            client_id,
            client_name: None,
            plugins: Vec::new(),
            play_next_on_end: true,
            default_search_platform: SearchPlatform::Youtube,
            autoplay_platforms: vec![Platform::YouTube],
            lastfm_api_key: None,
            max_previous_tracks: 20,
            normalize_youtube_titles: false,
            track_partial: None,
            enable_priority_mode: false,
            node_selector: NodeSelector::LeastPlayers,
            state_storage: StateStorage::Memory,
            data_directory: PathBuf::from("dist/sessionData"),
            send: Arc::new(send),
            handler: Arc::new(crate::events::NoopEventHandler),
        }
    }
}

pub(crate) struct ManagerInner {
    options: ManagerOptions,
    nodes: DashMap<String, Node>,
    players: DashMap<u64, Player>,
    initiated: AtomicBool,
    sessions: SessionStore,
    store: PlayerStateStore,
    autoplay_sources: Vec<Arc<dyn AutoplaySource>>,
    lastfm: Option<Arc<LastFmSource>>,
}

/// Non-owning handle to the manager, held by nodes and players.
#[derive(Clone)]
pub(crate) struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    pub fn upgrade(&self) -> Option<Manager> {
        self.0.upgrade().map(|inner| Manager { inner })
    }
}

/// The owner of every node and player. Cheap to clone.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Builds a manager and its initial node pool. No I/O happens until
    /// [`Manager::init`].
    pub fn new(options: ManagerOptions) -> Result<Self> {
        if options.client_id == 0 {
            return Err(Error::InvalidConfig("client_id is required".to_owned()));
        }
        if options.max_previous_tracks == 0 {
            return Err(Error::InvalidConfig(
                "max_previous_tracks must be at least 1".to_owned(),
            ));
        }

        let sessions = SessionStore::new(options.data_directory.clone());
        let store = PlayerStateStore::new(options.data_directory.clone());
        let autoplay_sources = options
            .autoplay_platforms
            .iter()
            .map(|platform| source_for(*platform))
            .collect();
        let lastfm = options
            .lastfm_api_key
            .clone()
            .map(|key| Arc::new(LastFmSource::new(key)));

        let manager = Self {
            inner: Arc::new(ManagerInner {
                options,
                nodes: DashMap::new(),
                players: DashMap::new(),
                initiated: AtomicBool::new(false),
                sessions,
                store,
                autoplay_sources,
                lastfm,
            }),
        };

        for node_options in manager.inner.options.nodes.clone() {
            manager.add_node_to_pool(node_options)?;
        }

        Ok(manager)
    }

    fn weak(&self) -> WeakManager {
        WeakManager(Arc::downgrade(&self.inner))
    }

    pub(crate) fn handler(&self) -> Arc<dyn EventHandler> {
        self.inner.options.handler.clone()
    }

    pub(crate) fn play_next_on_end(&self) -> bool {
        self.inner.options.play_next_on_end
    }

    /// The platform plain-text searches default to.
    pub fn default_search_platform(&self) -> SearchPlatform {
        self.inner.options.default_search_platform
    }

    pub(crate) fn autoplay_sources(&self) -> Vec<Arc<dyn AutoplaySource>> {
        self.inner.autoplay_sources.clone()
    }

    pub(crate) fn lastfm_source(&self) -> Option<Arc<LastFmSource>> {
        self.inner.lastfm.clone()
    }

    /// Builds a [`Track`] from the wire shape, honoring `track_partial`.
    pub fn build_track(&self, data: TrackData, requester: Value) -> Track {
        Track::from_data(data, requester, self.inner.options.track_partial.as_deref())
    }

    pub(crate) fn send_voice_payload(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        self_mute: bool,
        self_deaf: bool,
    ) {
        let payload = json!({
            "op": 4,
            "d": {
                "guild_id": guild_id.to_string(),
                "channel_id": channel_id.map(|c| c.to_string()),
                "self_mute": self_mute,
                "self_deaf": self_deaf,
            }
        });

        (self.inner.options.send)(payload);
    }

    // ---- node pool ----

    fn add_node_to_pool(&self, options: NodeOptions) -> Result<Node> {
        let node = Node::new(
            self.weak(),
            options,
            self.inner.options.client_id,
            self.inner
                .options
                .client_name
                .clone()
                .unwrap_or_else(crate::client_name),
            self.inner.sessions.clone(),
        )?;

        if self.inner.nodes.contains_key(node.identifier()) {
            return Err(Error::DuplicateNode(node.identifier().to_owned()));
        }

        self.inner
            .nodes
            .insert(node.identifier().to_owned(), node.clone());
        Ok(node)
    }

    /// Adds a node to the pool, connecting it right away when the manager is
    /// already initiated.
    pub async fn create_node(&self, options: NodeOptions) -> Result<Node> {
        let node = self.add_node_to_pool(options)?;
        self.handler().node_create(node.clone()).await;

        if self.inner.initiated.load(Ordering::Acquire) {
            if let Err(e) = node.connect().await {
                warn!("node '{}' didn't connect: {}", node.identifier(), e);
                self.handler().node_error(node.clone(), e).await;
            }
        }

        Ok(node)
    }

    /// Destroys a node by identifier.
    pub async fn destroy_node(&self, identifier: &str) -> Result<()> {
        let node = self
            .node_by_identifier(identifier)
            .ok_or_else(|| Error::NodeNotFound(identifier.to_owned()))?;
        node.destroy().await;
        Ok(())
    }

    /// A snapshot of the node pool.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.nodes.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Looks a node up by identifier.
    pub fn node_by_identifier(&self, identifier: &str) -> Option<Node> {
        self.inner.nodes.get(identifier).map(|entry| entry.value().clone())
    }

    pub(crate) fn remove_node_from_pool(&self, identifier: &str) {
        self.inner.nodes.remove(identifier);
    }

    /// Destroys every player attached to a node that is going away.
    pub(crate) async fn handle_node_destroyed(&self, node: &Node) {
        let orphans: Vec<Player> = self
            .inner
            .players
            .iter()
            .filter(|entry| entry.value().node().identifier() == node.identifier())
            .map(|entry| entry.value().clone())
            .collect();

        for player in orphans {
            if let Err(e) = player.destroy(true).await {
                error!("can't cleanup player of guild {}: {}", player.guild_id(), e);
            }
        }
    }

    /// Picks a node for a new player.
    ///
    /// Priority mode takes a weighted random pick over connected nodes with a
    /// positive priority; otherwise the configured selector applies.
    pub fn useable_node(&self) -> Result<Node> {
        let connected: Vec<Node> = self
            .inner
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|node| node.connected())
            .collect();

        if connected.is_empty() {
            return Err(Error::NoUseableNodes);
        }

        if self.inner.options.enable_priority_mode {
            if let Some(node) = weighted_pick(&connected) {
                return Ok(node);
            }
        }

        let chosen = match self.inner.options.node_selector {
            NodeSelector::LeastLoad => connected.into_iter().min_by(|a, b| {
                relative_load(a)
                    .partial_cmp(&relative_load(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            NodeSelector::LeastPlayers => connected
                .into_iter()
                .min_by_key(|node| node.stats().map(|s| s.players).unwrap_or(0)),
        };

        chosen.ok_or(Error::NoUseableNodes)
    }

    // ---- player registry ----

    async fn queue_for(&self, guild_id: u64) -> Result<Arc<dyn Queue>> {
        let max_previous = self.inner.options.max_previous_tracks;

        Ok(match &self.inner.options.state_storage {
            StateStorage::Memory => Arc::new(InMemoryQueue::new(guild_id, max_previous)),
            StateStorage::Json { directory } => {
                Arc::new(JsonQueue::open(directory.clone(), guild_id, max_previous).await?)
            }
            #[cfg(feature = "redis-queue")]
            StateStorage::Redis { url, prefix } => Arc::new(
                crate::queue::RedisQueue::connect(url, prefix, guild_id, max_previous).await?,
            ),
        })
    }

    /// Creates a player for a guild, or returns the existing one.
    pub async fn create(&self, options: PlayerOptions) -> Result<Player> {
        if let Some(existing) = self.get(options.guild_id) {
            return Ok(existing);
        }

        if options.volume > 1000 {
            return Err(Error::VolumeOutOfRange(options.volume));
        }

        let node = match &options.node {
            Some(identifier) => self
                .node_by_identifier(identifier)
                .ok_or_else(|| Error::NodeNotFound(identifier.clone()))?,
            None => self.useable_node()?,
        };

        let queue = self.queue_for(options.guild_id).await?;
        let player = Player::new(self.weak(), &options, node, queue);
        self.inner.players.insert(options.guild_id, player.clone());

        info!("created player for guild {}", options.guild_id);
        self.handler().player_create(player.clone()).await;
        let snapshot = player.snapshot().await;
        player.emit_state(snapshot, StateChange::PlayerCreate).await;

        Ok(player)
    }

    /// Returns the player of a guild.
    pub fn get(&self, guild_id: u64) -> Option<Player> {
        self.inner.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// A snapshot of every player.
    pub fn players(&self) -> Vec<Player> {
        self.inner.players.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Destroys the player of a guild.
    pub async fn destroy(&self, guild_id: u64) -> Result<()> {
        let player = self.get(guild_id).ok_or(Error::PlayerNotFound(guild_id))?;
        player.destroy(true).await
    }

    pub(crate) fn remove_player_from_registry(&self, guild_id: u64) {
        self.inner.players.remove(&guild_id);
    }

    // ---- lifecycle ----

    /// Connects the node pool, loads plugins and arms the shutdown handler.
    pub async fn init(&self) -> Result<()> {
        if self.inner.initiated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for plugin in &self.inner.options.plugins {
            debug!("loading plugin '{}'", plugin.name());
            plugin.load(self);
        }

        let nodes = self.nodes();
        for node in &nodes {
            self.handler().node_create(node.clone()).await;
        }
        for node in nodes {
            if let Err(e) = node.connect().await {
                warn!("node '{}' didn't connect: {}", node.identifier(), e);
                self.handler().node_error(node, e).await;
            }
        }

        self.spawn_signal_listener();
        self.spawn_orphan_sweep();

        Ok(())
    }

    fn spawn_signal_listener(&self) {
        let manager = self.clone();

        spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received, persisting players...");

            let code = manager.shutdown().await;

            // small grace window so in-flight work can drain
            sleep(Duration::from_millis(500)).await;
            std::process::exit(code);
        });
    }

    fn spawn_orphan_sweep(&self) {
        let manager = self.clone();

        spawn(async move {
            loop {
                sleep(Duration::from_secs(ORPHAN_SWEEP_INTERVAL_SECS)).await;
                manager.sweep_orphans().await;
            }
        });
    }

    /// Removes snapshots whose guild has no player while their node is
    /// connected, meaning the resume window has already passed.
    async fn sweep_orphans(&self) {
        for state in self.inner.store.load_all().await {
            if self.get(state.guild_id).is_some() {
                continue;
            }

            let node_connected = self
                .node_by_identifier(&state.node)
                .map(|node| node.connected())
                .unwrap_or(false);

            if node_connected {
                debug!("sweeping orphaned snapshot of guild {}", state.guild_id);
                self.inner.store.delete(state.guild_id).await;
            }
        }
    }

    /// Persists every active player and closes the pool. Returns the exit
    /// code: 0 on success, 1 when any snapshot failed to write.
    pub async fn shutdown(&self) -> i32 {
        let players: Vec<Player> = self
            .players()
            .into_iter()
            .filter(|p| {
                !matches!(p.state(), PlayerState::Disconnected | PlayerState::Destroying)
            })
            .collect();

        let store = self.inner.store.clone();
        let results: Vec<Result<()>> = stream::iter(players.iter().cloned())
            .map(|player| {
                let store = store.clone();
                async move {
                    let snapshot = snapshot_player(&player).await;
                    store.save(&snapshot).await
                }
            })
            .buffer_unordered(SHUTDOWN_PERSIST_CONCURRENCY)
            .collect()
            .await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            error!("{} player snapshot(s) failed to persist", failures);
        }

        // let in-flight player updates settle before the sockets drop
        let drain = async {
            for player in &players {
                player.drain_updates().await;
            }
        };
        _ = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await;

        for node in self.nodes() {
            node.close_for_shutdown().await;
        }

        info!("shutdown complete, {} player(s) persisted", players.len() - failures);
        if failures == 0 {
            0
        } else {
            1
        }
    }

    // ---- restore ----

    /// Rebuilds the players persisted for a node whose session resumed.
    pub(crate) async fn restore_players(&self, node: &Node) {
        let mut restored = 0usize;

        for state in self.inner.store.load_all().await {
            if state.node != node.identifier() {
                continue;
            }

            if self.get(state.guild_id).is_some() {
                self.inner.store.delete(state.guild_id).await;
                continue;
            }

            match self.restore_one(node, &state).await {
                Ok(player) => {
                    restored += 1;
                    self.inner.store.delete(state.guild_id).await;
                    self.handler().player_restored(player).await;
                }
                Err(e) => {
                    // skip and continue; the orphan sweep collects the file
                    warn!("can't restore player of guild {}: {}", state.guild_id, e);
                }
            }
        }

        info!("restored {} player(s) on '{}'", restored, node.identifier());
        self.handler().restore_complete(restored).await;
    }

    async fn restore_one(&self, node: &Node, state: &PersistedPlayer) -> Result<Player> {
        let mut options = PlayerOptions::new(state.guild_id);
        options.voice_channel_id = state.voice_channel_id;
        options.text_channel_id = state.text_channel_id;
        options.node = Some(node.identifier().to_owned());
        options.volume = state.volume.min(1000);
        options.self_mute = state.self_mute;
        options.self_deaf = state.self_deaf;

        let player = self.create(options).await?;
        player.apply_persisted(state);

        let queue = player.queue();
        queue.set_current(state.current.clone()).await;
        if !state.upcoming.is_empty() {
            queue.add(state.upcoming.clone(), None).await?;
        }
        queue.set_previous(state.previous.clone()).await;

        if state.voice_channel_id.is_some() {
            player.set_state(PlayerState::Connected);
        }

        if let Err(e) = player.send_voice_update().await {
            debug!("voice update during restore failed: {}", e);
        }

        // reconcile with what the node actually still plays
        let live = node.rest().get_player(state.guild_id).await.ok();
        let adopted = match (&live, &state.current) {
            (Some(live_player), Some(persisted)) => match &live_player.track {
                Some(live_track) if live_track.encoded == persisted.encoded => {
                    player.set_paused(live_player.paused);
                    player.set_playing(!live_player.paused);
                    player.set_position(live_player.state.position);
                    true
                }
                _ => false,
            },
            _ => false,
        };

        if !adopted {
            if let Some(current) = &state.current {
                // the node moved on: run the ordinary end-of-track path
                track_end::handle_track_end(
                    &player,
                    TrackEndFrame {
                        guild_id: state.guild_id.to_string(),
                        track: current.to_data(),
                        reason: TrackEndReason::Finished,
                    },
                )
                .await;
            }
        }

        Ok(player)
    }

    // ---- voice-state fan-in ----

    /// Accepts a raw gateway packet (enveloped or inner object) and routes
    /// it to the right player.
    pub async fn update_voice_state(&self, payload: Value) -> Result<()> {
        let (kind, data) = match payload.get("t").and_then(|t| t.as_str()) {
            Some(t) => (
                t.to_owned(),
                payload.get("d").cloned().unwrap_or(Value::Null),
            ),
            None => {
                if payload.get("token").is_some() {
                    ("VOICE_SERVER_UPDATE".to_owned(), payload)
                } else if payload.get("session_id").is_some() {
                    ("VOICE_STATE_UPDATE".to_owned(), payload)
                } else {
                    return Ok(());
                }
            }
        };

        match kind.as_str() {
            "VOICE_SERVER_UPDATE" => {
                let update: VoiceServerPayload =
                    serde_json::from_value(data).map_err(Error::Json)?;
                self.handle_voice_server_update(update).await
            }
            "VOICE_STATE_UPDATE" => {
                let update: VoiceStatePayload =
                    serde_json::from_value(data).map_err(Error::Json)?;
                self.handle_voice_state_update(update).await
            }
            _ => Ok(()),
        }
    }

    async fn handle_voice_server_update(&self, update: VoiceServerPayload) -> Result<()> {
        let guild_id = parse_snowflake(&update.guild_id)?;
        let Some(player) = self.get(guild_id) else {
            return Ok(());
        };

        let Some(endpoint) = update.endpoint else {
            // the voice server is reallocating, a new event follows
            return Ok(());
        };

        player.set_voice_server(update.token, endpoint);
        player.send_voice_update().await
    }

    async fn handle_voice_state_update(&self, update: VoiceStatePayload) -> Result<()> {
        if parse_snowflake(&update.user_id)? != self.inner.options.client_id {
            return Ok(());
        }

        let Some(guild_id) = update.guild_id else {
            return Ok(());
        };
        let guild_id = parse_snowflake(&guild_id)?;
        let Some(player) = self.get(guild_id) else {
            return Ok(());
        };

        player.set_voice_session_id(update.session_id);

        match update.channel_id {
            Some(channel_id) => {
                let channel_id = parse_snowflake(&channel_id)?;
                let old_channel = player.voice_channel_id();

                if old_channel != Some(channel_id) {
                    let old = player.snapshot().await;
                    player.set_voice_channel(Some(channel_id));
                    player.set_state(PlayerState::Connected);

                    self.handler()
                        .player_move(player.clone(), old_channel, channel_id)
                        .await;
                    player
                        .emit_state(
                            old,
                            StateChange::ChannelChange {
                                old_channel,
                                new_channel: Some(channel_id),
                            },
                        )
                        .await;
                }

                player.send_voice_update().await
            }
            None => {
                let old_channel = player.voice_channel_id();
                self.handler()
                    .player_disconnect(player.clone(), old_channel)
                    .await;

                // the gateway already dropped the channel, no leave payload
                player.destroy(false).await
            }
        }
    }

    // ---- search ----

    /// Resolves a query through a useable node, building tracks and the
    /// playlist descriptor.
    pub async fn search(&self, query: &str, requester: Value) -> Result<SearchResult> {
        let node = self.useable_node()?;
        self.search_on(&node, query, requester).await
    }

    /// Like [`Manager::search`], pinned to a specific node.
    pub async fn search_on(
        &self,
        node: &Node,
        query: &str,
        requester: Value,
    ) -> Result<SearchResult> {
        let identifier =
            search::build_identifier(query, self.inner.options.default_search_platform);
        let result = node.rest().load_tracks(&identifier).await?;

        let build = |mut data: TrackData, requester: Value| {
            if self.inner.options.normalize_youtube_titles
                && data.info.source_name.eq_ignore_ascii_case("youtube")
            {
                data.info.title =
                    search::normalize_youtube_title(&data.info.title, &data.info.author);
            }
            self.build_track(data, requester)
        };

        Ok(match result {
            LoadResult::Track(track) => SearchResult {
                kind: SearchResultKind::Track,
                tracks: vec![build(*track, requester)],
                playlist: None,
            },
            LoadResult::Search(tracks) => SearchResult {
                kind: SearchResultKind::Search,
                tracks: tracks
                    .into_iter()
                    .map(|t| build(t, requester.clone()))
                    .collect(),
                playlist: None,
            },
            LoadResult::Playlist(playlist) => {
                let tracks: Vec<Track> = playlist
                    .tracks
                    .into_iter()
                    .map(|t| build(t, requester.clone()))
                    .collect();

                let descriptor = Playlist {
                    name: playlist.info.name,
                    selected_track: usize::try_from(playlist.info.selected_track).ok(),
                    duration: tracks.iter().map(|t| t.duration).sum(),
                };

                SearchResult {
                    kind: SearchResultKind::Playlist,
                    tracks,
                    playlist: Some(descriptor),
                }
            }
            LoadResult::Empty(_) => SearchResult {
                kind: SearchResultKind::Empty,
                tracks: Vec::new(),
                playlist: None,
            },
            LoadResult::Error(exception) => return Err(Error::TrackLoadFailed(exception)),
        })
    }

    /// Decodes encoded track blobs through a useable node.
    pub async fn decode_tracks(&self, encoded: &[String], requester: Value) -> Result<Vec<Track>> {
        let node = self.useable_node()?;
        let tracks = node.rest().decode_tracks(encoded).await?;

        Ok(tracks
            .into_iter()
            .map(|data| self.build_track(data, requester.clone()))
            .collect())
    }
}

fn relative_load(node: &Node) -> f64 {
    node.stats()
        .map(|stats| {
            if stats.cpu.cores == 0 {
                0.0
            } else {
                stats.cpu.lavalink_load / stats.cpu.cores as f64 * 100.0
            }
        })
        .unwrap_or(0.0)
}

/// Weighted random pick over nodes with a positive priority; `None` when no
/// node carries a weight.
fn weighted_pick(nodes: &[Node]) -> Option<Node> {
    let total: u64 = nodes.iter().map(|n| u64::from(n.options().priority)).sum();
    if total == 0 {
        return None;
    }

    let mut roll = rand::thread_rng().gen_range(0..total);
    for node in nodes {
        let weight = u64::from(node.options().priority);
        if roll < weight {
            return Some(node.clone());
        }
        roll -= weight;
    }

    nodes.last().cloned()
}

fn parse_snowflake(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|_| Error::InvalidArgument(format!("'{}' isn't a snowflake", raw)))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("can't install the SIGTERM handler: {}", e);
                _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        _ = tokio::signal::ctrl_c().await;
    }
}

#[derive(Deserialize)]
struct VoiceServerPayload {
    token: String,
    guild_id: String,
    endpoint: Option<String>,
}

#[derive(Deserialize)]
struct VoiceStatePayload {
    guild_id: Option<String>,
    user_id: String,
    session_id: String,
    channel_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_and_inner_payloads_both_classify() {
        let envelope = json!({
            "t": "VOICE_SERVER_UPDATE",
            "d": {"token": "tok", "guild_id": "1", "endpoint": "voice.example.com"}
        });
        let inner: VoiceServerPayload =
            serde_json::from_value(envelope["d"].clone()).unwrap();
        assert_eq!(inner.token, "tok");

        let state = json!({
            "guild_id": "1",
            "user_id": "42",
            "session_id": "abc",
            "channel_id": null
        });
        let parsed: VoiceStatePayload = serde_json::from_value(state).unwrap();
        assert!(parsed.channel_id.is_none());
    }

    #[test]
    fn snowflakes_must_be_numeric() {
        assert_eq!(parse_snowflake("81384788765712384").unwrap(), 81384788765712384);
        assert!(parse_snowflake("not-a-snowflake").is_err());
    }
}
