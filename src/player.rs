//! The per-guild player: playback state machine, queue orchestration,
//! repeat/autoplay policy and node migration.

use std::sync::{
    atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering},
    Arc, RwLock,
};

use dashmap::DashMap;
use serde_json::Value;
use tokio::{spawn, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    events::{PlayerSnapshot, RepeatMode, StateChange, TrackChangeKind},
    filters::{Band, Distortion, Filters, Karaoke, Preset, Rotation, Timescale, Vibrato},
    manager::{Manager, WeakManager},
    model::{Lyrics, PlayerUpdateState, Track, TrackData},
    node::Node,
    queue::{Queue, QueueAction},
    rest::{UpdatePlayerData, VoiceData},
};

/// Data-map key holding the bot user reference autoplay plays on behalf of.
pub const DATA_AUTOPLAY_BOT_USER: &str = "internal.autoplayBotUser";
/// Data-map key flagging that the next track end came from `previous()`.
pub const DATA_PREVIOUS_SKIP: &str = "internal.previousSkip";

/// Options used by [`crate::manager::Manager::create`] to build a player.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// The guild this player belongs to.
    pub guild_id: u64,
    /// The voice channel to connect to.
    pub voice_channel_id: Option<u64>,
    /// The text channel associated with this player.
    pub text_channel_id: Option<u64>,
    /// Identifier of the node to attach to. Routed automatically when unset.
    pub node: Option<String>,
    /// Initial volume, 0 to 1000.
    pub volume: u16,
    /// Join the voice channel muted.
    pub self_mute: bool,
    /// Join the voice channel deafened.
    pub self_deaf: bool,
}

impl PlayerOptions {
    /// Initializes options for a guild with the defaults for everything else.
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            voice_channel_id: None,
            text_channel_id: None,
            node: None,
            volume: 100,
            self_mute: false,
            self_deaf: true,
        }
    }
}

/// Connection lifecycle of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Destroying,
}

/// Options for a single play call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    /// Where to start playback, in milliseconds.
    pub start_time: Option<u64>,
    /// Where to stop playback, in milliseconds.
    pub end_time: Option<u64>,
    /// Don't replace a track the node is already playing.
    pub no_replace: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct VoiceSession {
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub endpoint: Option<String>,
}

impl VoiceSession {
    pub fn as_voice_data(&self) -> Option<VoiceData> {
        Some(VoiceData {
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
            session_id: self.session_id.clone()?,
        })
    }
}

struct PlayerInner {
    guild_id: u64,
    manager: WeakManager,
    node: RwLock<Node>,
    queue: Arc<dyn Queue>,
    filters: RwLock<Filters>,
    voice_channel_id: RwLock<Option<u64>>,
    text_channel_id: RwLock<Option<u64>>,
    volume: AtomicU16,
    playing: AtomicBool,
    paused: AtomicBool,
    position: AtomicU64,
    state: RwLock<PlayerState>,
    track_repeat: AtomicBool,
    queue_repeat: AtomicBool,
    dynamic_repeat: AtomicBool,
    dynamic_repeat_interval: AtomicU64,
    dynamic_repeat_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
    autoplay: AtomicBool,
    autoplay_tries: AtomicU32,
    self_mute: AtomicBool,
    self_deaf: AtomicBool,
    voice: RwLock<VoiceSession>,
    data: DashMap<String, Value>,
    /// Serializes player-update REST calls for this guild.
    update_lock: tokio::sync::Mutex<()>,
}

/// Player for one guild. Cheap to clone, all clones share state.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub(crate) fn new(
        manager: WeakManager,
        options: &PlayerOptions,
        node: Node,
        queue: Arc<dyn Queue>,
    ) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                guild_id: options.guild_id,
                manager,
                node: RwLock::new(node),
                queue,
                filters: RwLock::new(Filters::default()),
                voice_channel_id: RwLock::new(options.voice_channel_id),
                text_channel_id: RwLock::new(options.text_channel_id),
                volume: AtomicU16::new(options.volume.min(1000)),
                playing: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                position: AtomicU64::new(0),
                state: RwLock::new(PlayerState::Disconnected),
                track_repeat: AtomicBool::new(false),
                queue_repeat: AtomicBool::new(false),
                dynamic_repeat: AtomicBool::new(false),
                dynamic_repeat_interval: AtomicU64::new(0),
                dynamic_repeat_timer: std::sync::Mutex::new(None),
                autoplay: AtomicBool::new(false),
                autoplay_tries: AtomicU32::new(3),
                self_mute: AtomicBool::new(options.self_mute),
                self_deaf: AtomicBool::new(options.self_deaf),
                voice: RwLock::new(VoiceSession::default()),
                data: DashMap::new(),
                update_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The guild this player belongs to.
    pub fn guild_id(&self) -> u64 {
        self.inner.guild_id
    }

    /// The node this player currently drives.
    pub fn node(&self) -> Node {
        self.inner.node.read().unwrap().clone()
    }

    /// The queue of this player.
    pub fn queue(&self) -> Arc<dyn Queue> {
        self.inner.queue.clone()
    }

    /// The voice channel this player is bound to.
    pub fn voice_channel_id(&self) -> Option<u64> {
        *self.inner.voice_channel_id.read().unwrap()
    }

    /// The text channel associated with this player.
    pub fn text_channel_id(&self) -> Option<u64> {
        *self.inner.text_channel_id.read().unwrap()
    }

    /// Binds this player to another text channel.
    pub fn set_text_channel_id(&self, channel: Option<u64>) {
        *self.inner.text_channel_id.write().unwrap() = channel;
    }

    /// The current volume, 0 to 1000.
    pub fn volume(&self) -> u16 {
        self.inner.volume.load(Ordering::Acquire)
    }

    /// Whether the player has an active track.
    pub fn playing(&self) -> bool {
        self.inner.playing.load(Ordering::Acquire)
    }

    /// Whether playback is paused.
    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Last known playback position in milliseconds.
    pub fn position(&self) -> u64 {
        self.inner.position.load(Ordering::Acquire)
    }

    /// The connection lifecycle state.
    pub fn state(&self) -> PlayerState {
        *self.inner.state.read().unwrap()
    }

    /// Whether the current track repeats on end.
    pub fn track_repeat(&self) -> bool {
        self.inner.track_repeat.load(Ordering::Acquire)
    }

    /// Whether ended tracks are re-appended to the queue tail.
    pub fn queue_repeat(&self) -> bool {
        self.inner.queue_repeat.load(Ordering::Acquire)
    }

    /// Whether queue repeat with periodic reshuffling is active.
    pub fn dynamic_repeat(&self) -> bool {
        self.inner.dynamic_repeat.load(Ordering::Acquire)
    }

    /// Whether autoplay continues playback when the queue runs out.
    pub fn is_autoplay(&self) -> bool {
        self.inner.autoplay.load(Ordering::Acquire)
    }

    /// How many recommendation attempts autoplay makes per queue end.
    pub fn autoplay_tries(&self) -> u32 {
        self.inner.autoplay_tries.load(Ordering::Acquire)
    }

    /// The current track, if any.
    pub async fn current(&self) -> Option<Track> {
        self.inner.queue.current().await
    }

    /// Stores a free-form value on this player.
    pub fn set_data(&self, key: &str, value: Value) {
        self.inner.data.insert(key.to_owned(), value);
    }

    /// Reads a free-form value from this player.
    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.inner.data.get(key).map(|v| v.clone())
    }

    /// Removes a free-form value from this player.
    pub fn remove_data(&self, key: &str) -> Option<Value> {
        self.inner.data.remove(key).map(|(_, v)| v)
    }

    /// A copy of the accumulated filter state.
    pub fn filters(&self) -> Filters {
        self.inner.filters.read().unwrap().clone()
    }

    pub(crate) fn manager(&self) -> Option<Manager> {
        self.inner.manager.upgrade()
    }

    pub(crate) fn set_state(&self, state: PlayerState) {
        *self.inner.state.write().unwrap() = state;
    }

    pub(crate) fn set_playing(&self, playing: bool) {
        self.inner.playing.store(playing, Ordering::Release);
    }

    pub(crate) fn set_position(&self, position: u64) {
        self.inner.position.store(position, Ordering::Release);
    }

    pub(crate) fn voice_session(&self) -> VoiceSession {
        self.inner.voice.read().unwrap().clone()
    }

    pub(crate) fn set_voice_session_id(&self, session_id: String) {
        self.inner.voice.write().unwrap().session_id = Some(session_id);
    }

    pub(crate) fn set_voice_server(&self, token: String, endpoint: String) {
        let mut voice = self.inner.voice.write().unwrap();
        voice.token = Some(token);
        voice.endpoint = Some(endpoint);
    }

    pub(crate) fn set_voice_channel(&self, channel: Option<u64>) {
        *self.inner.voice_channel_id.write().unwrap() = channel;
    }

    /// Consumes the previous-skip flag set by [`Player::previous`].
    pub(crate) fn take_previous_skip(&self) -> bool {
        self.inner.data.remove(DATA_PREVIOUS_SKIP).is_some()
    }

    pub(crate) fn dynamic_repeat_interval(&self) -> u64 {
        self.inner.dynamic_repeat_interval.load(Ordering::Acquire)
    }

    pub(crate) fn self_mute(&self) -> bool {
        self.inner.self_mute.load(Ordering::Acquire)
    }

    pub(crate) fn self_deaf(&self) -> bool {
        self.inner.self_deaf.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::Release);
    }

    /// Reapplies flags and scalar state from a persisted snapshot. Purely
    /// local, nothing is sent to the node.
    pub(crate) fn apply_persisted(&self, state: &crate::persist::PersistedPlayer) {
        self.inner.volume.store(state.volume.min(1000), Ordering::Release);
        self.inner.paused.store(state.paused, Ordering::Release);
        self.inner.position.store(state.position, Ordering::Release);
        self.inner.track_repeat.store(state.track_repeat, Ordering::Release);
        self.inner.queue_repeat.store(state.queue_repeat, Ordering::Release);
        self.inner
            .dynamic_repeat_interval
            .store(state.dynamic_repeat_interval, Ordering::Release);
        self.inner.dynamic_repeat.store(state.dynamic_repeat, Ordering::Release);
        if state.dynamic_repeat {
            self.start_dynamic_timer();
        }

        self.inner.autoplay.store(state.autoplay, Ordering::Release);
        self.inner
            .autoplay_tries
            .store(state.autoplay_tries.max(1), Ordering::Release);
        if let Some(bot_user) = &state.autoplay_bot_user {
            self.set_data(DATA_AUTOPLAY_BOT_USER, bot_user.clone());
        }

        let mut voice = self.inner.voice.write().unwrap();
        voice.session_id = state.voice.session_id.clone();
        voice.token = state.voice.token.clone();
        voice.endpoint = state.voice.endpoint.clone();
    }

    /// The requester autoplay tracks are attributed to.
    pub(crate) fn autoplay_requester(&self) -> Value {
        self.get_data(DATA_AUTOPLAY_BOT_USER).unwrap_or(Value::Null)
    }

    /// Shallow snapshot of the scalar state, captured before mutations.
    pub async fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            guild_id: self.inner.guild_id,
            voice_channel_id: self.voice_channel_id(),
            text_channel_id: self.text_channel_id(),
            node: self.node().identifier().to_owned(),
            volume: self.volume(),
            playing: self.playing(),
            paused: self.paused(),
            position: self.position(),
            state: self.state(),
            track_repeat: self.track_repeat(),
            queue_repeat: self.queue_repeat(),
            dynamic_repeat: self.dynamic_repeat(),
            autoplay: self.is_autoplay(),
            current: self.inner.queue.current().await,
            upcoming_count: self.inner.queue.size().await,
            previous_count: self.inner.queue.previous().await.len(),
        }
    }

    pub(crate) async fn emit_state(&self, old: PlayerSnapshot, change: StateChange) {
        if let Some(manager) = self.manager() {
            manager
                .handler()
                .player_state_update(old, self.clone(), change)
                .await;
        }
    }

    /// Sends a player update to the node, serialized per guild.
    pub(crate) async fn update_node(
        &self,
        data: &UpdatePlayerData,
        no_replace: bool,
    ) -> Result<()> {
        let node = self.node();
        let _guard = self.inner.update_lock.lock().await;
        node.rest()
            .update_player(self.inner.guild_id, data, no_replace)
            .await
            .map(|_| ())
    }

    /// Waits until any in-flight player update for this guild has settled.
    pub(crate) async fn drain_updates(&self) {
        drop(self.inner.update_lock.lock().await);
    }

    fn send_voice_payload(&self, channel: Option<u64>) -> Result<()> {
        let manager = self.manager().ok_or_else(|| {
            Error::InvalidState("the manager owning this player is gone".to_owned())
        })?;

        manager.send_voice_payload(
            self.inner.guild_id,
            channel,
            self.inner.self_mute.load(Ordering::Acquire),
            self.inner.self_deaf.load(Ordering::Acquire),
        );
        Ok(())
    }

    /// Joins the configured voice channel by emitting the gateway payload
    /// through the manager's send callback.
    pub async fn connect(&self) -> Result<()> {
        let channel = self.voice_channel_id().ok_or(Error::VoiceChannelMissing)?;
        let old = self.snapshot().await;

        self.set_state(PlayerState::Connecting);
        self.send_voice_payload(Some(channel))?;
        self.set_state(PlayerState::Connected);

        self.emit_state(old, StateChange::ConnectionChange { connected: true })
            .await;
        Ok(())
    }

    /// Leaves the voice channel, pausing playback first.
    pub async fn disconnect(&self) -> Result<()> {
        if self.state() == PlayerState::Disconnected {
            return Ok(());
        }
        let old = self.snapshot().await;

        self.set_state(PlayerState::Disconnecting);
        if self.playing() && !self.paused() {
            if let Err(e) = self.pause_silent(true).await {
                debug!("pause before disconnect failed: {}", e);
            }
        }

        self.send_voice_payload(None)?;
        self.set_voice_channel(None);
        self.set_state(PlayerState::Disconnected);

        self.emit_state(old, StateChange::ConnectionChange { connected: false })
            .await;
        Ok(())
    }

    /// Destroys this player: leaves the voice channel, removes the remote
    /// player and deregisters from the manager.
    pub async fn destroy(&self, disconnect: bool) -> Result<()> {
        if self.state() == PlayerState::Destroying {
            return Ok(());
        }
        let old = self.snapshot().await;
        self.set_state(PlayerState::Destroying);

        self.cancel_dynamic_timer();

        if disconnect && self.voice_channel_id().is_some() {
            if let Err(e) = self.send_voice_payload(None) {
                debug!("voice leave during destroy failed: {}", e);
            }
            self.set_voice_channel(None);
        }

        let node = self.node();
        if node.session_id().is_some() {
            if let Err(e) = node.rest().destroy_player(self.inner.guild_id).await {
                warn!("remote destroy for guild {} failed: {}", self.inner.guild_id, e);
            }
        }

        self.inner.queue.clear().await;
        self.inner.queue.set_current(None).await;
        self.inner.queue.clear_previous().await;
        self.inner.queue.dispose().await;

        if let Some(manager) = self.manager() {
            manager.remove_player_from_registry(self.inner.guild_id);
            self.emit_state(old, StateChange::PlayerDestroy).await;
            manager.handler().player_destroy(self.clone()).await;
        }

        Ok(())
    }

    /// Plays the current track, or the given one.
    pub async fn play(&self) -> Result<()> {
        self.play_with(None, PlayOptions::default()).await
    }

    /// Sets `track` as current and plays it.
    pub async fn play_track(&self, track: Track) -> Result<()> {
        self.play_with(Some(track), PlayOptions::default()).await
    }

    /// Plays with full control over start/end time and replace behavior.
    pub async fn play_with(&self, track: Option<Track>, options: PlayOptions) -> Result<()> {
        let old = self.snapshot().await;

        if let Some(track) = track {
            self.inner.queue.set_current(Some(track)).await;
        }

        let current = self
            .inner
            .queue
            .current()
            .await
            .ok_or(Error::NoCurrentTrack)?;

        let data = UpdatePlayerData {
            encoded_track: Some(Some(current.encoded.clone())),
            start_time: options.start_time,
            end_time: options.end_time.map(Some),
            ..Default::default()
        };
        self.update_node(&data, options.no_replace).await?;

        self.inner.playing.store(true, Ordering::Release);
        self.inner.paused.store(false, Ordering::Release);
        self.inner.position.store(0, Ordering::Release);

        self.emit_state(old, StateChange::TrackChange(TrackChangeKind::Start))
            .await;
        Ok(())
    }

    /// Whether a pause call must reach the node at all.
    fn pause_transition_needed(paused_now: bool, requested: bool, total_size: usize) -> bool {
        paused_now != requested && total_size > 0
    }

    async fn pause_silent(&self, pause: bool) -> Result<()> {
        let data = UpdatePlayerData {
            paused: Some(pause),
            ..Default::default()
        };
        self.update_node(&data, false).await?;
        self.inner.paused.store(pause, Ordering::Release);
        Ok(())
    }

    /// Pauses or resumes playback. A no-op when already in the requested
    /// state or when the queue is empty; a no-op never reaches the node.
    pub async fn pause(&self, pause: bool) -> Result<()> {
        let total = self.inner.queue.total_size().await;
        if !Self::pause_transition_needed(self.paused(), pause, total) {
            return Ok(());
        }

        let old = self.snapshot().await;
        self.pause_silent(pause).await?;
        if self.inner.queue.current().await.is_some() {
            self.inner.playing.store(!pause, Ordering::Release);
        }

        self.emit_state(old, StateChange::PauseChange { paused: pause })
            .await;
        Ok(())
    }

    /// Seeks within the current track. The position is clamped to the track.
    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        let current = self
            .inner
            .queue
            .current()
            .await
            .ok_or(Error::NoCurrentTrack)?;
        let old = self.snapshot().await;

        let clamped = position_ms.min(current.duration);
        let data = UpdatePlayerData {
            position: Some(clamped),
            ..Default::default()
        };
        self.update_node(&data, false).await?;
        self.inner.position.store(clamped, Ordering::Release);

        self.emit_state(old, StateChange::TrackChange(TrackChangeKind::TimeUpdate))
            .await;
        Ok(())
    }

    /// Stops the current track. With `amount` > 1, the first `amount - 1`
    /// upcoming tracks are dropped so the node's track-end advances onto the
    /// `amount`-th one.
    pub async fn stop(&self, amount: Option<usize>) -> Result<()> {
        let amount = amount.unwrap_or(1);
        if amount == 0 {
            return Err(Error::InvalidArgument("amount must be at least 1".to_owned()));
        }

        if amount > 1 {
            let old = self.snapshot().await;
            self.inner.queue.remove(0, Some(amount - 1)).await?;
            self.emit_state(old, StateChange::QueueChange(QueueAction::Remove))
                .await;
        }

        let data = UpdatePlayerData {
            encoded_track: Some(None),
            ..Default::default()
        };
        self.update_node(&data, false).await
    }

    /// Plays the newest track from the history.
    ///
    /// The ensuing track end is flagged so the outgoing track is not pushed
    /// back onto the history.
    pub async fn previous(&self) -> Result<Track> {
        let old = self.snapshot().await;
        let track = self
            .inner
            .queue
            .pop_previous()
            .await
            .ok_or(Error::NoPreviousTrack)?;

        self.set_data(DATA_PREVIOUS_SKIP, Value::Bool(true));
        self.inner.queue.set_current(Some(track.clone())).await;

        let data = UpdatePlayerData {
            encoded_track: Some(Some(track.encoded.clone())),
            ..Default::default()
        };
        self.update_node(&data, false).await?;

        self.inner.playing.store(true, Ordering::Release);
        self.inner.paused.store(false, Ordering::Release);
        self.inner.position.store(0, Ordering::Release);

        self.emit_state(old, StateChange::TrackChange(TrackChangeKind::Previous))
            .await;
        Ok(track)
    }

    /// Sets the player volume, 0 to 1000.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        if volume > 1000 {
            return Err(Error::VolumeOutOfRange(volume));
        }
        let old = self.snapshot().await;

        let data = UpdatePlayerData {
            volume: Some(volume),
            ..Default::default()
        };
        self.update_node(&data, false).await?;
        self.inner.volume.store(volume, Ordering::Release);

        self.emit_state(old, StateChange::VolumeChange { volume }).await;
        Ok(())
    }

    fn repeat_mode(&self) -> RepeatMode {
        if self.track_repeat() {
            RepeatMode::Track
        } else if self.queue_repeat() {
            RepeatMode::Queue
        } else if self.dynamic_repeat() {
            RepeatMode::Dynamic
        } else {
            RepeatMode::None
        }
    }

    /// Repeats the current track on end. Mutually exclusive with the other
    /// repeat modes.
    pub async fn set_track_repeat(&self, repeat: bool) -> Result<()> {
        let old = self.snapshot().await;

        if repeat {
            self.inner.track_repeat.store(true, Ordering::Release);
            self.inner.queue_repeat.store(false, Ordering::Release);
            self.disable_dynamic_repeat();
        } else {
            self.inner.track_repeat.store(false, Ordering::Release);
        }

        self.emit_state(old, StateChange::RepeatChange(self.repeat_mode()))
            .await;
        Ok(())
    }

    /// Re-appends ended tracks to the queue tail. Mutually exclusive with
    /// the other repeat modes.
    pub async fn set_queue_repeat(&self, repeat: bool) -> Result<()> {
        let old = self.snapshot().await;

        if repeat {
            self.inner.queue_repeat.store(true, Ordering::Release);
            self.inner.track_repeat.store(false, Ordering::Release);
            self.disable_dynamic_repeat();
        } else {
            self.inner.queue_repeat.store(false, Ordering::Release);
        }

        self.emit_state(old, StateChange::RepeatChange(self.repeat_mode()))
            .await;
        Ok(())
    }

    fn disable_dynamic_repeat(&self) {
        self.inner.dynamic_repeat.store(false, Ordering::Release);
        self.cancel_dynamic_timer();
    }

    fn cancel_dynamic_timer(&self) {
        if let Some(timer) = self.inner.dynamic_repeat_timer.lock().unwrap().take() {
            timer.abort();
        }
    }

    pub(crate) fn start_dynamic_timer(&self) {
        self.cancel_dynamic_timer();

        let interval = self.inner.dynamic_repeat_interval.load(Ordering::Acquire);
        if interval == 0 {
            return;
        }

        let player = self.clone();
        let timer = spawn(async move {
            loop {
                sleep(std::time::Duration::from_millis(interval)).await;
                if !player.dynamic_repeat() {
                    break;
                }

                let old = player.snapshot().await;
                player.inner.queue.shuffle().await;
                player
                    .emit_state(old, StateChange::QueueChange(QueueAction::Shuffle))
                    .await;
            }
        });

        *self.inner.dynamic_repeat_timer.lock().unwrap() = Some(timer);
    }

    /// Queue repeat with a periodic reshuffle. Needs more than one upcoming
    /// track to enable. Mutually exclusive with the other repeat modes.
    pub async fn set_dynamic_repeat(&self, repeat: bool, interval_ms: u64) -> Result<()> {
        let old = self.snapshot().await;

        if repeat {
            if self.inner.queue.size().await <= 1 {
                return Err(Error::DynamicRepeatQueueTooSmall);
            }

            self.inner.track_repeat.store(false, Ordering::Release);
            self.inner.queue_repeat.store(false, Ordering::Release);
            self.inner.dynamic_repeat.store(true, Ordering::Release);
            self.inner
                .dynamic_repeat_interval
                .store(interval_ms, Ordering::Release);
            self.start_dynamic_timer();
        } else {
            self.disable_dynamic_repeat();
        }

        self.emit_state(old, StateChange::RepeatChange(self.repeat_mode()))
            .await;
        Ok(())
    }

    /// Enables autoplay. `bot_user` is the opaque user reference recommended
    /// tracks are requested under; required when enabling.
    pub async fn set_autoplay(
        &self,
        enabled: bool,
        bot_user: Option<Value>,
        tries: u32,
    ) -> Result<()> {
        let old = self.snapshot().await;

        if enabled {
            let bot_user = bot_user.ok_or(Error::AutoplayUserMissing)?;
            self.set_data(DATA_AUTOPLAY_BOT_USER, bot_user);
            self.inner.autoplay.store(true, Ordering::Release);
            self.inner
                .autoplay_tries
                .store(tries.max(1), Ordering::Release);
        } else {
            self.inner.autoplay.store(false, Ordering::Release);
            self.remove_data(DATA_AUTOPLAY_BOT_USER);
        }

        self.emit_state(old, StateChange::AutoplayChange { enabled })
            .await;
        Ok(())
    }

    /// Transfers this player to another node without leaving the voice
    /// channel. Playback state, volume, position and filters carry over.
    pub async fn move_node(&self, identifier: &str) -> Result<()> {
        let manager = self.manager().ok_or_else(|| {
            Error::InvalidState("the manager owning this player is gone".to_owned())
        })?;
        let target = manager
            .node_by_identifier(identifier)
            .ok_or_else(|| Error::NodeNotFound(identifier.to_owned()))?;

        let source = self.node();
        if source.identifier() == target.identifier() {
            return Ok(());
        }

        let voice = self
            .voice_session()
            .as_voice_data()
            .ok_or(Error::VoiceStateIncomplete)?;
        let old = self.snapshot().await;

        if source.session_id().is_some() {
            if let Err(e) = source.rest().destroy_player(self.inner.guild_id).await {
                warn!(
                    "remote destroy on '{}' during migration failed: {}",
                    source.identifier(),
                    e
                );
            }
        }

        *self.inner.node.write().unwrap() = target.clone();

        let current = self.inner.queue.current().await;
        let data = UpdatePlayerData {
            paused: Some(self.paused()),
            volume: Some(self.volume()),
            position: Some(self.position()),
            encoded_track: current.as_ref().map(|t| Some(t.encoded.clone())),
            voice: Some(voice),
            ..Default::default()
        };
        self.update_node(&data, false).await?;

        let filters = self.inner.filters.read().unwrap().payload();
        let data = UpdatePlayerData {
            filters: Some(filters),
            ..Default::default()
        };
        if let Err(e) = self.update_node(&data, false).await {
            warn!("re-applying filters after migration failed: {}", e);
        }

        if self.dynamic_repeat() {
            self.start_dynamic_timer();
        }

        self.emit_state(old, StateChange::ConnectionChange { connected: true })
            .await;
        Ok(())
    }

    /// Recreates this player in another guild, carrying the queue and
    /// settings over, then destroys this one.
    pub async fn switch_guild(&self, new_options: PlayerOptions, force: bool) -> Result<Player> {
        let manager = self.manager().ok_or_else(|| {
            Error::InvalidState("the manager owning this player is gone".to_owned())
        })?;

        if new_options.guild_id == self.inner.guild_id {
            return Err(Error::InvalidArgument(
                "the target guild is the player's own guild".to_owned(),
            ));
        }

        if let Some(existing) = manager.get(new_options.guild_id) {
            if !force {
                return Err(Error::InvalidState(format!(
                    "guild {} already has a player",
                    new_options.guild_id
                )));
            }
            existing.destroy(true).await?;
        }

        let new_player = manager.create(new_options).await?;

        let queue = self.inner.queue.clone();
        let new_queue = new_player.queue();
        new_queue.set_current(queue.current().await).await;
        let upcoming = queue.tracks().await;
        if !upcoming.is_empty() {
            // current is already set, so nothing gets promoted here
            new_queue.add(upcoming, None).await?;
        }
        new_queue.set_previous(queue.previous().await).await;

        new_player
            .inner
            .volume
            .store(self.volume(), Ordering::Release);
        new_player
            .inner
            .track_repeat
            .store(self.track_repeat(), Ordering::Release);
        new_player
            .inner
            .queue_repeat
            .store(self.queue_repeat(), Ordering::Release);
        new_player
            .inner
            .autoplay
            .store(self.is_autoplay(), Ordering::Release);
        new_player
            .inner
            .autoplay_tries
            .store(self.autoplay_tries(), Ordering::Release);
        if let Some(bot_user) = self.get_data(DATA_AUTOPLAY_BOT_USER) {
            new_player.set_data(DATA_AUTOPLAY_BOT_USER, bot_user);
        }
        *new_player.inner.filters.write().unwrap() = self.filters();

        self.destroy(true).await?;
        Ok(new_player)
    }

    /// Fetches lyrics for the current track via the node's lyrics plugin.
    pub async fn get_current_lyrics(&self, skip_track_source: bool) -> Result<Option<Lyrics>> {
        let node = self.node();
        let lyrics = node.get_lyrics(self, skip_track_source).await?;

        if let Some(manager) = self.manager() {
            match &lyrics {
                Some(found) => {
                    manager
                        .handler()
                        .lyrics_found(self.clone(), found.clone())
                        .await
                }
                None => manager.handler().lyrics_not_found(self.clone()).await,
            }
        }

        Ok(lyrics)
    }

    /// Returns the sponsorblock categories active for this player.
    pub async fn get_sponsor_block(&self) -> Result<Vec<String>> {
        self.node().get_sponsor_block(self).await
    }

    /// Replaces the sponsorblock categories for this player.
    pub async fn set_sponsor_block(&self, segments: &[String]) -> Result<()> {
        self.node().set_sponsor_block(self, segments).await
    }

    /// Clears the sponsorblock categories for this player.
    pub async fn delete_sponsor_block(&self) -> Result<()> {
        self.node().delete_sponsor_block(self).await
    }

    // ---- queue operations that report their mutation ----

    /// Adds tracks to the queue. With no current track, the first added
    /// becomes current.
    pub async fn queue_add(&self, tracks: Vec<Track>, offset: Option<usize>) -> Result<()> {
        let old = self.snapshot().await;
        self.inner.queue.add(tracks, offset).await?;
        self.emit_state(old, StateChange::QueueChange(QueueAction::Add))
            .await;
        Ok(())
    }

    /// Removes the half-open range `start..end` from the upcoming tracks.
    pub async fn queue_remove(&self, start: usize, end: Option<usize>) -> Result<Vec<Track>> {
        let old = self.snapshot().await;
        let removed = self.inner.queue.remove(start, end).await?;
        self.emit_state(old, StateChange::QueueChange(QueueAction::Remove))
            .await;
        Ok(removed)
    }

    /// Drops every upcoming track.
    pub async fn queue_clear(&self) {
        let old = self.snapshot().await;
        self.inner.queue.clear().await;
        self.emit_state(old, StateChange::QueueChange(QueueAction::Clear))
            .await;
    }

    /// Shuffles the upcoming tracks.
    pub async fn queue_shuffle(&self) {
        let old = self.snapshot().await;
        self.inner.queue.shuffle().await;
        self.emit_state(old, StateChange::QueueChange(QueueAction::Shuffle))
            .await;
    }

    /// Interleaves the upcoming tracks by requester, keeping requester order.
    pub async fn queue_user_block_shuffle(&self) {
        let old = self.snapshot().await;
        self.inner.queue.user_block_shuffle().await;
        self.emit_state(old, StateChange::QueueChange(QueueAction::UserBlock))
            .await;
    }

    /// Interleaves the upcoming tracks by requester with shuffled blocks.
    pub async fn queue_round_robin_shuffle(&self) {
        let old = self.snapshot().await;
        self.inner.queue.round_robin_shuffle().await;
        self.emit_state(old, StateChange::QueueChange(QueueAction::RoundRobin))
            .await;
    }

    /// Appends a recommended track on behalf of autoplay.
    pub(crate) async fn queue_autoplay_add(&self, track: Track) -> Result<()> {
        let old = self.snapshot().await;
        self.inner.queue.add(vec![track], None).await?;
        self.emit_state(old, StateChange::QueueChange(QueueAction::AutoPlayAdd))
            .await;
        Ok(())
    }

    // ---- filter operations ----

    async fn mutate_filters<F>(&self, update: bool, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Filters) -> Result<()>,
    {
        let old = self.snapshot().await;

        let payload = {
            let mut filters = self.inner.filters.write().unwrap();
            mutate(&mut filters)?;
            filters.payload()
        };

        if update {
            let data = UpdatePlayerData {
                filters: Some(payload),
                ..Default::default()
            };
            self.update_node(&data, false).await?;
        }

        self.emit_state(old, StateChange::FilterChange).await;
        Ok(())
    }

    /// Sets or clears the filter volume.
    pub async fn set_filter_volume(&self, volume: Option<f64>, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.set_volume(volume);
            Ok(())
        })
        .await
    }

    /// Sets or clears the equalizer bands.
    pub async fn set_equalizer(&self, bands: Option<Vec<Band>>, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| f.set_equalizer(bands)).await
    }

    /// Sets or clears the karaoke filter.
    pub async fn set_karaoke(&self, karaoke: Option<Karaoke>, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.set_karaoke(karaoke);
            Ok(())
        })
        .await
    }

    /// Sets or clears the timescale filter.
    pub async fn set_timescale(&self, timescale: Option<Timescale>, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.set_timescale(timescale);
            Ok(())
        })
        .await
    }

    /// Sets or clears the vibrato filter.
    pub async fn set_vibrato(&self, vibrato: Option<Vibrato>, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.set_vibrato(vibrato);
            Ok(())
        })
        .await
    }

    /// Sets or clears the rotation filter.
    pub async fn set_rotation(&self, rotation: Option<Rotation>, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.set_rotation(rotation);
            Ok(())
        })
        .await
    }

    /// Sets or clears the distortion filter.
    pub async fn set_distortion(&self, distortion: Option<Distortion>, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.set_distortion(distortion);
            Ok(())
        })
        .await
    }

    /// Applies a named filter preset.
    pub async fn apply_filter_preset(&self, preset: Preset, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.apply_preset(preset);
            Ok(())
        })
        .await
    }

    /// Removes a named filter preset.
    pub async fn remove_filter_preset(&self, preset: Preset, update: bool) -> Result<()> {
        self.mutate_filters(update, |f| {
            f.remove_preset(preset);
            Ok(())
        })
        .await
    }

    /// Resets every filter and preset flag with a single node update.
    pub async fn clear_filters(&self) -> Result<()> {
        self.mutate_filters(true, |f| {
            f.clear();
            Ok(())
        })
        .await
    }

    // ---- node-driven state ----

    /// Applies a periodic position report from the node.
    pub(crate) async fn handle_player_update(&self, state: PlayerUpdateState) {
        self.inner.position.store(state.position, Ordering::Release);
    }

    /// Applies a track-start event from the node.
    pub(crate) async fn handle_track_start(&self, data: TrackData) {
        let flags_changed = !self.playing() || self.paused();
        let old = match flags_changed {
            true => Some(self.snapshot().await),
            false => None,
        };

        self.inner.playing.store(true, Ordering::Release);
        self.inner.paused.store(false, Ordering::Release);

        let Some(manager) = self.manager() else {
            return;
        };

        let track = match self.inner.queue.current().await {
            Some(current) if current.encoded == data.encoded => current,
            _ => manager.build_track(data, self.autoplay_requester()),
        };

        if let Some(old) = old {
            self.emit_state(old, StateChange::TrackChange(TrackChangeKind::Start))
                .await;
        }

        manager.handler().track_start(self.clone(), track).await;
    }

    /// Pushes the current voice credentials to the node when they are complete.
    pub(crate) async fn send_voice_update(&self) -> Result<()> {
        let Some(voice) = self.voice_session().as_voice_data() else {
            return Ok(());
        };

        let data = UpdatePlayerData {
            voice: Some(voice),
            ..Default::default()
        };
        self.update_node(&data, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_guard_skips_noop_transitions() {
        // already paused, asking to pause again
        assert!(!Player::pause_transition_needed(true, true, 3));
        // empty queue never reaches the node
        assert!(!Player::pause_transition_needed(false, true, 0));
        // a real transition
        assert!(Player::pause_transition_needed(false, true, 1));
        assert!(Player::pause_transition_needed(true, false, 1));
    }
}
