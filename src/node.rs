//! A remote audio node: websocket lifecycle, reconnect/resume, event demux
//! and the cached view of the node's stats and capabilities.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, RwLock,
};

use base64::{prelude::BASE64_STANDARD, Engine};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{net::TcpStream, select, spawn, sync::oneshot, task::JoinHandle, time::sleep};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        http::Request,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    manager::{Manager, WeakManager},
    model::{
        ChapterStartedFrame, ChaptersLoadedFrame, EventEnvelope, EventType, Lyrics, NodeInfo,
        NodeStats, OpEnvelope, OpType, PlayerUpdateFrame, ReadyFrame, SegmentSkippedFrame,
        SegmentsLoadedFrame, TrackEndFrame, TrackExceptionFrame, TrackStartFrame, TrackStuckFrame,
        WebSocketClosedFrame,
    },
    player::Player,
    rest::RestClient,
    session::SessionStore,
    track_end,
};

/// Segment categories the sponsorblock plugin understands.
const SPONSOR_BLOCK_CATEGORIES: [&str; 8] = [
    "sponsor",
    "selfpromo",
    "interaction",
    "intro",
    "outro",
    "preview",
    "music_offtopic",
    "filler",
];

const SPONSOR_BLOCK_PLUGIN: &str = "sponsorblock-plugin";
const LYRICS_PLUGIN: &str = "lavalyrics-plugin";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Configuration used to reach one audio node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Node host name or IP address.
    pub host: String,
    /// Node port.
    pub port: u16,
    /// Node password.
    pub password: String,
    /// Enables TLS for both REST and websocket.
    pub use_ssl: bool,
    /// Unique identifier of this node in the pool. Defaults to the host.
    pub identifier: Option<String>,
    /// Weight of this node when priority routing is enabled.
    pub priority: u32,
    /// How many reconnect attempts are made before the node destroys itself.
    pub retry_amount: u32,
    /// Delay between reconnect attempts in milliseconds.
    pub retry_delay: u64,
    /// Maximum wait for the ready frame when connecting, in milliseconds.
    pub connection_timeout: u64,
    /// Timeout for every REST call, in milliseconds.
    pub request_timeout: u64,
    /// Ask the node to keep the session alive for resuming after a disconnect.
    pub resume_status: bool,
    /// How long the node keeps a resumable session, in seconds.
    pub resume_timeout: u64,
}

impl NodeOptions {
    /// Initializes options with the required parameters and defaults for the rest.
    pub fn new(host: &str, port: u16, password: &str) -> Self {
        Self {
            host: host.to_owned(),
            port,
            password: password.to_owned(),
            use_ssl: false,
            identifier: None,
            priority: 0,
            retry_amount: 5,
            retry_delay: 30_000,
            connection_timeout: 5_000,
            request_timeout: 10_000,
            resume_status: false,
            resume_timeout: 60,
        }
    }
}

/// Lifecycle of the node websocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Destroyed,
}

pub(crate) struct NodeInner {
    options: NodeOptions,
    identifier: String,
    user_id: u64,
    client_name: String,
    manager: WeakManager,
    rest: RestClient,
    state: RwLock<NodeState>,
    info: RwLock<Option<NodeInfo>>,
    stats: RwLock<Option<NodeStats>>,
    reconnect_attempts: AtomicU32,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    sessions: SessionStore,
}

/// Client for one audio node. Cheap to clone, all clones share the
/// connection.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub(crate) fn new(
        manager: WeakManager,
        options: NodeOptions,
        user_id: u64,
        client_name: String,
        sessions: SessionStore,
    ) -> Result<Self> {
        let identifier = options
            .identifier
            .clone()
            .unwrap_or_else(|| options.host.clone());
        let rest = RestClient::new(&options)?;

        Ok(Self {
            inner: Arc::new(NodeInner {
                options,
                identifier,
                user_id,
                client_name,
                manager,
                rest,
                state: RwLock::new(NodeState::Disconnected),
                info: RwLock::new(None),
                stats: RwLock::new(None),
                reconnect_attempts: AtomicU32::new(0),
                sink: tokio::sync::Mutex::new(None),
                task: std::sync::Mutex::new(None),
                sessions,
            }),
        })
    }

    /// The unique identifier of this node in the pool.
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// The options this node was created with.
    pub fn options(&self) -> &NodeOptions {
        &self.inner.options
    }

    /// The current websocket lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.inner.state.read().unwrap()
    }

    /// Whether the websocket handshake completed and a session is live.
    pub fn connected(&self) -> bool {
        self.state() == NodeState::Connected
    }

    /// The session ID of this connection, if one was received.
    pub fn session_id(&self) -> Option<String> {
        self.inner.rest.session_id()
    }

    /// The REST client of this node. Works independently of the websocket,
    /// but session-scoped endpoints fail until a session ID is known.
    pub fn rest(&self) -> &RestClient {
        &self.inner.rest
    }

    /// The last stats frame the node sent.
    pub fn stats(&self) -> Option<NodeStats> {
        self.inner.stats.read().unwrap().clone()
    }

    /// The cached capabilities from the last `/v4/info` fetch.
    pub fn info(&self) -> Option<NodeInfo> {
        self.inner.info.read().unwrap().clone()
    }

    fn manager(&self) -> Option<Manager> {
        self.inner.manager.upgrade()
    }

    fn set_state(&self, state: NodeState) {
        *self.inner.state.write().unwrap() = state;
    }

    /// Initializes the connection to the node.
    ///
    /// Resolves once the ready frame arrives; on timeout the background task
    /// keeps retrying on its own schedule.
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            NodeState::Disconnected => {}
            NodeState::Destroyed => {
                return Err(Error::InvalidState("the node has been destroyed".to_owned()))
            }
            _ => return Err(Error::InvalidState("the node is already connecting".to_owned())),
        }

        self.set_state(NodeState::Connecting);

        let (sender, mut receiver) = oneshot::channel();

        let node = self.clone();
        let task = spawn(async move {
            node.connection_task(Some(sender)).await;
        });
        *self.inner.task.lock().unwrap() = Some(task);

        select! {
            _ = sleep(std::time::Duration::from_millis(self.inner.options.connection_timeout)) => {
                warn!("node '{}' session confirmation timeout", self.inner.identifier);
                Err(Error::NodeNotConnected(self.inner.identifier.clone()))
            }
            msg = &mut receiver => match msg {
                Ok(_) => Ok(()),
                Err(_) => Err(Error::NodeNotConnected(self.inner.identifier.clone())),
            }
        }
    }

    /// Websocket owner loop: connects, reads until close, and schedules
    /// reconnects until the retry budget is spent or the node is destroyed.
    async fn connection_task(&self, mut confirm: Option<oneshot::Sender<()>>) {
        loop {
            match self.open_socket().await {
                Ok(stream) => {
                    let (code, reason) = self.read_loop(stream, &mut confirm).await;

                    if self.state() == NodeState::Destroyed {
                        break;
                    }

                    self.set_state(NodeState::Disconnected);
                    if let Some(manager) = self.manager() {
                        manager
                            .handler()
                            .node_disconnect(self.clone(), code, reason.clone())
                            .await;
                    }

                    if code == 1000 && reason == "destroy" {
                        break;
                    }
                }
                Err(e) => {
                    warn!("node '{}' connection failed: {}", self.inner.identifier, e);
                    if self.state() == NodeState::Destroyed {
                        break;
                    }
                    if let Some(manager) = self.manager() {
                        manager.handler().node_error(self.clone(), e).await;
                    }
                }
            }

            let attempt = self.inner.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1;
            if attempt > self.inner.options.retry_amount {
                error!(
                    "node '{}' is unreachable after {} attempt(s), giving up",
                    self.inner.identifier, self.inner.options.retry_amount
                );
                if let Some(manager) = self.manager() {
                    manager
                        .handler()
                        .node_error(
                            self.clone(),
                            Error::NodeConnectFailed {
                                identifier: self.inner.identifier.clone(),
                                attempts: self.inner.options.retry_amount,
                            },
                        )
                        .await;
                }
                self.destroy().await;
                break;
            }

            self.set_state(NodeState::Reconnecting);
            if let Some(manager) = self.manager() {
                manager.handler().node_reconnect(self.clone(), attempt).await;
            }

            sleep(std::time::Duration::from_millis(self.inner.options.retry_delay)).await;

            if self.state() == NodeState::Destroyed {
                break;
            }
            self.set_state(NodeState::Connecting);
        }
    }

    /// Performs the websocket handshake and stores the write half.
    async fn open_socket(
        &self,
    ) -> Result<futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>> {
        let options = &self.inner.options;
        let websocket_uri = format!(
            "{}://{}:{}/v4/websocket",
            match options.use_ssl {
                true => "wss",
                false => "ws",
            },
            options.host,
            options.port,
        );

        let mut request = Request::builder()
            .header("Host", format!("{}:{}", options.host, options.port))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Authorization", options.password.clone())
            .header("User-Id", self.inner.user_id)
            .header("Client-Name", self.inner.client_name.clone());

        // present the previous session so the node can offer a resume
        let persisted = match self.session_id() {
            Some(live) => Some(live),
            None => self.inner.sessions.get(&self.inner.identifier).await,
        };
        if let Some(session_id) = persisted {
            request = request.header("Session-Id", session_id);
        }

        let request = request
            .uri(websocket_uri.clone())
            .body(())
            .map_err(Error::Http)?;

        debug!("connecting to the node websocket at '{}'...", websocket_uri);

        let (sink, stream) = connect_async(request)
            .await
            .map_err(Error::WebSocket)?
            .0
            .split();

        debug!("node '{}' websocket connected.", self.inner.identifier);
        *self.inner.sink.lock().await = Some(sink);

        Ok(stream)
    }

    /// Reads frames until the socket closes, returning the close code and reason.
    async fn read_loop(
        &self,
        mut stream: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
        confirm: &mut Option<oneshot::Sender<()>>,
    ) -> (u16, String) {
        while let Some(value) = stream.next().await {
            match value {
                Ok(Message::Text(text)) => self.handle_message(&text, confirm).await,
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (1005, String::new()),
                    };
                    info!(
                        "node '{}' websocket closed: {} '{}'",
                        self.inner.identifier, code, reason
                    );
                    return (code, reason);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("node '{}' websocket errored: {}", self.inner.identifier, e);
                    break;
                }
            }
        }

        // stream ended without a close frame
        (1006, String::new())
    }

    /// Dispatches one text frame by `op`.
    async fn handle_message(&self, text: &str, confirm: &mut Option<oneshot::Sender<()>>) {
        debug!("parsing the websocket message: {}", text);

        if let Some(manager) = self.manager() {
            if let Ok(raw) = serde_json::from_str::<serde_json::Value>(text) {
                manager.handler().node_raw(self.clone(), raw).await;
            }
        }

        let envelope = match serde_json::from_str::<OpEnvelope>(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("can't parse the message: {}", e);
                if let Some(manager) = self.manager() {
                    manager
                        .handler()
                        .node_error(self.clone(), Error::NodeProtocolError(e.to_string()))
                        .await;
                }
                return;
            }
        };

        match envelope.op {
            OpType::Ready => {
                let ready = match serde_json::from_str::<ReadyFrame>(text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("can't parse the ready message: {}", e);
                        return;
                    }
                };
                self.handle_ready(ready, confirm).await;
            }
            OpType::Stats => match serde_json::from_str::<NodeStats>(text) {
                Ok(stats) => *self.inner.stats.write().unwrap() = Some(stats),
                Err(e) => warn!("can't parse the stats message: {}", e),
            },
            OpType::PlayerUpdate => {
                let update = match serde_json::from_str::<PlayerUpdateFrame>(text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("can't parse the playerUpdate message: {}", e);
                        return;
                    }
                };

                if let Some(player) = self.player_for(&update.guild_id) {
                    player.handle_player_update(update.state).await;
                }
            }
            OpType::Event => self.handle_event(text).await,
        }
    }

    async fn handle_ready(&self, ready: ReadyFrame, confirm: &mut Option<oneshot::Sender<()>>) {
        info!(
            "node '{}' is ready [session: {}] [resumed: {}]",
            self.inner.identifier, ready.session_id, ready.resumed
        );

        self.inner.rest.set_session_id(Some(ready.session_id.clone()));
        self.set_state(NodeState::Connected);
        self.inner.reconnect_attempts.store(0, Ordering::Release);

        if let Err(e) = self
            .inner
            .sessions
            .put(&self.inner.identifier, &ready.session_id)
            .await
        {
            warn!("can't persist session id of '{}': {}", self.inner.identifier, e);
        }

        if let Some(sender) = confirm.take() {
            _ = sender.send(());
        }

        match self.inner.rest.get_info().await {
            Ok(info) => *self.inner.info.write().unwrap() = Some(info),
            Err(e) => {
                warn!("can't fetch info of '{}': {}", self.inner.identifier, e);
                if let Some(manager) = self.manager() {
                    manager.handler().node_error(self.clone(), e).await;
                }
            }
        }

        if self.inner.options.resume_status {
            if let Err(e) = self
                .inner
                .rest
                .update_session(true, self.inner.options.resume_timeout)
                .await
            {
                warn!("can't enable resuming on '{}': {}", self.inner.identifier, e);
            }
        }

        if let Some(manager) = self.manager() {
            if ready.resumed {
                manager.restore_players(self).await;
            }

            manager.handler().node_connect(self.clone()).await;
        }
    }

    async fn handle_event(&self, text: &str) {
        let envelope = match serde_json::from_str::<EventEnvelope>(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("can't parse the event message: {}", e);
                return;
            }
        };

        let Some(manager) = self.manager() else {
            return;
        };

        macro_rules! parse {
            ($ty:ty) => {
                match serde_json::from_str::<$ty>(text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("can't parse the {} event: {}", stringify!($ty), e);
                        return;
                    }
                }
            };
        }

        match envelope.event_type {
            EventType::TrackStartEvent => {
                let frame = parse!(TrackStartFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    player.handle_track_start(frame.track).await;
                }
            }
            EventType::TrackEndEvent => {
                let frame = parse!(TrackEndFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    track_end::handle_track_end(&player, frame).await;
                }
            }
            EventType::TrackExceptionEvent => {
                let frame = parse!(TrackExceptionFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    let track = player.current().await;
                    manager
                        .handler()
                        .track_error(player, track, frame.exception)
                        .await;
                }
            }
            EventType::TrackStuckEvent => {
                let frame = parse!(TrackStuckFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    let track = player.current().await;
                    if let Some(track) = track {
                        manager
                            .handler()
                            .track_stuck(player, track, frame.threshold_ms)
                            .await;
                    }
                }
            }
            EventType::WebSocketClosedEvent => {
                let frame = parse!(WebSocketClosedFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    manager.handler().socket_closed(player, frame).await;
                }
            }
            EventType::SegmentsLoaded => {
                let frame = parse!(SegmentsLoadedFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    manager.handler().segments_loaded(player, frame.segments).await;
                }
            }
            EventType::SegmentSkipped => {
                let frame = parse!(SegmentSkippedFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    manager.handler().segment_skipped(player, frame.segment).await;
                }
            }
            EventType::ChaptersLoaded => {
                let frame = parse!(ChaptersLoadedFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    manager.handler().chapters_loaded(player, frame.chapters).await;
                }
            }
            EventType::ChapterStarted => {
                let frame = parse!(ChapterStartedFrame);
                if let Some(player) = self.player_for(&frame.guild_id) {
                    manager.handler().chapter_started(player, frame.chapter).await;
                }
            }
        }
    }

    fn player_for(&self, guild_id: &str) -> Option<Player> {
        let guild_id = match guild_id.parse::<u64>() {
            Ok(v) => v,
            Err(e) => {
                warn!("invalid guild id '{}' in node event: {}", guild_id, e);
                return None;
            }
        };

        self.manager()?.get(guild_id)
    }

    /// Re-fetches and caches the node capabilities.
    pub async fn fetch_info(&self) -> Result<NodeInfo> {
        let info = self.inner.rest.get_info().await?;
        *self.inner.info.write().unwrap() = Some(info.clone());
        Ok(info)
    }

    fn require_plugin(&self, plugin: &'static str) -> Result<()> {
        let loaded = self
            .info()
            .map(|info| info.has_plugin(plugin))
            .unwrap_or(false);

        if loaded {
            Ok(())
        } else {
            Err(Error::PluginMissing {
                plugin,
                node: self.inner.identifier.clone(),
            })
        }
    }

    /// Returns the sponsorblock categories of this player.
    pub async fn get_sponsor_block(&self, player: &Player) -> Result<Vec<String>> {
        self.require_plugin(SPONSOR_BLOCK_PLUGIN)?;
        self.inner.rest.get_sponsor_block(player.guild_id()).await
    }

    /// Replaces the sponsorblock categories of this player.
    pub async fn set_sponsor_block(&self, player: &Player, segments: &[String]) -> Result<()> {
        self.require_plugin(SPONSOR_BLOCK_PLUGIN)?;

        for segment in segments {
            if !SPONSOR_BLOCK_CATEGORIES.contains(&segment.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "'{}' isn't a sponsorblock category",
                    segment
                )));
            }
        }

        self.inner.rest.set_sponsor_block(player.guild_id(), segments).await
    }

    /// Clears the sponsorblock categories of this player.
    pub async fn delete_sponsor_block(&self, player: &Player) -> Result<()> {
        self.require_plugin(SPONSOR_BLOCK_PLUGIN)?;
        self.inner.rest.delete_sponsor_block(player.guild_id()).await
    }

    /// Fetches lyrics for the player's current track.
    pub async fn get_lyrics(&self, player: &Player, skip_track_source: bool) -> Result<Option<Lyrics>> {
        self.require_plugin(LYRICS_PLUGIN)?;
        self.inner
            .rest
            .get_lyrics(player.guild_id(), skip_track_source)
            .await
    }

    /// Closes the socket for a process shutdown without touching the remote
    /// players, so an enabled resume can pick them back up after a restart.
    pub(crate) async fn close_for_shutdown(&self) {
        if self.state() == NodeState::Destroyed {
            return;
        }
        self.set_state(NodeState::Destroyed);

        {
            let mut sink = self.inner.sink.lock().await;
            if let Some(sink) = sink.as_mut() {
                _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "destroy".into(),
                    })))
                    .await;
                _ = sink.close().await;
            }
            *sink = None;
        }

        let task = self.inner.task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Tears the node down: players self-destroy, the socket closes with
    /// code 1000 and reason "destroy", and the node leaves the pool.
    pub async fn destroy(&self) {
        if self.state() == NodeState::Destroyed {
            return;
        }
        self.set_state(NodeState::Destroyed);

        info!("destroying node '{}'...", self.inner.identifier);

        if let Some(manager) = self.manager() {
            manager.handle_node_destroyed(self).await;
        }

        {
            let mut sink = self.inner.sink.lock().await;
            if let Some(sink) = sink.as_mut() {
                _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "destroy".into(),
                    })))
                    .await;
                _ = sink.close().await;
            }
            *sink = None;
        }

        self.inner.rest.set_session_id(None);

        if let Some(manager) = self.manager() {
            manager.remove_node_from_pool(&self.inner.identifier);
            manager.handler().node_destroy(self.clone()).await;
        }

        // cancel any pending reconnect timer; last in case this is our own task
        let task = self.inner.task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Generates a new random key from 16 Base64 encoded bytes.
fn generate_key() -> String {
    let r: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_defaults_to_the_host() {
        let options = NodeOptions::new("node.example.com", 2333, "youshallnotpass");
        assert!(options.identifier.is_none());
        assert_eq!(options.retry_amount, 5);
        assert_eq!(options.resume_timeout, 60);
    }

    #[test]
    fn generated_keys_are_unique_and_base64() {
        let a = generate_key();
        let b = generate_key();

        assert_ne!(a, b);
        assert_eq!(BASE64_STANDARD.decode(a).unwrap().len(), 16);
    }
}
