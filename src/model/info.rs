use serde::Deserialize;
use serde_json::Value;

/// Node statistics, delivered over the websocket or `GET /v4/stats`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    /// The amount of players connected to the node.
    pub players: u64,
    /// The amount of players playing a track.
    pub playing_players: u64,
    /// The uptime of the node in milliseconds.
    pub uptime: u64,
    /// The memory stats of the node.
    pub memory: MemoryStats,
    /// The cpu stats of the node.
    pub cpu: CpuStats,
    /// The frame stats of the node. `None` if the node has no players.
    pub frame_stats: Option<FrameStats>,
}

/// Statistics related to the node's memory usage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// The amount of free memory in bytes.
    pub free: u64,
    /// The amount of used memory in bytes.
    pub used: u64,
    /// The amount of allocated memory in bytes.
    pub allocated: u64,
    /// The amount of reservable memory in bytes.
    pub reservable: u64,
}

/// Statistics related to the node's CPU usage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    /// The amount of cores the node has.
    pub cores: u32,
    /// The system load of the node.
    pub system_load: f64,
    /// The load the node itself puts on the system.
    pub lavalink_load: f64,
}

/// Statistics related to the connections between the node and the voice gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    /// The amount of frames sent to the voice gateway.
    pub sent: i64,
    /// The amount of frames that were nulled.
    pub nulled: i64,
    /// The difference between sent and expected frames.
    pub deficit: i64,
}

/// Node capabilities, fetched from `GET /v4/info` after every connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// The version of the node.
    pub version: VersionInfo,
    /// The millisecond unix timestamp when the node was built.
    pub build_time: Option<u64>,
    /// The enabled source managers.
    #[serde(default)]
    pub source_managers: Vec<String>,
    /// The enabled filters.
    #[serde(default)]
    pub filters: Vec<String>,
    /// The enabled plugins.
    #[serde(default)]
    pub plugins: Vec<PluginMeta>,
    /// Any extra fields the node reports.
    #[serde(flatten)]
    pub extra: Value,
}

impl NodeInfo {
    /// Whether the node advertises this source manager.
    pub fn has_source_manager(&self, name: &str) -> bool {
        self.source_managers.iter().any(|m| m.eq_ignore_ascii_case(name))
    }

    /// Whether the node has this plugin loaded.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// Version of the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// The full version string.
    pub semver: String,
    /// The major version.
    pub major: u32,
    /// The minor version.
    pub minor: u32,
    /// The patch version.
    pub patch: u32,
}

/// A plugin loaded on the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMeta {
    /// The plugin name.
    pub name: String,
    /// The plugin version.
    pub version: String,
}

/// Lyrics for a track, as returned by the lavalyrics plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lyrics {
    /// Name of the source the lyrics were fetched from.
    pub source_name: Option<String>,
    /// Name of the provider the lyrics were fetched from.
    pub provider: Option<String>,
    /// The full lyrics text, when the provider has no timestamps.
    pub text: Option<String>,
    /// Timestamped lyrics lines, when the provider has them.
    #[serde(default)]
    pub lines: Vec<LyricsLine>,
    /// Opaque plugin data.
    #[serde(default)]
    pub plugin: Value,
}

/// A single timestamped lyrics line.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsLine {
    /// Timestamp of the line in milliseconds.
    pub timestamp: u64,
    /// Duration of the line in milliseconds.
    pub duration: Option<u64>,
    /// The line text.
    pub line: String,
    /// Opaque plugin data.
    #[serde(default)]
    pub plugin: Value,
}
