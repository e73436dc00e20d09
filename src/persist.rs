//! Player snapshots on disk: written on shutdown, read back when a node
//! session resumes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    model::Track,
    player::{Player, DATA_AUTOPLAY_BOT_USER},
};

/// Persisted voice credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedVoice {
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub endpoint: Option<String>,
}

/// Everything needed to rebuild a player after a restart.
///
/// Deliberately a plain data shape: no manager or filter back-references are
/// serialized, and unknown fields in old files are ignored on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPlayer {
    pub guild_id: u64,
    pub voice_channel_id: Option<u64>,
    pub text_channel_id: Option<u64>,
    /// Identifier of the node the player was attached to.
    pub node: String,
    pub volume: u16,
    pub playing: bool,
    pub paused: bool,
    pub position: u64,
    pub track_repeat: bool,
    pub queue_repeat: bool,
    pub dynamic_repeat: bool,
    pub dynamic_repeat_interval: u64,
    pub autoplay: bool,
    pub autoplay_tries: u32,
    pub autoplay_bot_user: Option<Value>,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub voice: PersistedVoice,
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub previous: Vec<Track>,
}

/// Captures a player into its persisted shape.
pub(crate) async fn snapshot_player(player: &Player) -> PersistedPlayer {
    let queue = player.queue();
    let voice = player.voice_session();

    PersistedPlayer {
        guild_id: player.guild_id(),
        voice_channel_id: player.voice_channel_id(),
        text_channel_id: player.text_channel_id(),
        node: player.node().identifier().to_owned(),
        volume: player.volume(),
        playing: player.playing(),
        paused: player.paused(),
        position: player.position(),
        track_repeat: player.track_repeat(),
        queue_repeat: player.queue_repeat(),
        dynamic_repeat: player.dynamic_repeat(),
        dynamic_repeat_interval: player.dynamic_repeat_interval(),
        autoplay: player.is_autoplay(),
        autoplay_tries: player.autoplay_tries(),
        autoplay_bot_user: player.get_data(DATA_AUTOPLAY_BOT_USER),
        self_mute: player.self_mute(),
        self_deaf: player.self_deaf(),
        voice: PersistedVoice {
            session_id: voice.session_id,
            token: voice.token,
            endpoint: voice.endpoint,
        },
        current: queue.current().await,
        upcoming: queue.tracks().await,
        previous: queue.previous().await,
    }
}

/// One JSON file per guild under `<data dir>/players/`.
#[derive(Debug, Clone)]
pub(crate) struct PlayerStateStore {
    dir: PathBuf,
}

impl PlayerStateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: data_dir.into().join("players"),
        }
    }

    fn path(&self, guild_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", guild_id))
    }

    /// Writes one player snapshot (temp + rename).
    pub async fn save(&self, state: &PersistedPlayer) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(Error::Io)?;

        let path = self.path(state.guild_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state).map_err(Error::Json)?;

        fs::write(&tmp, &bytes).await.map_err(Error::Io)?;
        fs::rename(&tmp, &path).await.map_err(Error::Io)?;

        debug!("persisted player of guild {}", state.guild_id);
        Ok(())
    }

    /// Reads one player snapshot, if present and parseable.
    pub async fn load(&self, guild_id: u64) -> Option<PersistedPlayer> {
        let bytes = fs::read(self.path(guild_id)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("can't parse persisted player {}: {}", guild_id, e);
                None
            }
        }
    }

    /// Removes one player snapshot.
    pub async fn delete(&self, guild_id: u64) {
        _ = fs::remove_file(self.path(guild_id)).await;
    }

    /// Lists the guild ids that have a snapshot on disk.
    pub async fn guilds(&self) -> Vec<u64> {
        let mut out = Vec::new();

        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return out;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else { continue };
            if let Ok(guild_id) = stem.parse::<u64>() {
                out.push(guild_id);
            }
        }

        out
    }

    /// Loads every snapshot on disk.
    pub async fn load_all(&self) -> Vec<PersistedPlayer> {
        let mut out = Vec::new();
        for guild_id in self.guilds().await {
            if let Some(state) = self.load(guild_id).await {
                out.push(state);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::test_support::track;

    fn persisted(guild_id: u64) -> PersistedPlayer {
        PersistedPlayer {
            guild_id,
            voice_channel_id: Some(10),
            text_channel_id: Some(20),
            node: "main".to_owned(),
            volume: 70,
            playing: true,
            paused: false,
            position: 30_000,
            track_repeat: true,
            queue_repeat: false,
            dynamic_repeat: false,
            dynamic_repeat_interval: 0,
            autoplay: true,
            autoplay_tries: 3,
            autoplay_bot_user: Some(serde_json::json!({"id": "99"})),
            self_mute: false,
            self_deaf: true,
            voice: PersistedVoice {
                session_id: Some("sess".to_owned()),
                token: Some("tok".to_owned()),
                endpoint: Some("voice.example.com".to_owned()),
            },
            current: Some(track("t1", "u", 180_000)),
            upcoming: vec![track("t2", "u", 1), track("t3", "u", 2)],
            previous: vec![track("t0", "u", 3)],
        }
    }

    #[tokio::test]
    async fn snapshots_round_trip_per_guild() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlayerStateStore::new(dir.path());

        store.save(&persisted(1)).await.unwrap();
        store.save(&persisted(2)).await.unwrap();

        let mut guilds = store.guilds().await;
        guilds.sort_unstable();
        assert_eq!(guilds, [1, 2]);

        let restored = store.load(1).await.unwrap();
        assert_eq!(restored.volume, 70);
        assert_eq!(restored.current.unwrap().identifier, "t1");
        assert_eq!(restored.upcoming.len(), 2);
        assert!(restored.track_repeat);

        store.delete(1).await;
        assert!(store.load(1).await.is_none());
        assert_eq!(store.guilds().await, [2]);
    }

    #[tokio::test]
    async fn unknown_fields_do_not_break_a_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlayerStateStore::new(dir.path());
        store.save(&persisted(7)).await.unwrap();

        // simulate a file written by a newer version
        let path = dir.path().join("players").join("7.json");
        let mut raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        raw["somethingNew"] = serde_json::json!({"nested": true});
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert!(store.load(7).await.is_some());
    }
}
