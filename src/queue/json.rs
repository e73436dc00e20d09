use std::path::PathBuf;

use async_trait::async_trait;
use tokio::{fs, sync::Mutex};
use tracing::warn;

use super::{fisher_yates, memory::QueueState, round_robin_order, user_block_order, Queue};
use crate::{
    error::{Error, Result},
    model::Track,
};

/// Queue variant backed by one JSON file per guild.
///
/// Every mutation rewrites the file (temp + rename), so the queue survives a
/// process restart without any extra persistence step. Opaque track fields
/// round-trip untouched because they are stored as raw JSON values.
pub struct JsonQueue {
    guild_id: u64,
    max_previous: usize,
    path: PathBuf,
    state: Mutex<QueueState>,
}

impl JsonQueue {
    /// Opens (or creates) the queue file for this guild under `dir`.
    pub async fn open(dir: impl Into<PathBuf>, guild_id: u64, max_previous: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(Error::Io)?;

        let path = dir.join(format!("{}.json", guild_id));
        let state = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!("can't parse '{}', starting empty: {}", path.display(), e);
                    QueueState::default()
                }
            },
            Err(_) => QueueState::default(),
        };

        Ok(Self {
            guild_id,
            max_previous,
            path,
            state: Mutex::new(state),
        })
    }

    async fn save(&self, state: &QueueState) {
        let bytes = match serde_json::to_vec(state) {
            Ok(v) => v,
            Err(e) => {
                warn!("can't serialize queue for guild {}: {}", self.guild_id, e);
                return;
            }
        };

        let tmp = self.path.with_extension("json.tmp");
        let result = async {
            fs::write(&tmp, &bytes).await?;
            fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            warn!("can't persist queue for guild {}: {}", self.guild_id, e);
        }
    }

}

#[async_trait]
impl Queue for JsonQueue {
    fn guild_id(&self) -> u64 {
        self.guild_id
    }

    async fn current(&self) -> Option<Track> {
        self.state.lock().await.current.clone()
    }

    async fn set_current(&self, track: Option<Track>) {
        let mut state = self.state.lock().await;
        state.current = track;
        self.save(&state).await;
    }

    async fn previous(&self) -> Vec<Track> {
        self.state.lock().await.previous.clone()
    }

    async fn add_previous(&self, track: Track) {
        let mut state = self.state.lock().await;
        state.add_previous(track, self.max_previous, true);
        self.save(&state).await;
    }

    async fn set_previous(&self, tracks: Vec<Track>) {
        let mut state = self.state.lock().await;
        state.previous = tracks;
        self.save(&state).await;
    }

    async fn pop_previous(&self) -> Option<Track> {
        let mut state = self.state.lock().await;
        if state.previous.is_empty() {
            return None;
        }
        let track = state.previous.remove(0);
        self.save(&state).await;
        Some(track)
    }

    async fn clear_previous(&self) {
        let mut state = self.state.lock().await;
        state.previous.clear();
        self.save(&state).await;
    }

    async fn size(&self) -> usize {
        self.state.lock().await.upcoming.len()
    }

    async fn total_size(&self) -> usize {
        self.state.lock().await.total_size()
    }

    async fn duration(&self) -> u64 {
        self.state.lock().await.duration()
    }

    async fn add(&self, tracks: Vec<Track>, offset: Option<usize>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.add(tracks, offset)?;
        self.save(&state).await;
        Ok(())
    }

    async fn remove(&self, start: usize, end: Option<usize>) -> Result<Vec<Track>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(start, end)?;
        self.save(&state).await;
        Ok(removed)
    }

    async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.upcoming.clear();
        self.save(&state).await;
    }

    async fn dequeue(&self) -> Option<Track> {
        let mut state = self.state.lock().await;
        if state.upcoming.is_empty() {
            return None;
        }
        let track = state.upcoming.remove(0);
        self.save(&state).await;
        Some(track)
    }

    async fn enqueue_front(&self, track: Track) {
        let mut state = self.state.lock().await;
        state.upcoming.insert(0, track);
        self.save(&state).await;
    }

    async fn tracks(&self) -> Vec<Track> {
        self.state.lock().await.upcoming.clone()
    }

    async fn slice(&self, start: usize, end: usize) -> Vec<Track> {
        self.state.lock().await.slice(start, end)
    }

    async fn modify_at(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Track>,
    ) -> Result<Vec<Track>> {
        let mut state = self.state.lock().await;
        let removed = state.modify_at(start, delete_count, items)?;
        self.save(&state).await;
        Ok(removed)
    }

    async fn shuffle(&self) {
        let mut state = self.state.lock().await;
        fisher_yates(&mut state.upcoming);
        self.save(&state).await;
    }

    async fn user_block_shuffle(&self) {
        let mut state = self.state.lock().await;
        let upcoming = std::mem::take(&mut state.upcoming);
        state.upcoming = user_block_order(upcoming);
        self.save(&state).await;
    }

    async fn round_robin_shuffle(&self) {
        let mut state = self.state.lock().await;
        let upcoming = std::mem::take(&mut state.upcoming);
        state.upcoming = round_robin_order(upcoming);
        self.save(&state).await;
    }

    async fn dispose(&self) {
        _ = fs::remove_file(&self.path).await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::track;
    use super::*;

    #[tokio::test]
    async fn state_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let queue = JsonQueue::open(dir.path(), 1, 20).await.unwrap();
            queue
                .add(vec![track("t1", "u", 1), track("t2", "u", 2)], None)
                .await
                .unwrap();
            queue.add_previous(track("old", "u", 3)).await;
        }

        let reopened = JsonQueue::open(dir.path(), 1, 20).await.unwrap();
        assert_eq!(reopened.current().await.unwrap().identifier, "t1");
        assert_eq!(reopened.size().await, 1);
        assert_eq!(reopened.previous().await[0].identifier, "old");
    }

    #[tokio::test]
    async fn opaque_fields_round_trip_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = track("t1", "u", 1);
        t.plugin_info = json!({"nested": {"z": 1, "a": [1, 2, 3]}, "keep": "αβγ"});
        t.custom_data = json!({"volumePoint": 0.25});
        let expected_plugin = serde_json::to_vec(&t.plugin_info).unwrap();

        {
            let queue = JsonQueue::open(dir.path(), 2, 20).await.unwrap();
            queue.add(vec![t], None).await.unwrap();
        }

        let restored = JsonQueue::open(dir.path(), 2, 20)
            .await
            .unwrap()
            .current()
            .await
            .unwrap();

        assert_eq!(serde_json::to_vec(&restored.plugin_info).unwrap(), expected_plugin);
        assert_eq!(restored.custom_data, json!({"volumePoint": 0.25}));
    }

    #[tokio::test]
    async fn queues_are_isolated_per_guild() {
        let dir = tempfile::tempdir().unwrap();

        let one = JsonQueue::open(dir.path(), 1, 20).await.unwrap();
        let two = JsonQueue::open(dir.path(), 2, 20).await.unwrap();
        one.add(vec![track("only-one", "u", 1)], None).await.unwrap();

        assert!(two.current().await.is_none());
        assert_eq!(one.current().await.unwrap().identifier, "only-one");
    }
}
