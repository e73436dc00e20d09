use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use super::{fisher_yates, round_robin_order, user_block_order, Queue};
use crate::{
    error::{Error, Result},
    model::Track,
};

/// Queue variant backed by an external Redis instance, so several processes
/// can share one queue per guild.
///
/// Layout: `<prefix>:queue:<guildId>:current`, `...:tracks`, `...:previous`,
/// each holding a JSON document. Tracks are stored verbatim, so opaque
/// plugin/custom data round-trips byte-identical. Unlike the in-process
/// variant, the history is not deduplicated.
pub struct RedisQueue {
    guild_id: u64,
    max_previous: usize,
    prefix: String,
    connection: ConnectionManager,
}

impl RedisQueue {
    /// Connects to Redis and binds this queue to a guild.
    pub async fn connect(
        url: &str,
        prefix: &str,
        guild_id: u64,
        max_previous: usize,
    ) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::InvalidConfig(format!("redis url: {}", e)))?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::PersistenceFailed(e.to_string()))?;

        Ok(Self {
            guild_id,
            max_previous,
            prefix: prefix.to_owned(),
            connection,
        })
    }

    fn key(&self, part: &str) -> String {
        format!("{}:queue:{}:{}", self.prefix, self.guild_id, part)
    }

    async fn read<T: serde::de::DeserializeOwned>(&self, part: &str) -> Result<Option<T>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .get(self.key(part))
            .await
            .map_err(|e| Error::PersistenceFailed(e.to_string()))?;

        match raw {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(Error::Json),
            None => Ok(None),
        }
    }

    async fn write<T: serde::Serialize>(&self, part: &str, value: &T) -> Result<()> {
        let mut connection = self.connection.clone();
        let raw = serde_json::to_string(value).map_err(Error::Json)?;

        connection
            .set::<_, _, ()>(self.key(part), raw)
            .await
            .map_err(|e| Error::PersistenceFailed(e.to_string()))
    }

    async fn erase(&self, part: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(self.key(part))
            .await
            .map_err(|e| Error::PersistenceFailed(e.to_string()))
    }

    async fn upcoming(&self) -> Vec<Track> {
        self.read::<Vec<Track>>("tracks").await.ok().flatten().unwrap_or_default()
    }

    async fn history(&self) -> Vec<Track> {
        self.read::<Vec<Track>>("previous").await.ok().flatten().unwrap_or_default()
    }
}

#[async_trait]
impl Queue for RedisQueue {
    fn guild_id(&self) -> u64 {
        self.guild_id
    }

    async fn current(&self) -> Option<Track> {
        self.read::<Track>("current").await.ok().flatten()
    }

    async fn set_current(&self, track: Option<Track>) {
        let result = match &track {
            Some(track) => self.write("current", track).await,
            None => self.erase("current").await,
        };

        if let Err(e) = result {
            tracing::warn!("can't store current track for guild {}: {}", self.guild_id, e);
        }
    }

    async fn previous(&self) -> Vec<Track> {
        self.history().await
    }

    async fn add_previous(&self, track: Track) {
        let mut previous = self.history().await;
        previous.insert(0, track);
        previous.truncate(self.max_previous);
        _ = self.write("previous", &previous).await;
    }

    async fn set_previous(&self, tracks: Vec<Track>) {
        _ = self.write("previous", &tracks).await;
    }

    async fn pop_previous(&self) -> Option<Track> {
        let mut previous = self.history().await;
        if previous.is_empty() {
            return None;
        }
        let track = previous.remove(0);
        _ = self.write("previous", &previous).await;
        Some(track)
    }

    async fn clear_previous(&self) {
        _ = self.erase("previous").await;
    }

    async fn size(&self) -> usize {
        self.upcoming().await.len()
    }

    async fn total_size(&self) -> usize {
        self.upcoming().await.len() + usize::from(self.current().await.is_some())
    }

    async fn duration(&self) -> u64 {
        self.current().await.map(|t| t.duration).unwrap_or(0)
            + self.upcoming().await.iter().map(|t| t.duration).sum::<u64>()
    }

    async fn add(&self, mut tracks: Vec<Track>, offset: Option<usize>) -> Result<()> {
        let mut upcoming = self.upcoming().await;

        if let Some(offset) = offset {
            if offset > upcoming.len() {
                return Err(Error::InvalidArgument(format!(
                    "offset {} is past the {} upcoming track(s)",
                    offset,
                    upcoming.len()
                )));
            }
        }

        if tracks.is_empty() {
            return Ok(());
        }

        if self.current().await.is_none() {
            self.set_current(Some(tracks.remove(0))).await;
        }

        match offset {
            Some(offset) => {
                let offset = offset.min(upcoming.len());
                upcoming.splice(offset..offset, tracks);
            }
            None => upcoming.extend(tracks),
        }

        self.write("tracks", &upcoming).await
    }

    async fn remove(&self, start: usize, end: Option<usize>) -> Result<Vec<Track>> {
        let mut upcoming = self.upcoming().await;
        // an end past the queue drains to the tail, like slice and modify_at
        let end = end.unwrap_or(start + 1).min(upcoming.len());

        if start >= end || start >= upcoming.len() {
            return Err(Error::OutOfRange {
                start,
                end,
                size: upcoming.len(),
            });
        }

        let removed: Vec<Track> = upcoming.drain(start..end).collect();
        self.write("tracks", &upcoming).await?;
        Ok(removed)
    }

    async fn clear(&self) {
        _ = self.erase("tracks").await;
    }

    async fn dequeue(&self) -> Option<Track> {
        let mut upcoming = self.upcoming().await;
        if upcoming.is_empty() {
            return None;
        }
        let track = upcoming.remove(0);
        _ = self.write("tracks", &upcoming).await;
        Some(track)
    }

    async fn enqueue_front(&self, track: Track) {
        let mut upcoming = self.upcoming().await;
        upcoming.insert(0, track);
        _ = self.write("tracks", &upcoming).await;
    }

    async fn tracks(&self) -> Vec<Track> {
        self.upcoming().await
    }

    async fn slice(&self, start: usize, end: usize) -> Vec<Track> {
        let upcoming = self.upcoming().await;
        let end = end.min(upcoming.len());
        if start >= end {
            return Vec::new();
        }
        upcoming[start..end].to_vec()
    }

    async fn modify_at(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Track>,
    ) -> Result<Vec<Track>> {
        let mut upcoming = self.upcoming().await;

        if start > upcoming.len() {
            return Err(Error::OutOfRange {
                start,
                end: start + delete_count,
                size: upcoming.len(),
            });
        }

        let end = (start + delete_count).min(upcoming.len());
        let removed: Vec<Track> = upcoming.splice(start..end, items).collect();
        self.write("tracks", &upcoming).await?;
        Ok(removed)
    }

    async fn shuffle(&self) {
        let mut upcoming = self.upcoming().await;
        fisher_yates(&mut upcoming);
        _ = self.write("tracks", &upcoming).await;
    }

    async fn user_block_shuffle(&self) {
        let upcoming = self.upcoming().await;
        _ = self.write("tracks", &user_block_order(upcoming)).await;
    }

    async fn round_robin_shuffle(&self) {
        let upcoming = self.upcoming().await;
        _ = self.write("tracks", &round_robin_order(upcoming)).await;
    }

    async fn dispose(&self) {
        _ = self.erase("current").await;
        _ = self.erase("tracks").await;
        _ = self.erase("previous").await;
    }
}
