use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{fisher_yates, round_robin_order, user_block_order, Queue};
use crate::{
    error::{Error, Result},
    model::Track,
};

/// The logical content of a queue, shared by the in-process and JSON
/// variants. All mutation rules live here so the variants can't drift apart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueueState {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    /// Newest first.
    pub previous: Vec<Track>,
}

impl QueueState {
    pub fn total_size(&self) -> usize {
        self.upcoming.len() + usize::from(self.current.is_some())
    }

    pub fn duration(&self) -> u64 {
        self.current.as_ref().map(|t| t.duration).unwrap_or(0)
            + self.upcoming.iter().map(|t| t.duration).sum::<u64>()
    }

    pub fn add(&mut self, mut tracks: Vec<Track>, offset: Option<usize>) -> Result<()> {
        if let Some(offset) = offset {
            if offset > self.upcoming.len() {
                return Err(Error::InvalidArgument(format!(
                    "offset {} is past the {} upcoming track(s)",
                    offset,
                    self.upcoming.len()
                )));
            }
        }

        if tracks.is_empty() {
            return Ok(());
        }

        if self.current.is_none() {
            self.current = Some(tracks.remove(0));
        }

        match offset {
            Some(offset) => {
                let offset = offset.min(self.upcoming.len());
                self.upcoming.splice(offset..offset, tracks);
            }
            None => self.upcoming.extend(tracks),
        }

        Ok(())
    }

    pub fn remove(&mut self, start: usize, end: Option<usize>) -> Result<Vec<Track>> {
        // an end past the queue drains to the tail, like slice and modify_at
        let end = end.unwrap_or(start + 1).min(self.upcoming.len());

        if start >= end || start >= self.upcoming.len() {
            return Err(Error::OutOfRange {
                start,
                end,
                size: self.upcoming.len(),
            });
        }

        Ok(self.upcoming.drain(start..end).collect())
    }

    pub fn modify_at(
        &mut self,
        start: usize,
        delete_count: usize,
        items: Vec<Track>,
    ) -> Result<Vec<Track>> {
        if start > self.upcoming.len() {
            return Err(Error::OutOfRange {
                start,
                end: start + delete_count,
                size: self.upcoming.len(),
            });
        }

        let end = (start + delete_count).min(self.upcoming.len());
        Ok(self.upcoming.splice(start..end, items).collect())
    }

    pub fn slice(&self, start: usize, end: usize) -> Vec<Track> {
        let end = end.min(self.upcoming.len());
        if start >= end {
            return Vec::new();
        }
        self.upcoming[start..end].to_vec()
    }

    /// `dedup` drops the track silently when the history already holds its
    /// identifier.
    pub fn add_previous(&mut self, track: Track, max_previous: usize, dedup: bool) {
        if dedup && self.previous.iter().any(|t| t.identifier == track.identifier) {
            return;
        }

        self.previous.insert(0, track);
        self.previous.truncate(max_previous);
    }
}

/// Queue variant living entirely in process memory.
pub struct InMemoryQueue {
    guild_id: u64,
    max_previous: usize,
    state: RwLock<QueueState>,
}

impl InMemoryQueue {
    /// Creates an empty queue for this guild.
    pub fn new(guild_id: u64, max_previous: usize) -> Self {
        Self {
            guild_id,
            max_previous,
            state: RwLock::new(QueueState::default()),
        }
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    fn guild_id(&self) -> u64 {
        self.guild_id
    }

    async fn current(&self) -> Option<Track> {
        self.state.read().unwrap().current.clone()
    }

    async fn set_current(&self, track: Option<Track>) {
        self.state.write().unwrap().current = track;
    }

    async fn previous(&self) -> Vec<Track> {
        self.state.read().unwrap().previous.clone()
    }

    async fn add_previous(&self, track: Track) {
        self.state
            .write()
            .unwrap()
            .add_previous(track, self.max_previous, true);
    }

    async fn set_previous(&self, tracks: Vec<Track>) {
        self.state.write().unwrap().previous = tracks;
    }

    async fn pop_previous(&self) -> Option<Track> {
        let mut state = self.state.write().unwrap();
        if state.previous.is_empty() {
            return None;
        }
        Some(state.previous.remove(0))
    }

    async fn clear_previous(&self) {
        self.state.write().unwrap().previous.clear();
    }

    async fn size(&self) -> usize {
        self.state.read().unwrap().upcoming.len()
    }

    async fn total_size(&self) -> usize {
        self.state.read().unwrap().total_size()
    }

    async fn duration(&self) -> u64 {
        self.state.read().unwrap().duration()
    }

    async fn add(&self, tracks: Vec<Track>, offset: Option<usize>) -> Result<()> {
        self.state.write().unwrap().add(tracks, offset)
    }

    async fn remove(&self, start: usize, end: Option<usize>) -> Result<Vec<Track>> {
        self.state.write().unwrap().remove(start, end)
    }

    async fn clear(&self) {
        self.state.write().unwrap().upcoming.clear();
    }

    async fn dequeue(&self) -> Option<Track> {
        let mut state = self.state.write().unwrap();
        if state.upcoming.is_empty() {
            return None;
        }
        Some(state.upcoming.remove(0))
    }

    async fn enqueue_front(&self, track: Track) {
        self.state.write().unwrap().upcoming.insert(0, track);
    }

    async fn tracks(&self) -> Vec<Track> {
        self.state.read().unwrap().upcoming.clone()
    }

    async fn slice(&self, start: usize, end: usize) -> Vec<Track> {
        self.state.read().unwrap().slice(start, end)
    }

    async fn modify_at(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Track>,
    ) -> Result<Vec<Track>> {
        self.state.write().unwrap().modify_at(start, delete_count, items)
    }

    async fn shuffle(&self) {
        fisher_yates(&mut self.state.write().unwrap().upcoming);
    }

    async fn user_block_shuffle(&self) {
        let mut state = self.state.write().unwrap();
        let upcoming = std::mem::take(&mut state.upcoming);
        state.upcoming = user_block_order(upcoming);
    }

    async fn round_robin_shuffle(&self) {
        let mut state = self.state.write().unwrap();
        let upcoming = std::mem::take(&mut state.upcoming);
        state.upcoming = round_robin_order(upcoming);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{test_support::track, QueueExt};
    use super::*;

    #[tokio::test]
    async fn add_promotes_the_first_track_when_empty() {
        let queue = InMemoryQueue::new(1, 20);

        queue
            .add(vec![track("t1", "u", 180_000), track("t2", "u", 60_000)], None)
            .await
            .unwrap();

        assert_eq!(queue.current().await.unwrap().identifier, "t1");
        assert_eq!(queue.size().await, 1);
        assert_eq!(queue.total_size().await, 2);
        assert_eq!(queue.duration().await, 240_000);
    }

    #[tokio::test]
    async fn add_round_trips_in_order_when_current_is_set() {
        let queue = InMemoryQueue::new(1, 20);
        queue.set_current(Some(track("t0", "u", 1))).await;

        let added: Vec<_> = (1..=4).map(|i| track(&format!("t{}", i), "u", 1)).collect();
        queue.add(added.clone(), None).await.unwrap();

        let ids: Vec<String> = queue.tracks().await.into_iter().map(|t| t.identifier).collect();
        assert_eq!(ids, ["t1", "t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn add_with_offset_splices_and_rejects_invalid_offsets() {
        let queue = InMemoryQueue::new(1, 20);
        queue.set_current(Some(track("t0", "u", 1))).await;
        queue
            .add(vec![track("t1", "u", 1), track("t3", "u", 1)], None)
            .await
            .unwrap();

        queue.add(vec![track("t2", "u", 1)], Some(1)).await.unwrap();
        let ids: Vec<String> = queue.tracks().await.into_iter().map(|t| t.identifier).collect();
        assert_eq!(ids, ["t1", "t2", "t3"]);

        let err = queue.add(vec![track("t4", "u", 1)], Some(9)).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn remove_checks_the_half_open_range() {
        let queue = InMemoryQueue::new(1, 20);
        queue.set_current(Some(track("t0", "u", 1))).await;
        queue
            .add((1..=5).map(|i| track(&format!("t{}", i), "u", 1)).collect(), None)
            .await
            .unwrap();

        let removed = queue.remove(1, Some(3)).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.size().await, 3);

        assert!(matches!(
            queue.remove(2, Some(2)).await,
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            queue.remove(7, None).await,
            Err(Error::OutOfRange { .. })
        ));

        // only start >= end and start >= size reject; an end past the queue
        // drains the remainder
        let tail = queue.remove(1, Some(50)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn size_equation_holds_after_arbitrary_mutations() {
        let queue = InMemoryQueue::new(1, 20);

        queue
            .add((0..6).map(|i| track(&format!("t{}", i), "u", 1)).collect(), None)
            .await
            .unwrap();
        queue.dequeue().await;
        queue.enqueue_front(track("front", "u", 1)).await;
        queue.remove(0, Some(2)).await.unwrap();
        queue.shuffle().await;

        let expected = queue.size().await + usize::from(queue.current().await.is_some());
        assert_eq!(queue.total_size().await, expected);
    }

    #[tokio::test]
    async fn previous_dedups_by_identifier_and_respects_the_bound() {
        let queue = InMemoryQueue::new(1, 3);

        for i in 0..5 {
            queue.add_previous(track(&format!("t{}", i), "u", 1)).await;
        }
        queue.add_previous(track("t4", "u", 1)).await;

        let ids: Vec<String> = queue.previous().await.into_iter().map(|t| t.identifier).collect();
        assert_eq!(ids, ["t4", "t3", "t2"]);

        assert_eq!(queue.pop_previous().await.unwrap().identifier, "t4");
        assert_eq!(queue.previous().await.len(), 2);
    }

    #[tokio::test]
    async fn async_helpers_iterate_the_upcoming_tracks() {
        let queue = InMemoryQueue::new(1, 20);
        queue.set_current(Some(track("t0", "u", 1))).await;
        queue
            .add((1..=4).map(|i| track(&format!("t{}", i), "u", i as u64)).collect(), None)
            .await
            .unwrap();

        let durations = queue.map_async(|t| async move { t.duration }).await;
        assert_eq!(durations, [1, 2, 3, 4]);

        let found = queue
            .find_async(|t| {
                let id = t.identifier.clone();
                async move { id == "t3" }
            })
            .await;
        assert_eq!(found.unwrap().identifier, "t3");

        assert!(queue.every_async(|t| { let d = t.duration; async move { d > 0 } }).await);
        assert!(!queue.some_async(|t| { let d = t.duration; async move { d > 10 } }).await);
    }
}
