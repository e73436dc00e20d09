//! Ordered track storage for a player, with pluggable backends.
//!
//! Every backend implements [`Queue`]; the in-process variant is the default,
//! the JSON variant survives restarts on its own, and the Redis variant
//! shares state with other processes.

use std::{collections::VecDeque, future::Future};

use async_trait::async_trait;
use rand::Rng;

use crate::{error::Result, model::Track};

mod json;
mod memory;
#[cfg(feature = "redis-queue")]
mod redis;

pub use json::JsonQueue;
pub use memory::InMemoryQueue;
#[cfg(feature = "redis-queue")]
pub use redis::RedisQueue;

/// The ordering mutation behind a queue state-update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    Add,
    Remove,
    Clear,
    Shuffle,
    RoundRobin,
    UserBlock,
    AutoPlayAdd,
}

/// Ordered track store for exactly one guild.
///
/// `current` is what the node is (or will be) playing, `upcoming` is the
/// pending order, `previous` holds history with the newest entry first.
#[async_trait]
pub trait Queue: Send + Sync {
    /// The guild this queue belongs to.
    fn guild_id(&self) -> u64;

    /// Returns the current track.
    async fn current(&self) -> Option<Track>;

    /// Replaces the current track.
    async fn set_current(&self, track: Option<Track>);

    /// Returns the previous tracks, newest first.
    async fn previous(&self) -> Vec<Track>;

    /// Pushes a track to the front of the history.
    async fn add_previous(&self, track: Track);

    /// Replaces the history.
    async fn set_previous(&self, tracks: Vec<Track>);

    /// Removes and returns the newest history entry.
    async fn pop_previous(&self) -> Option<Track>;

    /// Drops the whole history.
    async fn clear_previous(&self);

    /// How many upcoming tracks are queued.
    async fn size(&self) -> usize;

    /// Upcoming tracks plus the current one, if any.
    async fn total_size(&self) -> usize;

    /// Milliseconds of audio left: the current track plus everything upcoming.
    async fn duration(&self) -> u64;

    /// Adds tracks to the queue.
    ///
    /// With no current track, the first added becomes current. A numeric
    /// `offset` splices the rest at that index of the upcoming list; an
    /// offset past the end is rejected.
    async fn add(&self, tracks: Vec<Track>, offset: Option<usize>) -> Result<()>;

    /// Removes the half-open range `start..end` (default `start..start + 1`)
    /// from the upcoming list and returns it.
    async fn remove(&self, start: usize, end: Option<usize>) -> Result<Vec<Track>>;

    /// Drops every upcoming track.
    async fn clear(&self);

    /// Removes and returns the first upcoming track.
    async fn dequeue(&self) -> Option<Track>;

    /// Pushes a track to the front of the upcoming list.
    async fn enqueue_front(&self, track: Track);

    /// Returns the upcoming tracks in order.
    async fn tracks(&self) -> Vec<Track>;

    /// Returns the upcoming tracks within `start..end`, clamped to the size.
    async fn slice(&self, start: usize, end: usize) -> Vec<Track>;

    /// Splices the upcoming list: removes `delete_count` tracks at `start`,
    /// inserts `items` there, and returns the removed tracks.
    async fn modify_at(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Track>,
    ) -> Result<Vec<Track>>;

    /// Shuffles the upcoming tracks in place.
    async fn shuffle(&self);

    /// Reorders the upcoming tracks so requesters alternate, keeping each
    /// requester's own order.
    async fn user_block_shuffle(&self);

    /// Like [`Queue::user_block_shuffle`], but each requester's block is
    /// shuffled before the blocks are interleaved.
    async fn round_robin_shuffle(&self);

    /// Releases backend resources. Called when the owning player is
    /// destroyed; the in-process variant has nothing to release.
    async fn dispose(&self) {}
}

/// Async iteration helpers layered over [`Queue::tracks`].
#[async_trait]
pub trait QueueExt: Queue {
    /// Maps every upcoming track through an async closure.
    async fn map_async<T, F, Fut>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(Track) -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let mut out = Vec::new();
        for track in self.tracks().await {
            out.push(f(track).await);
        }
        out
    }

    /// Keeps the upcoming tracks an async predicate accepts.
    async fn filter_async<F, Fut>(&self, mut f: F) -> Vec<Track>
    where
        F: FnMut(&Track) -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        let mut out = Vec::new();
        for track in self.tracks().await {
            if f(&track).await {
                out.push(track);
            }
        }
        out
    }

    /// Returns the first upcoming track an async predicate accepts.
    async fn find_async<F, Fut>(&self, mut f: F) -> Option<Track>
    where
        F: FnMut(&Track) -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        for track in self.tracks().await {
            if f(&track).await {
                return Some(track);
            }
        }
        None
    }

    /// Whether any upcoming track satisfies an async predicate.
    async fn some_async<F, Fut>(&self, mut f: F) -> bool
    where
        F: FnMut(&Track) -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        for track in self.tracks().await {
            if f(&track).await {
                return true;
            }
        }
        false
    }

    /// Whether every upcoming track satisfies an async predicate.
    async fn every_async<F, Fut>(&self, mut f: F) -> bool
    where
        F: FnMut(&Track) -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        for track in self.tracks().await {
            if !f(&track).await {
                return false;
            }
        }
        true
    }
}

impl<Q: Queue + ?Sized> QueueExt for Q {}

/// The grouping key for the block shuffles: the requester's `id` field, or
/// the whole requester value when there is none.
pub(crate) fn requester_key(track: &Track) -> String {
    match track.requester.get("id") {
        Some(id) => match id.as_str() {
            Some(s) => s.to_owned(),
            None => id.to_string(),
        },
        None => track.requester.to_string(),
    }
}

/// In-place Fisher-Yates shuffle.
pub(crate) fn fisher_yates(tracks: &mut [Track]) {
    let mut rng = rand::thread_rng();
    for i in (1..tracks.len()).rev() {
        let j = rng.gen_range(0..=i);
        tracks.swap(i, j);
    }
}

fn group_by_requester(tracks: Vec<Track>) -> Vec<VecDeque<Track>> {
    let mut keys: Vec<String> = Vec::new();
    let mut groups: Vec<VecDeque<Track>> = Vec::new();

    for track in tracks {
        let key = requester_key(&track);
        match keys.iter().position(|k| *k == key) {
            Some(i) => groups[i].push_back(track),
            None => {
                keys.push(key);
                groups.push(VecDeque::from([track]));
            }
        }
    }

    groups
}

fn interleave(mut groups: Vec<VecDeque<Track>>, total: usize) -> Vec<Track> {
    let mut out = Vec::with_capacity(total);
    let mut index = 0;

    while out.len() < total {
        let len = groups.len();
        if let Some(track) = groups[index % len].pop_front() {
            out.push(track);
        }
        index += 1;
    }

    out
}

/// Reorders tracks so requesters alternate, keeping each requester's order.
pub(crate) fn user_block_order(tracks: Vec<Track>) -> Vec<Track> {
    if tracks.len() < 2 {
        return tracks;
    }

    let total = tracks.len();
    interleave(group_by_requester(tracks), total)
}

/// Like [`user_block_order`], but each requester's block is shuffled first.
pub(crate) fn round_robin_order(tracks: Vec<Track>) -> Vec<Track> {
    if tracks.len() < 2 {
        return tracks;
    }

    let total = tracks.len();
    let mut groups = group_by_requester(tracks);
    for group in &mut groups {
        let mut block: Vec<Track> = group.drain(..).collect();
        fisher_yates(&mut block);
        group.extend(block);
    }

    interleave(groups, total)
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::{json, Value};

    use crate::model::{SourceName, Track};

    /// Builds a minimal track for queue tests.
    pub fn track(identifier: &str, requester: &str, duration: u64) -> Track {
        Track {
            encoded: format!("enc:{}", identifier),
            title: format!("title {}", identifier),
            identifier: identifier.to_owned(),
            author: "author".to_owned(),
            duration,
            isrc: None,
            is_seekable: true,
            is_stream: false,
            uri: Some(format!("https://example.com/{}", identifier)),
            artwork_url: None,
            thumbnail: None,
            source_name: SourceName::Http,
            plugin_info: Value::Null,
            custom_data: Value::Null,
            requester: json!({ "id": requester }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{test_support::track, *};

    #[test]
    fn user_block_order_alternates_requesters_and_keeps_group_order() {
        let tracks = vec![
            track("a1", "alice", 1),
            track("a2", "alice", 1),
            track("b1", "bob", 1),
            track("a3", "alice", 1),
            track("b2", "bob", 1),
        ];

        let ordered: Vec<String> = user_block_order(tracks)
            .into_iter()
            .map(|t| t.identifier)
            .collect();

        assert_eq!(ordered, ["a1", "b1", "a2", "b2", "a3"]);
    }

    #[test]
    fn shuffles_keep_the_multiset_of_tracks() {
        let tracks: Vec<Track> = (0..20)
            .map(|i| track(&format!("t{}", i), if i % 3 == 0 { "a" } else { "b" }, 1))
            .collect();
        let expected: HashSet<String> = tracks.iter().map(|t| t.identifier.clone()).collect();

        let mut shuffled = tracks.clone();
        fisher_yates(&mut shuffled);
        assert_eq!(
            shuffled
                .iter()
                .map(|t| t.identifier.clone())
                .collect::<HashSet<_>>(),
            expected
        );

        for reordered in [
            user_block_order(tracks.clone()),
            round_robin_order(tracks.clone()),
        ] {
            assert_eq!(reordered.len(), tracks.len());
            assert_eq!(
                reordered
                    .into_iter()
                    .map(|t| t.identifier)
                    .collect::<HashSet<_>>(),
                expected
            );
        }
    }

    #[test]
    fn requester_key_falls_back_to_the_raw_value() {
        let mut anonymous = track("x", "ignored", 1);
        anonymous.requester = serde_json::json!("someone");

        assert_eq!(requester_key(&anonymous), "\"someone\"");
        assert_eq!(requester_key(&track("y", "42", 1)), "42");
    }
}
