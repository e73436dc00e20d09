//! Finds the next track when the queue runs dry, trying a configurable chain
//! of platform strategies before falling back to Last.fm.

use std::sync::Arc;

use async_trait::async_trait;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::Result,
    model::{LoadResult, Track, TrackData},
    player::Player,
};

mod lastfm;
mod probes;
mod soundcloud;
mod spotify;
mod youtube;

pub(crate) use lastfm::LastFmSource;

/// The platforms the recommender can probe, in the order configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    Spotify,
    Deezer,
    SoundCloud,
    Tidal,
    VkMusic,
    Qobuz,
    YouTube,
}

impl Platform {
    /// The source-manager name the node advertises for this platform.
    pub(crate) fn source_manager(&self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::Deezer => "deezer",
            Self::SoundCloud => "soundcloud",
            Self::Tidal => "tidal",
            Self::VkMusic => "vkmusic",
            Self::Qobuz => "qobuz",
            Self::YouTube => "youtube",
        }
    }
}

/// One strategy for finding related tracks. Implementations are black boxes
/// so tests can inject deterministic stand-ins.
#[async_trait]
pub trait AutoplaySource: Send + Sync {
    /// The platform this strategy probes.
    fn platform(&self) -> Platform;

    /// Returns candidate continuations for `seed`. An empty list and an
    /// error both mean "try the next strategy".
    async fn recommend(&self, player: &Player, seed: &Track) -> Result<Vec<Track>>;
}

/// Builds the production strategy for a platform.
pub(crate) fn source_for(platform: Platform) -> Arc<dyn AutoplaySource> {
    match platform {
        Platform::Spotify => Arc::new(spotify::SpotifySource::new()),
        Platform::Deezer => Arc::new(probes::ProbeSource::new(Platform::Deezer, "dzrec")),
        Platform::SoundCloud => Arc::new(soundcloud::SoundCloudSource::new()),
        Platform::Tidal => Arc::new(probes::ProbeSource::new(Platform::Tidal, "tdrec")),
        Platform::VkMusic => Arc::new(probes::ProbeSource::new(Platform::VkMusic, "vkrec")),
        Platform::Qobuz => Arc::new(probes::ProbeSource::new(Platform::Qobuz, "qbrec")),
        Platform::YouTube => Arc::new(youtube::YouTubeRelatedSource),
    }
}

/// Flattens any load result into its track list.
pub(crate) fn flatten_load(result: LoadResult) -> Vec<TrackData> {
    match result {
        LoadResult::Track(track) => vec![*track],
        LoadResult::Playlist(playlist) => playlist.tracks,
        LoadResult::Search(tracks) => tracks,
        LoadResult::Empty(_) | LoadResult::Error(_) => Vec::new(),
    }
}

/// Resolves an identifier on the player's node into built tracks, attributed
/// to the autoplay bot user.
pub(crate) async fn load_candidates(player: &Player, identifier: &str) -> Result<Vec<Track>> {
    let Some(manager) = player.manager() else {
        return Ok(Vec::new());
    };

    let result = player.node().rest().load_tracks(identifier).await?;
    let requester = player.autoplay_requester();

    Ok(flatten_load(result)
        .into_iter()
        .map(|data| manager.build_track(data, requester.clone()))
        .collect())
}

/// Drops the seed itself and duplicate URIs from a candidate list.
pub(crate) fn dedup_candidates(candidates: Vec<Track>, seed: &Track) -> Vec<Track> {
    let mut seen: Vec<String> = Vec::new();
    candidates
        .into_iter()
        .filter(|candidate| {
            if candidate.encoded == seed.encoded {
                return false;
            }
            match (&candidate.uri, &seed.uri) {
                (Some(c), Some(s)) if c == s => return false,
                _ => {}
            }
            if let Some(uri) = &candidate.uri {
                if seen.contains(uri) {
                    return false;
                }
                seen.push(uri.clone());
            }
            true
        })
        .collect()
}

/// Runs the configured strategy chain for one recommendation.
///
/// Strategies whose platform the node doesn't advertise are skipped; the
/// first one that yields a deduplicated, non-empty list wins, and a random
/// candidate from it is returned. Failures fall through silently.
pub(crate) async fn find_recommendation(player: &Player, seed: &Track) -> Option<Track> {
    let manager = player.manager()?;
    let node_info = player.node().info();

    for source in manager.autoplay_sources() {
        let advertised = node_info
            .as_ref()
            .map(|info| info.has_source_manager(source.platform().source_manager()))
            .unwrap_or(false);
        if !advertised {
            continue;
        }

        match source.recommend(player, seed).await {
            Ok(candidates) => {
                let candidates = dedup_candidates(candidates, seed);
                if let Some(track) = candidates.choose(&mut rand::thread_rng()) {
                    return Some(track.clone());
                }
            }
            Err(e) => debug!(
                "autoplay source {:?} failed for guild {}: {}",
                source.platform(),
                player.guild_id(),
                e
            ),
        }
    }

    let lastfm = manager.lastfm_source()?;
    match lastfm.recommend(player, seed).await {
        Ok(candidates) => {
            let candidates = dedup_candidates(candidates, seed);
            candidates.choose(&mut rand::thread_rng()).cloned()
        }
        Err(e) => {
            debug!("last.fm fallback failed for guild {}: {}", player.guild_id(), e);
            None
        }
    }
}

/// A random related-list index, the range YouTube mixes actually serve.
pub(crate) fn random_list_index() -> u32 {
    rand::thread_rng().gen_range(2..=24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::test_support::track;

    #[test]
    fn dedup_drops_the_seed_and_duplicate_uris() {
        let seed = track("seed", "bot", 1);
        let duplicate = track("c1", "bot", 1);
        let candidates = vec![
            track("seed", "bot", 1),
            duplicate.clone(),
            duplicate.clone(),
            track("c2", "bot", 1),
        ];

        let deduped = dedup_candidates(candidates, &seed);
        let ids: Vec<String> = deduped.into_iter().map(|t| t.identifier).collect();
        assert_eq!(ids, ["c1", "c2"]);
    }

    #[test]
    fn list_index_stays_inside_the_served_range() {
        for _ in 0..100 {
            let index = random_list_index();
            assert!((2..=24).contains(&index));
        }
    }
}
