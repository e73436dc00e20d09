//! Last.fm similar-track fallback, used when every platform strategy came up
//! empty.

use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::load_candidates;
use crate::{
    error::{Error, Result},
    model::Track,
    player::Player,
    search,
};

const API_ENDPOINT: &str = "https://ws.audioscrobbler.com/2.0/";

/// A similar track candidate: artist and title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub artist: String,
    pub title: String,
}

pub(crate) struct LastFmSource {
    api_key: String,
    http: Client,
}

impl LastFmSource {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: Client::new(),
        }
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut url = format!(
            "{}?method={}&api_key={}&format=json",
            API_ENDPOINT, method, self.api_key
        );
        for (key, value) in params {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }

        self.http
            .get(url)
            .send()
            .await
            .map_err(Error::Reqwest)?
            .json()
            .await
            .map_err(Error::Reqwest)
    }

    /// `track.getSimilar` for an artist/title pair.
    async fn similar_tracks(&self, artist: &str, title: &str) -> Result<Vec<Candidate>> {
        let body = self
            .call(
                "track.getSimilar",
                &[("artist", artist), ("track", title), ("limit", "10")],
            )
            .await?;

        Ok(parse_candidates(
            body.pointer("/similartracks/track"),
            Some(artist),
        ))
    }

    /// `artist.getTopTracks`, the wider net when nothing is similar.
    async fn top_tracks(&self, artist: &str) -> Result<Vec<Candidate>> {
        let body = self
            .call("artist.getTopTracks", &[("artist", artist), ("limit", "10")])
            .await?;

        Ok(parse_candidates(
            body.pointer("/toptracks/track"),
            Some(artist),
        ))
    }

    /// `track.search`, used to recover an artist when only a title is known.
    async fn recover_artist(&self, title: &str) -> Result<Option<String>> {
        let body = self
            .call("track.search", &[("track", title), ("limit", "1")])
            .await?;

        Ok(body
            .pointer("/results/trackmatches/track")
            .and_then(|v| v.as_array())
            .and_then(|matches| matches.first())
            .and_then(|m| m.get("artist"))
            .and_then(|a| a.as_str())
            .map(str::to_owned))
    }

    /// Picks a random similar track and resolves it through the node on the
    /// manager's default search platform.
    pub(crate) async fn recommend(&self, player: &Player, seed: &Track) -> Result<Vec<Track>> {
        let Some(manager) = player.manager() else {
            return Ok(Vec::new());
        };

        let title = seed.title.clone();
        let artist = if seed.author.trim().is_empty() {
            match self.recover_artist(&title).await? {
                Some(artist) => artist,
                None => return Ok(Vec::new()),
            }
        } else {
            seed.author.clone()
        };

        let mut candidates = self.similar_tracks(&artist, &title).await?;
        if candidates.is_empty() {
            candidates = self.top_tracks(&artist).await?;
        }

        let Some(choice) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            return Ok(Vec::new());
        };
        debug!("last.fm picked '{} - {}'", choice.artist, choice.title);

        let identifier = search::build_identifier(
            &format!("{} - {}", choice.artist, choice.title),
            manager.default_search_platform(),
        );
        let resolved = load_candidates(player, &identifier).await?;
        Ok(resolved.into_iter().take(1).collect())
    }
}

/// Shapes the API's track arrays: the artist is an object on most methods
/// and a plain string on `track.search`.
fn parse_candidates(tracks: Option<&Value>, fallback_artist: Option<&str>) -> Vec<Candidate> {
    let Some(tracks) = tracks.and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    tracks
        .iter()
        .filter_map(|entry| {
            let title = entry.get("name")?.as_str()?.to_owned();
            let artist = match entry.get("artist") {
                Some(Value::String(name)) => name.clone(),
                Some(Value::Object(artist)) => artist.get("name")?.as_str()?.to_owned(),
                _ => fallback_artist?.to_owned(),
            };
            Some(Candidate { artist, title })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn candidates_parse_both_artist_shapes() {
        let similar = json!([
            {"name": "Song A", "artist": {"name": "Artist A"}},
            {"name": "Song B", "artist": "Artist B"},
            {"name": "No Artist"},
            {"artist": {"name": "No Title"}}
        ]);

        let parsed = parse_candidates(Some(&similar), Some("Fallback"));

        assert_eq!(
            parsed,
            [
                Candidate { artist: "Artist A".into(), title: "Song A".into() },
                Candidate { artist: "Artist B".into(), title: "Song B".into() },
                Candidate { artist: "Fallback".into(), title: "No Artist".into() },
            ]
        );
    }

    #[test]
    fn missing_sections_parse_as_empty() {
        assert!(parse_candidates(None, None).is_empty());
        assert!(parse_candidates(Some(&json!({"weird": true})), None).is_empty());
    }
}
