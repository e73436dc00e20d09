//! Related tracks via a fabricated YouTube mix-playlist URL.

use async_trait::async_trait;

use super::{load_candidates, random_list_index, AutoplaySource, Platform};
use crate::{
    error::Result,
    model::{SourceName, Track},
    player::Player,
};

pub(crate) struct YouTubeRelatedSource;

fn video_id(seed: &Track) -> Option<String> {
    match seed.source_name {
        SourceName::Youtube | SourceName::YoutubeMusic => Some(seed.identifier.clone()),
        _ => seed
            .uri
            .as_deref()
            .and_then(|uri| uri.split("v=").nth(1))
            .map(|rest| rest.split('&').next().unwrap_or(rest).to_owned()),
    }
}

#[async_trait]
impl AutoplaySource for YouTubeRelatedSource {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn recommend(&self, player: &Player, seed: &Track) -> Result<Vec<Track>> {
        let Some(id) = video_id(seed) else {
            return Ok(Vec::new());
        };

        // every video has an RD mix; an index past the head lands on a
        // related entry instead of the seed itself
        let url = format!(
            "https://www.youtube.com/watch?v={}&list=RD{}&index={}",
            id,
            id,
            random_list_index()
        );

        let candidates = load_candidates(player, &url).await?;
        Ok(candidates
            .into_iter()
            .filter(|t| t.identifier != id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::test_support::track;

    #[test]
    fn video_id_prefers_the_identifier_for_youtube_seeds() {
        let mut seed = track("dQw4w9WgXcQ", "u", 1);
        seed.source_name = SourceName::Youtube;
        assert_eq!(video_id(&seed).as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn video_id_parses_watch_urls_for_foreign_seeds() {
        let mut seed = track("sp-id", "u", 1);
        seed.uri = Some("https://www.youtube.com/watch?v=abc123xyz00&t=10".to_owned());
        assert_eq!(video_id(&seed).as_deref(), Some("abc123xyz00"));

        seed.uri = Some("https://example.com/nothing".to_owned());
        assert_eq!(video_id(&seed), None);
    }
}
