//! Related tracks scraped from a SoundCloud track page's recommended section.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;

use super::{load_candidates, AutoplaySource, Platform};
use crate::{
    error::{Error, Result},
    model::Track,
    player::Player,
};

pub(crate) struct SoundCloudSource {
    http: Client,
}

impl SoundCloudSource {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

/// Pulls the recommended track hrefs out of the page markup.
fn scrape_recommended(html: &str, limit: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("article[itemprop='track'] > a[itemprop='url']") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(|href| {
            if href.starts_with("http") {
                href.to_owned()
            } else {
                format!("https://soundcloud.com{}", href)
            }
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl AutoplaySource for SoundCloudSource {
    fn platform(&self) -> Platform {
        Platform::SoundCloud
    }

    async fn recommend(&self, player: &Player, seed: &Track) -> Result<Vec<Track>> {
        let Some(uri) = seed.uri.as_deref().filter(|u| u.contains("soundcloud.com")) else {
            return Ok(Vec::new());
        };

        let page = self
            .http
            .get(format!("{}/recommended", uri.trim_end_matches('/')))
            .send()
            .await
            .map_err(Error::Reqwest)?
            .text()
            .await
            .map_err(Error::Reqwest)?;

        // Html isn't Send, so scraping finishes before the loads start
        let urls = scrape_recommended(&page, 5);
        debug!("soundcloud recommended {} candidate(s)", urls.len());

        let mut out = Vec::new();
        for url in urls {
            match load_candidates(player, &url).await {
                Ok(tracks) => out.extend(tracks.into_iter().take(1)),
                Err(e) => debug!("can't resolve soundcloud url {}: {}", url, e),
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommended_anchors_are_scraped_and_made_absolute() {
        let html = r#"
            <html><body>
              <section>
                <article itemprop="track">
                  <a itemprop="url" href="/artist-a/track-one">one</a>
                </article>
                <article itemprop="track">
                  <a itemprop="url" href="https://soundcloud.com/artist-b/track-two">two</a>
                </article>
                <article>
                  <a itemprop="url" href="/not-a-track">ignored</a>
                </article>
              </section>
            </body></html>
        "#;

        let urls = scrape_recommended(html, 5);
        assert_eq!(
            urls,
            [
                "https://soundcloud.com/artist-a/track-one",
                "https://soundcloud.com/artist-b/track-two"
            ]
        );
    }

    #[test]
    fn the_limit_caps_the_scrape() {
        let article = r#"<article itemprop="track"><a itemprop="url" href="/a/t"></a></article>"#;
        let html = article.repeat(10);

        assert_eq!(scrape_recommended(&html, 3).len(), 3);
    }
}
