//! Search query building and result shaping for `loadtracks`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::Track;

/// The platforms a plain-text query can be prefixed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchPlatform {
    Youtube,
    YoutubeMusic,
    SoundCloud,
    Spotify,
    Deezer,
    Tidal,
    VkMusic,
    Qobuz,
}

impl SearchPlatform {
    /// The `loadtracks` identifier prefix of this platform.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Youtube => "ytsearch",
            Self::YoutubeMusic => "ytmsearch",
            Self::SoundCloud => "scsearch",
            Self::Spotify => "spsearch",
            Self::Deezer => "dzsearch",
            Self::Tidal => "tdsearch",
            Self::VkMusic => "vksearch",
            Self::Qobuz => "qbsearch",
        }
    }
}

/// Builds the identifier for a query: URLs pass through untouched, anything
/// else gets the platform search prefix.
pub(crate) fn build_identifier(query: &str, platform: SearchPlatform) -> String {
    if query.starts_with("http://") || query.starts_with("https://") {
        return query.to_owned();
    }

    format!("{}:{}", platform.prefix(), query)
}

/// How a search resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResultKind {
    Track,
    Playlist,
    Search,
    Empty,
}

/// A playlist descriptor built from a playlist load.
#[derive(Debug, Clone)]
pub struct Playlist {
    /// The playlist name.
    pub name: String,
    /// Index of the selected track, if the source marked one.
    pub selected_track: Option<usize>,
    /// Total playlist duration in milliseconds.
    pub duration: u64,
}

/// Result of [`crate::manager::Manager::search`].
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// How the identifier resolved.
    pub kind: SearchResultKind,
    /// The built tracks, in source order.
    pub tracks: Vec<Track>,
    /// The playlist descriptor for playlist loads.
    pub playlist: Option<Playlist>,
}

fn marketing_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)[\(\[\{]\s*(official(\s+(music|lyric|lyrics))?\s+(video|audio)|official|music\s+video|lyric\s+video|lyrics|visualizer|audio|hd|hq|4k|full\s+album|out\s+now|free\s+download|download|remaster(ed)?(\s+\d{4})?)\s*[\)\]\}]",
        )
        .unwrap()
    })
}

fn leftover_marketing_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\s+(official\s+(music\s+)?video|official\s+audio|lyric\s+video)\s*$")
            .unwrap()
    })
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

/// Drops bracket groups that were opened but never closed (and vice versa).
fn balance_brackets(title: &str) -> String {
    let pairs = [('(', ')'), ('[', ']'), ('{', '}')];
    let mut out = String::with_capacity(title.len());
    let mut stack: Vec<(char, usize)> = Vec::new();

    for c in title.chars() {
        if pairs.iter().any(|(open, _)| *open == c) {
            stack.push((c, out.len()));
            out.push(c);
        } else if let Some((open, _)) = pairs.iter().find(|(_, close)| *close == c) {
            match stack.last() {
                Some((top, _)) if top == open => {
                    stack.pop();
                    out.push(c);
                }
                _ => {} // closing bracket with no opener, drop it
            }
        } else {
            out.push(c);
        }
    }

    // unclosed openers lose everything from the opener onwards
    if let Some((_, at)) = stack.first() {
        out.truncate(*at);
    }

    out
}

/// Cleans a YouTube video title: strips marketing noise, balances brackets
/// and, when the title follows the `Artist - Title` convention with the
/// artist already known, keeps only the title part.
pub(crate) fn normalize_youtube_title(title: &str, author: &str) -> String {
    let mut cleaned = marketing_pattern().replace_all(title, "").to_string();
    cleaned = leftover_marketing_pattern().replace_all(&cleaned, "").to_string();
    cleaned = balance_brackets(&cleaned);
    cleaned = whitespace_pattern().replace_all(&cleaned, " ").trim().to_string();

    if let Some((artist, rest)) = cleaned.split_once(" - ") {
        let channel = author
            .trim_end_matches(" - Topic")
            .trim_end_matches("VEVO")
            .trim();
        if !rest.trim().is_empty() && artist.trim().eq_ignore_ascii_case(channel) {
            cleaned = rest.trim().to_string();
        }
    }

    if cleaned.is_empty() {
        title.to_owned()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_not_prefixed() {
        assert_eq!(
            build_identifier("https://example.com/x", SearchPlatform::Youtube),
            "https://example.com/x"
        );
        assert_eq!(
            build_identifier("never gonna give you up", SearchPlatform::Deezer),
            "dzsearch:never gonna give you up"
        );
    }

    #[test]
    fn marketing_brackets_are_stripped() {
        assert_eq!(
            normalize_youtube_title("Song Name (Official Music Video)", "Channel"),
            "Song Name"
        );
        assert_eq!(
            normalize_youtube_title("Song Name [Lyrics] (HD)", "Channel"),
            "Song Name"
        );
    }

    #[test]
    fn unbalanced_brackets_are_dropped() {
        assert_eq!(
            normalize_youtube_title("Song Name (feat. Someone", "Channel"),
            "Song Name"
        );
        assert_eq!(
            normalize_youtube_title("Song Name feat. Someone)", "Channel"),
            "Song Name feat. Someone"
        );
    }

    #[test]
    fn artist_prefix_is_split_when_it_matches_the_channel() {
        assert_eq!(
            normalize_youtube_title("Rick Astley - Never Gonna Give You Up", "Rick Astley"),
            "Never Gonna Give You Up"
        );
        assert_eq!(
            normalize_youtube_title("Rick Astley - Never Gonna Give You Up", "Rick AstleyVEVO"),
            "Never Gonna Give You Up"
        );
        // unrelated channels keep the full title
        assert_eq!(
            normalize_youtube_title("Rick Astley - Never Gonna Give You Up", "Some Reuploader"),
            "Rick Astley - Never Gonna Give You Up"
        );
    }

    #[test]
    fn cleaning_never_returns_an_empty_title() {
        assert_eq!(normalize_youtube_title("(Official Video)", "Channel"), "(Official Video)");
    }
}
