//! Spotify recommendations via the web player's rotating one-time code.
//!
//! The web player hands out short-lived anonymous bearers to clients that
//! present a TOTP derived from an obfuscated byte array in its JavaScript
//! bundle. Best-effort and replaceable: any failure here falls through to
//! the next autoplay source.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha1::Sha1;
use tracing::debug;

use super::{load_candidates, AutoplaySource, Platform};
use crate::{
    error::{Error, Result},
    model::{SourceName, Track},
    player::Player,
};

const TOKEN_ENDPOINT: &str = "https://open.spotify.com/get_access_token";
const RECOMMENDATIONS_ENDPOINT: &str = "https://api.spotify.com/v1/recommendations";
const TOTP_PERIOD_SECS: u64 = 30;

/// Obfuscated secret bytes as shipped in the web player bundle.
const SECRET_BYTES: [u8; 17] = [
    58, 107, 27, 110, 4, 98, 38, 111, 27, 121, 35, 38, 115, 24, 107, 54, 113,
];

pub(crate) struct SpotifySource {
    http: Client,
}

impl SpotifySource {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    async fn fetch_access_token(&self) -> Result<String> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let code = generate_totp(
            &transform_secret(&SECRET_BYTES),
            now_ms / 1000 / TOTP_PERIOD_SECS,
        );

        let url = format!(
            "{}?reason=transport&productType=embed&totp={}&totpVer=5&ts={}",
            TOKEN_ENDPOINT, code, now_ms
        );

        let body: Value = self
            .http
            .get(url)
            .send()
            .await
            .map_err(Error::Reqwest)?
            .json()
            .await
            .map_err(Error::Reqwest)?;

        body.get("accessToken")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| Error::InvalidState("token response had no accessToken".to_owned()))
    }

    /// Finds the seed's spotify track id, resolving through the node when
    /// the seed came from another platform.
    async fn seed_track_id(&self, player: &Player, seed: &Track) -> Result<Option<String>> {
        if let Some(uri) = &seed.uri {
            if let Some(rest) = uri.split("open.spotify.com/track/").nth(1) {
                let id = rest.split(['?', '/']).next().unwrap_or(rest);
                return Ok(Some(id.to_owned()));
            }
        }

        if seed.source_name == SourceName::Spotify {
            return Ok(Some(seed.identifier.clone()));
        }

        let query = format!("spsearch:{} - {}", seed.author, seed.title);
        let resolved = load_candidates(player, &query).await?;
        Ok(resolved.into_iter().next().map(|t| t.identifier))
    }
}

#[async_trait]
impl AutoplaySource for SpotifySource {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    async fn recommend(&self, player: &Player, seed: &Track) -> Result<Vec<Track>> {
        let Some(seed_id) = self.seed_track_id(player, seed).await? else {
            return Ok(Vec::new());
        };

        let token = self.fetch_access_token().await?;

        let url = format!(
            "{}?seed_tracks={}&limit=10",
            RECOMMENDATIONS_ENDPOINT, seed_id
        );
        let body: Value = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Error::Reqwest)?
            .json()
            .await
            .map_err(Error::Reqwest)?;

        let ids: Vec<String> = body
            .get("tracks")
            .and_then(|v| v.as_array())
            .map(|tracks| {
                tracks
                    .iter()
                    .filter_map(|t| t.get("id").and_then(|id| id.as_str()))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        debug!("spotify recommended {} candidate(s)", ids.len());

        let mut out = Vec::new();
        for id in ids.into_iter().take(5) {
            let url = format!("https://open.spotify.com/track/{}", id);
            match load_candidates(player, &url).await {
                Ok(tracks) => out.extend(tracks.into_iter().take(1)),
                Err(e) => debug!("can't resolve spotify track {}: {}", id, e),
            }
        }

        Ok(out)
    }
}

/// Deobfuscates the secret: every byte is xored with `(i % 33) + 9`, and the
/// resulting numbers are concatenated as decimal text to form the HMAC key.
pub(crate) fn transform_secret(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ ((i as u8 % 33) + 9))
        .map(|b| b.to_string())
        .collect::<String>()
        .into_bytes()
}

/// Standard HMAC-SHA1 one-time code: 6 digits from the given counter.
pub(crate) fn generate_totp(key: &[u8], counter: u64) -> String {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(key).expect("hmac-sha1 accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0x0f) as usize;
    let code = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    format!("{:06}", code % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_time_codes_match_the_rfc_4226_vectors() {
        let key = b"12345678901234567890";

        assert_eq!(generate_totp(key, 0), "755224");
        assert_eq!(generate_totp(key, 1), "287082");
        assert_eq!(generate_totp(key, 9), "520489");
    }

    #[test]
    fn secret_transform_xors_then_concatenates_decimals() {
        // 0x00 ^ 9 = 9, 0x02 ^ 10 = 8
        assert_eq!(transform_secret(&[0x00, 0x02]), b"98".to_vec());
        // index wraps modulo 33 before the offset is added, so the 34th
        // byte is treated like the first again
        let long = vec![0u8; 34];
        let transformed = transform_secret(&long);
        let as_text = String::from_utf8(transformed).unwrap();
        assert!(as_text.starts_with("910"));
        assert!(as_text.ends_with("419"));
    }

    #[test]
    fn codes_are_stable_within_a_period() {
        let key = transform_secret(&SECRET_BYTES);
        assert_eq!(generate_totp(&key, 57_339_621), generate_totp(&key, 57_339_621));
        assert_ne!(generate_totp(&key, 57_339_621), generate_totp(&key, 57_339_622));
    }
}
