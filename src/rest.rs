//! Typed HTTP client for the node's `/v4` REST API.

use std::{
    any::type_name,
    sync::{Arc, RwLock},
    time::Duration,
};

use reqwest::{header::HeaderMap, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    model::{LoadResult, Lyrics, NodeInfo, NodeStats, PlayerUpdateState, TrackData},
    node::NodeOptions,
};

/// Error response returned by the node REST API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// The timestamp of the error in milliseconds since the epoch.
    pub timestamp: u64,
    /// The HTTP status code.
    pub status: u16,
    /// The HTTP status code message.
    pub error: String,
    /// The stack trace of the error, if the node was asked for one.
    pub trace: Option<String>,
    /// The error message.
    pub message: String,
    /// The request path.
    pub path: String,
}

/// Voice credentials the node needs to connect to the voice gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceData {
    /// The voice token to authenticate with.
    pub token: String,
    /// The voice endpoint to connect to.
    pub endpoint: String,
    /// The voice session id to authenticate with.
    pub session_id: String,
}

/// Request used by [`RestClient::update_player`] to update the player on the node.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerData {
    /// The encoded track to play. `Some(None)` stops the current track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_track: Option<Option<String>>,
    /// The identifier of the track to play.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// The track start time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// The track end time in milliseconds (must be > 0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Option<u64>>,
    /// The player volume from 0 to 1000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    /// The track position in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    /// Whether the player is paused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    /// The filters to apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    /// Information required for connecting to the voice gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceData>,
}

/// A player as the node reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    /// The guild id of the player.
    pub guild_id: String,
    /// The current playing track.
    pub track: Option<TrackData>,
    /// The volume of the player, range 0-1000, in percentage.
    pub volume: u16,
    /// Whether the player is paused.
    pub paused: bool,
    /// The live state of the player.
    pub state: PlayerUpdateState,
    /// The voice state of the player.
    pub voice: Value,
    /// The filters applied to the player.
    #[serde(default)]
    pub filters: Value,
}

/// REST client with headers (authorization and user agent) predefined and
/// ready to use. All calls are rooted at `/v4` on the node.
#[derive(Clone)]
pub struct RestClient {
    http_client: Client,
    base_uri: Arc<String>,
    timeout: Duration,
    session_id: Arc<RwLock<Option<String>>>,
}

impl RestClient {
    /// Creates a REST client for a node. Does no I/O.
    pub(crate) fn new(options: &NodeOptions) -> Result<Self> {
        let http_client = Client::builder()
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(
                    "Authorization",
                    options
                        .password
                        .parse()
                        .map_err(Error::InvalidHeaderValue)?,
                );
                headers
            })
            .user_agent(crate::client_name())
            .build()
            .map_err(Error::Reqwest)?;

        let base_uri = format!(
            "{}://{}:{}/v4",
            match options.use_ssl {
                true => "https",
                false => "http",
            },
            options.host,
            options.port,
        );

        Ok(Self {
            http_client,
            base_uri: Arc::new(base_uri),
            timeout: Duration::from_millis(options.request_timeout),
            session_id: Arc::new(RwLock::new(None)),
        })
    }

    /// The session ID this client operates under, if the websocket received one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().unwrap().clone()
    }

    /// Stores a session ID for the session-scoped endpoints.
    pub fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.write().unwrap() = session_id;
    }

    fn require_session(&self) -> Result<String> {
        self.session_id()
            .ok_or_else(|| Error::MissingSessionId(self.base_uri.as_str().to_owned()))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let uri = format!("{}{}", self.base_uri, path);
        debug!("calling '{} {}'...", method, uri);

        let mut request = self
            .http_client
            .request(method, &uri)
            .timeout(self.timeout);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(Error::Reqwest)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(Error::Reqwest)?;

        if !status.is_success() {
            warn!("'{}' answered with status {}", uri, status);

            if status == StatusCode::UNAUTHORIZED {
                return Err(Error::RestUnauthorized);
            }

            return Err(Error::RestError {
                status: status.as_u16(),
                response: serde_json::from_slice(&bytes).ok(),
            });
        }

        // endpoints answering 204 still need to satisfy T, e.g. Value::Null
        if bytes.is_empty() {
            return parse_response(b"null");
        }

        parse_response(&bytes)
    }

    /// For endpoints that answer 204 No Content.
    async fn request_empty(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<()> {
        let uri = format!("{}{}", self.base_uri, path);
        debug!("calling '{} {}'...", method, uri);

        let mut request = self
            .http_client
            .request(method, &uri)
            .timeout(self.timeout);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(Error::Reqwest)?;

        let status = response.status();
        if !status.is_success() {
            warn!("'{}' answered with status {}", uri, status);

            if status == StatusCode::UNAUTHORIZED {
                return Err(Error::RestUnauthorized);
            }

            let bytes = response.bytes().await.map_err(Error::Reqwest)?;
            return Err(Error::RestError {
                status: status.as_u16(),
                response: serde_json::from_slice(&bytes).ok(),
            });
        }

        Ok(())
    }

    /// Generic GET under `/v4`. Returns the parsed JSON body.
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None).await
    }

    /// Generic POST under `/v4`.
    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Generic PATCH under `/v4`.
    pub async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// Generic PUT under `/v4`.
    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Generic DELETE under `/v4`.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.request_empty(Method::DELETE, path, None).await
    }

    /// Updates or creates the player for this guild in the current session.
    pub async fn update_player(
        &self,
        guild_id: u64,
        data: &UpdatePlayerData,
        no_replace: bool,
    ) -> Result<PlayerData> {
        let path = format!(
            "/sessions/{}/players/{}?noReplace={}",
            self.require_session()?,
            guild_id,
            no_replace
        );

        self.request(
            Method::PATCH,
            &path,
            Some(serde_json::to_value(data).map_err(Error::Json)?),
        )
        .await
    }

    /// Destroys the player for this guild in the current session.
    pub async fn destroy_player(&self, guild_id: u64) -> Result<()> {
        let path = format!("/sessions/{}/players/{}", self.require_session()?, guild_id);
        self.request_empty(Method::DELETE, &path, None).await
    }

    /// Returns the player for this guild in the current session.
    pub async fn get_player(&self, guild_id: u64) -> Result<PlayerData> {
        let path = format!("/sessions/{}/players/{}", self.require_session()?, guild_id);
        self.request(Method::GET, &path, None).await
    }

    /// Returns all players in the current session.
    pub async fn get_all_players(&self) -> Result<Vec<PlayerData>> {
        let path = format!("/sessions/{}/players", self.require_session()?);
        self.request(Method::GET, &path, None).await
    }

    /// Resolves an identifier into tracks.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        let path = format!(
            "/loadtracks?identifier={}",
            urlencoding::encode(identifier)
        );
        self.request(Method::GET, &path, None).await
    }

    /// Decodes a batch of encoded track blobs.
    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<TrackData>> {
        self.request(
            Method::POST,
            "/decodetracks",
            Some(serde_json::to_value(encoded).map_err(Error::Json)?),
        )
        .await
    }

    /// Fetches the node capabilities.
    pub async fn get_info(&self) -> Result<NodeInfo> {
        self.request(Method::GET, "/info", None).await
    }

    /// Fetches the node statistics.
    pub async fn get_stats(&self) -> Result<NodeStats> {
        self.request(Method::GET, "/stats", None).await
    }

    /// Patches the current session, enabling or disabling resuming.
    pub async fn update_session(&self, resuming: bool, timeout_secs: u64) -> Result<Value> {
        let path = format!("/sessions/{}", self.require_session()?);
        self.request(
            Method::PATCH,
            &path,
            Some(serde_json::json!({
                "resuming": resuming,
                "timeout": timeout_secs,
            })),
        )
        .await
    }

    /// Returns the sponsorblock categories configured for this guild's player.
    pub async fn get_sponsor_block(&self, guild_id: u64) -> Result<Vec<String>> {
        let path = format!(
            "/sessions/{}/players/{}/sponsorblock/categories",
            self.require_session()?,
            guild_id
        );
        self.request(Method::GET, &path, None).await
    }

    /// Replaces the sponsorblock categories for this guild's player.
    pub async fn set_sponsor_block(&self, guild_id: u64, segments: &[String]) -> Result<()> {
        let path = format!(
            "/sessions/{}/players/{}/sponsorblock/categories",
            self.require_session()?,
            guild_id
        );
        self.request_empty(
            Method::PUT,
            &path,
            Some(serde_json::to_value(segments).map_err(Error::Json)?),
        )
        .await
    }

    /// Clears the sponsorblock categories for this guild's player.
    pub async fn delete_sponsor_block(&self, guild_id: u64) -> Result<()> {
        let path = format!(
            "/sessions/{}/players/{}/sponsorblock/categories",
            self.require_session()?,
            guild_id
        );
        self.request_empty(Method::DELETE, &path, None).await
    }

    /// Fetches lyrics for the track this guild's player currently plays.
    ///
    /// Returns `None` when the plugin knows the track but has no lyrics for it.
    pub async fn get_lyrics(&self, guild_id: u64, skip_track_source: bool) -> Result<Option<Lyrics>> {
        let path = format!(
            "/sessions/{}/players/{}/track/lyrics?skipTrackSource={}",
            self.require_session()?,
            guild_id,
            skip_track_source
        );

        match self.request(Method::GET, &path, None).await {
            Ok(lyrics) => Ok(Some(lyrics)),
            Err(Error::RestError { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Attempts to parse the byte array into the selected type; if this fails, a
/// new attempt is made parsing the input into an [`ErrorResponse`], which is
/// returned as [`Error::RestError`]; if this also fails,
/// [`Error::InvalidResponse`] is returned.
pub(crate) fn parse_response<T: DeserializeOwned>(response: &[u8]) -> Result<T> {
    serde_json::from_slice::<T>(response).map_err(|e1| {
        warn!("can't parse to '{}': {}", type_name::<T>(), e1);

        match serde_json::from_slice::<ErrorResponse>(response) {
            Ok(v) => Error::RestError {
                status: v.status,
                response: Some(v),
            },
            Err(e2) => Error::InvalidResponse(Some(e1), e2),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_player_skips_unset_fields_and_keeps_explicit_null() {
        let mut data = UpdatePlayerData::default();
        data.encoded_track = Some(None);
        data.paused = Some(false);

        let body = serde_json::to_value(&data).unwrap();

        assert_eq!(body, serde_json::json!({"encodedTrack": null, "paused": false}));
    }

    #[test]
    fn update_player_serializes_the_full_migration_body() {
        let data = UpdatePlayerData {
            encoded_track: Some(Some("QAAAjQIA".to_owned())),
            volume: Some(70),
            position: Some(30_000),
            paused: Some(false),
            voice: Some(VoiceData {
                token: "tok".to_owned(),
                endpoint: "voice.example.com".to_owned(),
                session_id: "abc".to_owned(),
            }),
            ..Default::default()
        };

        let body = serde_json::to_value(&data).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "encodedTrack": "QAAAjQIA",
                "volume": 70,
                "position": 30000,
                "paused": false,
                "voice": {"token": "tok", "endpoint": "voice.example.com", "sessionId": "abc"}
            })
        );
    }

    #[test]
    fn parse_response_falls_back_to_the_node_error_body() {
        let body = br#"{
            "timestamp": 1667857581613,
            "status": 404,
            "error": "Not Found",
            "trace": null,
            "message": "Player not found",
            "path": "/v4/sessions/abc/players/1"
        }"#;

        match parse_response::<PlayerData>(body) {
            Err(Error::RestError { status, response }) => {
                assert_eq!(status, 404);
                assert_eq!(response.unwrap().message, "Player not found");
            }
            other => panic!("expected RestError, got {:?}", other.map(|_| ())),
        }
    }
}
