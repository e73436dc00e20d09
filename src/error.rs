//! Error type shared by every tidelink component.

use std::{
    fmt::{self, Display, Formatter},
    io, result,
};

use reqwest::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::{self, http};

use crate::{model::Exception, rest::ErrorResponse};

/// A stable, machine-readable identity for an [`Error`] variant.
///
/// `name` never changes once published, and `number` stays inside the range
/// reserved for the component that produced the error: general 1000-1099,
/// manager 1100-1199, node 1200-1299, player 1300-1399, queue 1400-1499,
/// filters 1500-1599, rest 1600-1699, utils 1700-1799, plugin 1800-1899.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    /// The stable string code, e.g. `TL_NODE_CONNECT_FAILED`.
    pub name: &'static str,
    /// The stable numeric code, e.g. `1202`.
    pub number: u16,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.number)
    }
}

/// Enum that groups all the errors that can occur.
#[derive(Debug)]
pub enum Error {
    /// A configuration value was rejected before any I/O happened.
    InvalidConfig(String),
    /// An argument was rejected at the call boundary.
    InvalidArgument(String),
    /// The operation is not valid in the current lifecycle state.
    InvalidState(String),
    /// Generic HTTP errors produced using the `http` crate.
    Http(http::Error),
    /// Websocket errors generated by the `tungstenite` crate.
    WebSocket(tungstenite::Error),
    /// REST client errors generated by the `reqwest` crate.
    Reqwest(reqwest::Error),
    /// Error that can be generated when building REST and Websocket client headers.
    InvalidHeaderValue(InvalidHeaderValue),
    /// JSON (de)serialization failure outside of a REST response.
    Json(serde_json::Error),
    /// Filesystem failure from the persistence layer.
    Io(io::Error),

    /// No connected node matched the routing policy.
    NoUseableNodes,
    /// No player exists for this guild.
    PlayerNotFound(u64),
    /// No node with this identifier exists in the pool.
    NodeNotFound(String),
    /// A node with this identifier already exists in the pool.
    DuplicateNode(String),

    /// The node's websocket is not connected.
    NodeNotConnected(String),
    /// The node could not be (re)connected within the configured attempts.
    NodeConnectFailed {
        /// Identifier of the node that gave up.
        identifier: String,
        /// How many attempts were made before giving up.
        attempts: u32,
    },
    /// The node sent a frame that does not fit the protocol.
    NodeProtocolError(String),
    /// Error generated by trying to use the REST API without a session ID established by Websocket.
    MissingSessionId(String),

    /// The player has nothing to play.
    NoCurrentTrack,
    /// The previous-track stack is empty.
    NoPreviousTrack,
    /// The operation needs a voice channel and none is set.
    VoiceChannelMissing,
    /// Node migration needs the full voice state (session ID, token and endpoint).
    VoiceStateIncomplete,
    /// Dynamic repeat needs more than one upcoming track.
    DynamicRepeatQueueTooSmall,
    /// Volume must stay within 0..=1000.
    VolumeOutOfRange(u16),
    /// Enabling autoplay requires a bot user reference.
    AutoplayUserMissing,

    /// The queue has no tracks to operate on.
    QueueEmpty,
    /// A queue range was out of bounds.
    OutOfRange {
        /// Start of the rejected half-open range.
        start: usize,
        /// End of the rejected half-open range.
        end: usize,
        /// Queue size at the time of the call.
        size: usize,
    },

    /// An equalizer band outside 0..=14 was supplied.
    EqualizerBandOutOfRange(u8),
    /// An equalizer gain outside -0.25..=1.0 was supplied.
    EqualizerGainOutOfRange(f64),

    /// The node answered a REST call with a non-success status.
    RestError {
        /// HTTP status of the response.
        status: u16,
        /// The node's structured error body, if it sent one.
        response: Option<ErrorResponse>,
    },
    /// The node rejected the configured password.
    RestUnauthorized,
    /// Error generated by an attempt to parse the response of a request in the
    /// REST API: the first value is the error for the proposed type, the
    /// second the error for the `ErrorResponse` fallback.
    InvalidResponse(Option<serde_json::Error>, serde_json::Error),
    /// The node reported a load failure for an identifier.
    TrackLoadFailed(Exception),

    /// Writing or reading persisted state failed.
    PersistenceFailed(String),

    /// A plugin required by the operation is not loaded on the node.
    PluginMissing {
        /// Name of the missing plugin.
        plugin: &'static str,
        /// Identifier of the node that lacks it.
        node: String,
    },
}

impl Error {
    /// Returns the stable [`ErrorCode`] of this error.
    pub fn code(&self) -> ErrorCode {
        macro_rules! code {
            ($name:literal, $number:literal) => {
                ErrorCode {
                    name: $name,
                    number: $number,
                }
            };
        }

        match self {
            Self::InvalidConfig(_) => code!("TL_INVALID_CONFIG", 1001),
            Self::InvalidArgument(_) => code!("TL_INVALID_ARGUMENT", 1002),
            Self::InvalidState(_) => code!("TL_INVALID_STATE", 1003),
            Self::Http(_) => code!("TL_HTTP_ERROR", 1010),
            Self::WebSocket(_) => code!("TL_WEBSOCKET_ERROR", 1011),
            Self::Reqwest(_) => code!("TL_HTTP_CLIENT_ERROR", 1012),
            Self::InvalidHeaderValue(_) => code!("TL_INVALID_HEADER_VALUE", 1013),
            Self::Json(_) => code!("TL_JSON_ERROR", 1014),
            Self::Io(_) => code!("TL_IO_ERROR", 1015),

            Self::NoUseableNodes => code!("TL_MANAGER_NO_USEABLE_NODES", 1101),
            Self::PlayerNotFound(_) => code!("TL_MANAGER_PLAYER_NOT_FOUND", 1102),
            Self::NodeNotFound(_) => code!("TL_MANAGER_NODE_NOT_FOUND", 1103),
            Self::DuplicateNode(_) => code!("TL_MANAGER_DUPLICATE_NODE", 1104),

            Self::NodeNotConnected(_) => code!("TL_NODE_NOT_CONNECTED", 1201),
            Self::NodeConnectFailed { .. } => code!("TL_NODE_CONNECT_FAILED", 1202),
            Self::NodeProtocolError(_) => code!("TL_NODE_PROTOCOL_ERROR", 1203),
            Self::MissingSessionId(_) => code!("TL_NODE_MISSING_SESSION_ID", 1204),

            Self::NoCurrentTrack => code!("TL_PLAYER_NO_CURRENT_TRACK", 1301),
            Self::NoPreviousTrack => code!("TL_PLAYER_NO_PREVIOUS_TRACK", 1302),
            Self::VoiceChannelMissing => code!("TL_PLAYER_VOICE_CHANNEL_MISSING", 1303),
            Self::VoiceStateIncomplete => code!("TL_PLAYER_VOICE_STATE_INCOMPLETE", 1304),
            Self::DynamicRepeatQueueTooSmall => code!("TL_PLAYER_DYNAMIC_REPEAT_QUEUE", 1305),
            Self::VolumeOutOfRange(_) => code!("TL_PLAYER_VOLUME_OUT_OF_RANGE", 1306),
            Self::AutoplayUserMissing => code!("TL_PLAYER_AUTOPLAY_USER_MISSING", 1307),

            Self::QueueEmpty => code!("TL_QUEUE_EMPTY", 1401),
            Self::OutOfRange { .. } => code!("TL_QUEUE_OUT_OF_RANGE", 1402),

            Self::EqualizerBandOutOfRange(_) => code!("TL_FILTERS_BAND_OUT_OF_RANGE", 1501),
            Self::EqualizerGainOutOfRange(_) => code!("TL_FILTERS_GAIN_OUT_OF_RANGE", 1502),

            Self::RestError { .. } => code!("TL_REST_REQUEST_FAILED", 1601),
            Self::RestUnauthorized => code!("TL_REST_UNAUTHORIZED", 1602),
            Self::InvalidResponse(..) => code!("TL_REST_INVALID_RESPONSE", 1603),
            Self::TrackLoadFailed(_) => code!("TL_REST_TRACK_LOAD_FAILED", 1604),

            Self::PersistenceFailed(_) => code!("TL_PERSISTENCE_FAILED", 1701),

            Self::PluginMissing { .. } => code!("TL_PLUGIN_MISSING", 1801),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(m) => write!(f, "invalid configuration: {}", m),
            Self::InvalidArgument(m) => write!(f, "invalid argument: {}", m),
            Self::InvalidState(m) => write!(f, "invalid state: {}", m),
            Self::Http(e) => e.fmt(f),
            Self::WebSocket(e) => e.fmt(f),
            Self::Reqwest(e) => e.fmt(f),
            Self::InvalidHeaderValue(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::NoUseableNodes => write!(f, "there're no useable nodes connected"),
            Self::PlayerNotFound(guild) => write!(f, "no player for guild {}", guild),
            Self::NodeNotFound(id) => write!(f, "node '{}' isn't in the pool", id),
            Self::DuplicateNode(id) => write!(f, "node '{}' is already in the pool", id),
            Self::NodeNotConnected(id) => write!(f, "node '{}' websocket hasn't connected", id),
            Self::NodeConnectFailed { attempts, .. } => {
                write!(f, "Unable to connect after {} attempts.", attempts)
            }
            Self::NodeProtocolError(m) => write!(f, "node protocol error: {}", m),
            Self::MissingSessionId(id) => write!(f, "node '{}' has no session id yet", id),
            Self::NoCurrentTrack => write!(f, "there's no current track to play"),
            Self::NoPreviousTrack => write!(f, "there's no previous track"),
            Self::VoiceChannelMissing => write!(f, "no voice channel id has been set"),
            Self::VoiceStateIncomplete => {
                write!(f, "voice state is missing the session id, token or endpoint")
            }
            Self::DynamicRepeatQueueTooSmall => {
                write!(f, "dynamic repeat needs more than one upcoming track")
            }
            Self::VolumeOutOfRange(v) => write!(f, "volume {} isn't within 0..=1000", v),
            Self::AutoplayUserMissing => write!(f, "autoplay needs a bot user to be set"),
            Self::QueueEmpty => write!(f, "the queue is empty"),
            Self::OutOfRange { start, end, size } => {
                write!(f, "range {}..{} isn't valid for queue size {}", start, end, size)
            }
            Self::EqualizerBandOutOfRange(band) => {
                write!(f, "equalizer band {} isn't within 0..=14", band)
            }
            Self::EqualizerGainOutOfRange(gain) => {
                write!(f, "equalizer gain {} isn't within -0.25..=1.0", gain)
            }
            Self::RestError { status, response } => match response {
                Some(body) => write!(f, "rest error {}: {}", status, body.message),
                None => write!(f, "rest error {}", status),
            },
            Self::RestUnauthorized => write!(f, "the node rejected the configured password"),
            Self::InvalidResponse(e1, e2) => match e1 {
                Some(e) => e.fmt(f),
                None => e2.fmt(f),
            },
            Self::TrackLoadFailed(exception) => write!(
                f,
                "track load failed: {}",
                exception.message.as_deref().unwrap_or(&exception.cause)
            ),
            Self::PersistenceFailed(m) => write!(f, "persistence failed: {}", m),
            Self::PluginMissing { plugin, node } => {
                write!(f, "plugin '{}' isn't available on node '{}'", plugin, node)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Just a `Result` with the error type set to `tidelink::Error`.
pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_stay_inside_their_component_range() {
        let cases = [
            (Error::InvalidConfig("x".into()), 1000),
            (Error::NoUseableNodes, 1100),
            (Error::NodeNotConnected("a".into()), 1200),
            (Error::NoPreviousTrack, 1300),
            (Error::QueueEmpty, 1400),
            (Error::EqualizerBandOutOfRange(15), 1500),
            (Error::RestUnauthorized, 1600),
            (Error::PersistenceFailed("x".into()), 1700),
            (
                Error::PluginMissing {
                    plugin: "sponsorblock-plugin",
                    node: "main".into(),
                },
                1800,
            ),
        ];

        for (error, base) in cases {
            let code = error.code();
            assert!(
                code.number >= base && code.number < base + 100,
                "{} is outside {}..{}",
                code,
                base,
                base + 100
            );
        }
    }

    #[test]
    fn connect_failed_message_matches_the_emitted_event() {
        let error = Error::NodeConnectFailed {
            identifier: "main".into(),
            attempts: 2,
        };

        assert_eq!(error.to_string(), "Unable to connect after 2 attempts.");
    }
}
