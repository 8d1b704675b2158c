//! Vigia signal-channel protocol definitions
//!
//! This crate contains the wire types exchanged with the signaling service:
//! inbound availability/session/command events and outbound
//! join/playlist/result/heartbeat messages. Payloads arrive as
//! loosely-typed JSON; [`InboundEvent::from_value`] is the single
//! validation point that turns them into tagged variants, so the engine
//! never trusts payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events delivered by the signaling service to a viewer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// The remote broadcast feed became available or unavailable.
    /// May piggyback the current fallback playlist.
    RemoteAvailabilityChanged {
        available: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playlist: Option<Vec<String>>,
    },

    /// The fallback playlist for this session was replaced.
    PlaylistUpdated { list: Vec<String> },

    /// The viewer session is live on the server side.
    /// Carries the initial availability flag and playlist when known.
    SessionStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        available: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playlist: Option<Vec<String>>,
    },

    /// The viewer session was torn down upstream. Terminal.
    SessionStopped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A remote-control command to forward to the local encoder client.
    /// Correlated when `correlation_id` is present, fire-and-forget
    /// otherwise.
    RemoteCommand {
        action: String,
        #[serde(default)]
        params: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    /// Server-directed switch to local playback regardless of current
    /// availability belief (e.g. upstream relay maintenance).
    ForceLocalPlayback {
        list: Vec<String>,
        #[serde(default)]
        reason: String,
    },
}

/// Messages sent upstream over the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Announce this viewer on its session key.
    Join { session_key: String },

    /// Ask for a fresh fallback playlist.
    RequestPlaylist { session_key: String },

    /// Correlated result of a forwarded remote command.
    RemoteCommandResult {
        correlation_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Keep-alive tick.
    Heartbeat,

    /// Unsolicited encoder state change (stream/record/scene), re-emitted
    /// upstream so server-side state stays live without polling.
    EncoderEvent {
        event: String,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// Aggregated encoder status snapshot.
    EncoderStatus {
        status: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

/// Transport-level status of the signaling connection, reported by the
/// channel adapter. Not a wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Up,
    Down { reason: String },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("event payload is not a JSON object")]
    NotAnObject,

    #[error("event payload has no \"type\" field")]
    MissingType,

    #[error("unknown or malformed event {event_type:?}: {source}")]
    Malformed {
        event_type: String,
        source: serde_json::Error,
    },
}

impl InboundEvent {
    /// Validate a loosely-typed JSON payload into a tagged event.
    ///
    /// Rejects non-objects, payloads without a `type` tag, and payloads
    /// whose fields do not match the tagged variant, so malformed events
    /// can be logged and dropped at the ingestion boundary instead of
    /// corrupting session state.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let event_type = obj
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();

        serde_json::from_value(value).map_err(|source| DecodeError::Malformed { event_type, source })
    }
}
