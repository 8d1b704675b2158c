//! Core data model for the arbitration engine.

use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid session key (test/demo use; real keys
/// are issued by the upstream service).
pub fn generate_session_key() -> String {
    nanoid!(12)
}

/// Opaque viewer session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    #[must_use]
    pub fn new() -> Self {
        Self(generate_session_key())
    }

    #[must_use]
    pub const fn from_string(key: String) -> Self {
        Self(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a viewer session.
///
/// Exactly one state is active at a time; every event has a defined
/// effect in every state (possibly "ignore"). `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    AwaitingSignal,
    LocalFallback,
    RemoteProbing,
    RemoteActive,
    Stopped,
}

impl SourceState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Which playback surface currently owns audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioOwner {
    None,
    Local,
    Remote,
}

/// Which surface the rendering layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSurface {
    None,
    Remote,
    Local,
}

/// Overlay requested on top of (or instead of) the active surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overlay {
    None,
    Waiting,
}

/// Mute assignment for both surfaces. At most one surface is audible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAssignment {
    pub local_muted: bool,
    pub remote_muted: bool,
}

impl AudioAssignment {
    /// The audio owner implied by this assignment.
    #[must_use]
    pub const fn owner(self) -> AudioOwner {
        match (self.local_muted, self.remote_muted) {
            (false, true) => AudioOwner::Local,
            (true, false) => AudioOwner::Remote,
            _ => AudioOwner::None,
        }
    }
}

/// Declarative playback snapshot emitted by the arbiter and applied to
/// concrete surfaces by an observer layer. Pure data; no element state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub active_surface: ActiveSurface,
    pub overlay: Overlay,
    pub message: Option<String>,
    pub audio: AudioAssignment,
    /// Advisory flag: recent media segments loaded slower than real time.
    pub low_bandwidth: bool,
}

impl DesiredState {
    /// Waiting overlay with no active surface and both surfaces muted.
    #[must_use]
    pub fn waiting(message: impl Into<String>) -> Self {
        Self {
            active_surface: ActiveSurface::None,
            overlay: Overlay::Waiting,
            message: Some(message.into()),
            audio: AudioAssignment { local_muted: true, remote_muted: true },
            low_bandwidth: false,
        }
    }
}

/// One health-monitor observation of the remote surface. Rolling only,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    pub current_time: f64,
    pub buffer_ahead_secs: f64,
    pub live_edge_gap_secs: f64,
    pub stagnant_ticks: u32,
}

/// A remote-control command to forward to the encoder client.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    pub action: String,
    pub params: serde_json::Value,
    pub correlation_id: Option<String>,
}

/// Outcome of a forwarded command, correlated 1:1 with the request when
/// a correlation id was supplied.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub correlation_id: String,
    pub success: bool,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}
