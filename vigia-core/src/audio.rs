//! Audio exclusivity policy and enforcement.
//!
//! At most one playback surface is audible at any instant. While the
//! remote feed is active the policy is not just applied at the
//! transition: a background task re-asserts it, because the underlying
//! surface may silently reset its own mute/volume flags.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{AudioAssignment, SourceState};
use crate::player::PlaybackSurface;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Interval of the mute re-assertion check while remote is active.
    pub enforce_interval_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { enforce_interval_ms: 500 }
    }
}

/// Pure mute-assignment rule table.
pub struct AudioPolicy;

impl AudioPolicy {
    /// | state          | remote audible | local audible        |
    /// |----------------|----------------|----------------------|
    /// | `RemoteActive` | always         | never (forced mute)  |
    /// | `LocalFallback`| never          | per user preference  |
    /// | other          | never          | never                |
    ///
    /// The remote feed overrides the user's audio preference
    /// unconditionally while active.
    #[must_use]
    pub const fn apply(state: SourceState, user_audio_enabled: bool) -> AudioAssignment {
        match state {
            SourceState::RemoteActive => {
                AudioAssignment { local_muted: true, remote_muted: false }
            }
            SourceState::LocalFallback => {
                AudioAssignment { local_muted: !user_audio_enabled, remote_muted: true }
            }
            _ => AudioAssignment { local_muted: true, remote_muted: true },
        }
    }
}

/// Apply an assignment to both concrete surfaces.
pub fn apply_assignment(
    assignment: AudioAssignment,
    local: &dyn PlaybackSurface,
    remote: &dyn PlaybackSurface,
) {
    local.set_muted(assignment.local_muted);
    local.set_volume(if assignment.local_muted { 0.0 } else { 1.0 });
    remote.set_muted(assignment.remote_muted);
    remote.set_volume(if assignment.remote_muted { 0.0 } else { 1.0 });
}

/// Background task that keeps the remote-active assignment in force.
///
/// Owned by the session; started on entering `RemoteActive`, cancelled on
/// leaving it. Dropping the enforcer also cancels the task.
pub struct AudioEnforcer {
    cancel: CancellationToken,
}

impl AudioEnforcer {
    pub fn start(
        config: &AudioConfig,
        local: Arc<dyn PlaybackSurface>,
        remote: Arc<dyn PlaybackSurface>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = Duration::from_millis(config.enforce_interval_ms);

        tokio::spawn(async move {
            let mut timer = interval(period);
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = timer.tick() => {
                        if !local.muted() || local.volume() > 0.0 {
                            debug!("Local surface un-muted itself during remote playback, re-muting");
                            local.set_muted(true);
                            local.set_volume(0.0);
                        }
                        if remote.muted() {
                            debug!("Remote surface was muted externally, restoring audio");
                            remote.set_muted(false);
                            remote.set_volume(1.0);
                        }
                    }
                }
            }
        });

        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for AudioEnforcer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioOwner;

    #[test]
    fn remote_active_forces_local_mute() {
        // User preference must not matter while remote is active.
        for user_audio in [true, false] {
            let a = AudioPolicy::apply(SourceState::RemoteActive, user_audio);
            assert!(a.local_muted);
            assert!(!a.remote_muted);
            assert_eq!(a.owner(), AudioOwner::Remote);
        }
    }

    #[test]
    fn local_fallback_follows_user_preference() {
        let enabled = AudioPolicy::apply(SourceState::LocalFallback, true);
        assert!(!enabled.local_muted);
        assert!(enabled.remote_muted);

        let disabled = AudioPolicy::apply(SourceState::LocalFallback, false);
        assert!(disabled.local_muted);
        assert!(disabled.remote_muted);
    }

    #[test]
    fn other_states_are_silent() {
        for state in [
            SourceState::AwaitingSignal,
            SourceState::RemoteProbing,
            SourceState::Stopped,
        ] {
            let a = AudioPolicy::apply(state, true);
            assert!(a.local_muted && a.remote_muted);
            assert_eq!(a.owner(), AudioOwner::None);
        }
    }

    #[test]
    fn at_most_one_audible_in_all_states() {
        for state in [
            SourceState::AwaitingSignal,
            SourceState::LocalFallback,
            SourceState::RemoteProbing,
            SourceState::RemoteActive,
            SourceState::Stopped,
        ] {
            for user_audio in [true, false] {
                let a = AudioPolicy::apply(state, user_audio);
                assert!(
                    a.local_muted || a.remote_muted,
                    "both surfaces audible in {state:?}"
                );
            }
        }
    }
}
