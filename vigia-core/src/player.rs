//! Playback seams.
//!
//! The engine never touches a concrete media library or rendering
//! element. It drives two [`PlaybackSurface`]s (remote and local) and one
//! [`ManifestPlayer`] through these traits; the wiring layer binds them
//! to the real implementations and feeds player/surface events back into
//! the session queue.

use std::sync::Arc;

/// Fatal error classes reported by the manifest player. Everything here
/// triggers re-acquisition; recoverable degradation never reaches the
/// engine as an event (the health monitor observes it by sampling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalErrorKind {
    Network,
    Media,
    Other,
}

/// Events reported by the manifest player implementation.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Unrecoverable playback failure; the player instance is dead.
    FatalError { kind: FatalErrorKind, detail: String },

    /// A media segment finished downloading. Used for the low-bandwidth
    /// advisory: loading slower than ~real time means the connection
    /// cannot keep up.
    FragmentLoaded { load_time_ms: u64, duration_ms: u64 },
}

/// Events reported for the local fallback surface.
#[derive(Debug, Clone)]
pub enum LocalMediaEvent {
    /// Current fallback item played to completion.
    Ended,

    /// Current fallback item failed with a platform media error code.
    Error { code: u32 },
}

impl LocalMediaEvent {
    /// Decode failure (3) and unsupported source (4) cannot be retried on
    /// the same item; everything else gets one delayed resume attempt.
    #[must_use]
    pub const fn is_fatal_code(code: u32) -> bool {
        matches!(code, 3 | 4)
    }
}

/// Minimal manifest-player interface the engine depends on. Playhead
/// metrics live on [`PlaybackSurface`]; player events re-enter through
/// the session handle.
pub trait ManifestPlayer: Send + Sync {
    /// Begin loading the given manifest URL.
    fn load(&self, url: &str);

    /// Bind the player's output to a playback surface. Idempotent for
    /// the same surface.
    fn attach(&self, surface: Arc<dyn PlaybackSurface>);

    /// Tear down the current player instance and release its surface.
    /// Must be safe to call when nothing is loaded.
    fn destroy(&self);
}

/// A playback surface (video element equivalent). All calls are
/// non-blocking; implementations apply them to the real element.
pub trait PlaybackSurface: Send + Sync {
    fn set_source(&self, uri: &str);
    fn play(&self);
    fn pause(&self);
    fn is_paused(&self) -> bool;

    /// Current playhead position in seconds.
    fn current_time(&self) -> f64;

    /// Seconds of buffered media ahead of the playhead.
    fn buffered_ahead_secs(&self) -> f64;

    /// End of the seekable range (live edge for a live manifest).
    fn seekable_end(&self) -> f64;

    fn seek(&self, position: f64);

    fn set_muted(&self, muted: bool);
    fn muted(&self) -> bool;
    fn set_volume(&self, volume: f64);
    fn volume(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_media_codes() {
        assert!(LocalMediaEvent::is_fatal_code(3));
        assert!(LocalMediaEvent::is_fatal_code(4));
        assert!(!LocalMediaEvent::is_fatal_code(1));
        assert!(!LocalMediaEvent::is_fatal_code(2));
    }
}
