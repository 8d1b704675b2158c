//! Vigia core: client-side live-source arbitration.
//!
//! Decides, moment to moment, whether a viewer sees the remote live
//! broadcast or the local fallback loop, and owns the readiness probing,
//! health recovery, audio exclusivity and remote-command relay around
//! that decision. The engine emits a pure, declarative
//! [`models::DesiredState`]; a separate observer layer applies it to
//! concrete playback surfaces.

pub mod arbiter;
pub mod audio;
pub mod availability;
pub mod config;
pub mod encoder;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;
pub mod player;
pub mod playlist;
pub mod prober;
pub mod relay;
pub mod session;
pub mod signal;

pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use models::{DesiredState, SessionKey, SourceState};
pub use session::{SessionDeps, SessionHandle, StreamSession};
