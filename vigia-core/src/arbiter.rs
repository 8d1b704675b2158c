//! Source arbitration state machine.
//!
//! The arbiter consumes one event at a time (serialized by the owning
//! session, no re-entrancy) and decides which playback surface the
//! viewer should see. It is deliberately pure: transitions return a list
//! of [`Action`]s and the session executes them against timers, the
//! prober, the monitor and the concrete surfaces. Every event has a
//! defined effect in every state, possibly "ignore".

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::AudioPolicy;
use crate::models::{ActiveSurface, DesiredState, Overlay, SourceState};
use crate::playlist::FallbackPlaylist;

/// Bounds for stream re-acquisition after fatal player errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReacquireConfig {
    /// Consecutive fatal failures tolerated before degrading to fallback.
    pub max_attempts: u32,
    /// Base backoff delay; doubles per attempt.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
}

impl Default for ReacquireConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Events consumed by the arbiter. Probe resolutions are already
/// generation-filtered by the session; a stale resolution never reaches
/// this level.
#[derive(Debug, Clone)]
pub enum ArbiterEvent {
    ChannelUp,
    ChannelDown { reason: String },
    SessionStarted { available: Option<bool>, playlist: Option<Vec<String>> },
    SessionStopped { message: Option<String> },
    AvailabilityChanged { available: bool, playlist: Option<Vec<String>> },
    PlaylistUpdated { list: Vec<String> },
    ForceLocalPlayback { list: Vec<String>, reason: String },
    ProbeResolved { ready: bool },
    PlayerFatal { detail: String },
    ReacquireDue,
    LocalItemEnded,
    LocalItemError { fatal: bool },
    LocalRetryDue,
    LocalSkipDue,
    SetUserAudio { enabled: bool },
}

/// Effects the session executes after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Announce this viewer upstream.
    Join,
    /// Ask upstream for a fresh fallback playlist.
    RequestPlaylist,
    /// Start a readiness probe (supersedes any previous probe).
    StartProbe,
    /// Cancel the in-flight probe and any pending re-acquisition timer.
    CancelProbe,
    /// Start the health monitor (tears down a previous instance).
    StartMonitor,
    /// Start the monitor only if it is not already running.
    EnsureMonitor,
    StopMonitor,
    StartAudioEnforcer,
    StopAudioEnforcer,
    /// Load the manifest into the remote surface and start playback.
    LoadRemote,
    /// Tear down the manifest player instance.
    DestroyRemote,
    /// Load and play a fallback item on the local surface.
    PlayLocal { uri: String },
    /// Resume the already-loaded local item.
    ResumeLocal,
    PauseLocal,
    /// Re-apply the audio rule table to both surfaces.
    ApplyAudio,
    /// Arm the re-acquisition backoff timer.
    ScheduleReacquire { delay: Duration },
    /// Arm the one-shot transient-item retry timer.
    ScheduleLocalRetry,
    /// Arm the fatal-item skip timer.
    ScheduleLocalSkip,
}

pub struct SourceArbiter {
    state: SourceState,
    playlist: FallbackPlaylist,
    config: ReacquireConfig,
    user_audio_enabled: bool,
    /// Last availability belief from the signal path.
    remote_available: bool,
    /// Whether a fallback item is on the local surface right now.
    local_playing: bool,
    /// One delayed resume has already been spent on the current item.
    local_retry_used: bool,
    reacquire_attempts: u32,
    /// A backoff timer is armed; the next probe starts on `ReacquireDue`.
    reacquire_pending: bool,
    /// Signal transport is down; overlay forced while playback continues.
    channel_down: bool,
    waiting_message: String,
}

impl SourceArbiter {
    #[must_use]
    pub fn new(config: ReacquireConfig, user_audio_enabled: bool) -> Self {
        Self {
            state: SourceState::AwaitingSignal,
            playlist: FallbackPlaylist::new(),
            config,
            user_audio_enabled,
            remote_available: false,
            local_playing: false,
            local_retry_used: false,
            reacquire_attempts: 0,
            reacquire_pending: false,
            channel_down: false,
            waiting_message: "Connecting to stream".to_string(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SourceState {
        self.state
    }

    #[must_use]
    pub const fn playlist(&self) -> &FallbackPlaylist {
        &self.playlist
    }

    /// The declarative snapshot implied by the current state. Always
    /// presents either an active surface or a waiting overlay.
    #[must_use]
    pub fn desired_state(&self) -> DesiredState {
        let (active_surface, overlay) = match self.state {
            SourceState::AwaitingSignal | SourceState::Stopped => {
                (ActiveSurface::None, Overlay::Waiting)
            }
            SourceState::RemoteActive => (ActiveSurface::Remote, Overlay::None),
            SourceState::RemoteProbing | SourceState::LocalFallback => {
                if self.local_playing {
                    (ActiveSurface::Local, Overlay::None)
                } else {
                    (ActiveSurface::None, Overlay::Waiting)
                }
            }
        };

        let overlay = if self.channel_down { Overlay::Waiting } else { overlay };
        let message = (overlay == Overlay::Waiting).then(|| self.waiting_message.clone());

        DesiredState {
            active_surface,
            overlay,
            message,
            audio: AudioPolicy::apply(self.state, self.user_audio_enabled),
            low_bandwidth: false,
        }
    }

    /// Consume one event. Terminal: after `SessionStopped` every event is
    /// ignored.
    pub fn handle(&mut self, event: ArbiterEvent) -> Vec<Action> {
        if self.state.is_terminal() {
            debug!(?event, "Event ignored, session stopped");
            return Vec::new();
        }

        match event {
            ArbiterEvent::ChannelUp => self.on_channel_up(),
            ArbiterEvent::ChannelDown { reason } => self.on_channel_down(reason),
            ArbiterEvent::SessionStarted { available, playlist } => {
                self.on_session_started(available, playlist)
            }
            ArbiterEvent::SessionStopped { message } => self.on_session_stopped(message),
            ArbiterEvent::AvailabilityChanged { available, playlist } => {
                if let Some(list) = playlist.filter(|l| !l.is_empty()) {
                    self.playlist.replace(list);
                }
                self.on_availability(available)
            }
            ArbiterEvent::PlaylistUpdated { list } => self.on_playlist_updated(list),
            ArbiterEvent::ForceLocalPlayback { list, reason } => {
                self.on_force_local(list, reason)
            }
            ArbiterEvent::ProbeResolved { ready } => self.on_probe_resolved(ready),
            ArbiterEvent::PlayerFatal { detail } => self.on_player_fatal(detail),
            ArbiterEvent::ReacquireDue => self.on_reacquire_due(),
            ArbiterEvent::LocalItemEnded => self.on_local_ended(),
            ArbiterEvent::LocalItemError { fatal } => self.on_local_error(fatal),
            ArbiterEvent::LocalRetryDue => self.on_local_retry_due(),
            ArbiterEvent::LocalSkipDue => self.on_local_skip_due(),
            ArbiterEvent::SetUserAudio { enabled } => {
                self.user_audio_enabled = enabled;
                vec![Action::ApplyAudio]
            }
        }
    }

    fn on_channel_up(&mut self) -> Vec<Action> {
        self.channel_down = false;
        let mut actions = vec![Action::Join];
        if self.playlist.is_empty() {
            actions.push(Action::RequestPlaylist);
        }
        actions
    }

    fn on_channel_down(&mut self, reason: String) -> Vec<Action> {
        // Transport loss is transient: playlist and fallback state
        // survive, the adapter reconnects, we only surface the overlay.
        info!(%reason, "Signal channel down");
        self.channel_down = true;
        self.waiting_message = "Connection lost, reconnecting".to_string();
        Vec::new()
    }

    fn on_session_started(
        &mut self,
        available: Option<bool>,
        playlist: Option<Vec<String>>,
    ) -> Vec<Action> {
        if let Some(list) = playlist.filter(|l| !l.is_empty()) {
            self.playlist.replace(list);
        }

        match available {
            Some(available) => self.on_availability(available),
            None if self.state == SourceState::AwaitingSignal && !self.playlist.is_empty() => {
                self.enter_local_fallback()
            }
            None => Vec::new(),
        }
    }

    fn on_session_stopped(&mut self, message: Option<String>) -> Vec<Action> {
        info!("Session stopped, tearing down");
        self.state = SourceState::Stopped;
        self.local_playing = false;
        self.reacquire_pending = false;
        self.waiting_message = message.unwrap_or_else(|| "Stream stopped".to_string());
        vec![
            Action::CancelProbe,
            Action::StopMonitor,
            Action::StopAudioEnforcer,
            Action::DestroyRemote,
            Action::PauseLocal,
        ]
    }

    fn on_availability(&mut self, available: bool) -> Vec<Action> {
        self.remote_available = available;

        if available {
            match self.state {
                SourceState::AwaitingSignal | SourceState::LocalFallback => {
                    info!(from = ?self.state, "Remote feed available, probing manifest");
                    self.state = SourceState::RemoteProbing;
                    // A fresh availability edge opens a new remote episode
                    // with a full re-acquisition budget.
                    self.reacquire_attempts = 0;
                    self.reacquire_pending = false;
                    self.waiting_message = "Connecting to stream".to_string();
                    vec![Action::StartProbe, Action::ApplyAudio]
                }
                SourceState::RemoteProbing => {
                    debug!("Duplicate availability(true) while probing, ignoring");
                    Vec::new()
                }
                SourceState::RemoteActive => {
                    debug!("Availability(true) while active, ensuring monitor");
                    vec![Action::EnsureMonitor]
                }
                SourceState::Stopped => Vec::new(),
            }
        } else {
            match self.state {
                SourceState::AwaitingSignal => {
                    if self.playlist.is_empty() {
                        vec![Action::RequestPlaylist]
                    } else {
                        self.enter_local_fallback()
                    }
                }
                SourceState::RemoteProbing => {
                    info!("Remote feed lost mid-probe, cancelling");
                    self.reacquire_pending = false;
                    let mut actions = vec![Action::CancelProbe];
                    actions.extend(self.leave_remote_to_fallback());
                    actions
                }
                SourceState::RemoteActive => {
                    info!("Remote feed lost, switching to local fallback");
                    let mut actions = vec![
                        Action::StopMonitor,
                        Action::StopAudioEnforcer,
                        Action::DestroyRemote,
                    ];
                    self.reacquire_attempts = 0;
                    actions.extend(self.leave_remote_to_fallback());
                    actions
                }
                SourceState::LocalFallback => Vec::new(),
                SourceState::Stopped => Vec::new(),
            }
        }
    }

    fn on_playlist_updated(&mut self, list: Vec<String>) -> Vec<Action> {
        if list.is_empty() {
            debug!("Ignoring empty playlist update");
            return Vec::new();
        }
        self.playlist.replace(list);

        match self.state {
            SourceState::LocalFallback if !self.local_playing => self.start_local_item(false),
            SourceState::AwaitingSignal if !self.remote_available => self.enter_local_fallback(),
            _ => Vec::new(),
        }
    }

    fn on_force_local(&mut self, list: Vec<String>, reason: String) -> Vec<Action> {
        warn!(%reason, "Forced local playback requested upstream");
        if !list.is_empty() {
            self.playlist.replace(list);
        }
        self.remote_available = false;
        self.reacquire_pending = false;

        let mut actions = Vec::new();
        match self.state {
            SourceState::RemoteProbing => actions.push(Action::CancelProbe),
            SourceState::RemoteActive => {
                actions.push(Action::StopMonitor);
                actions.push(Action::StopAudioEnforcer);
                actions.push(Action::DestroyRemote);
            }
            _ => {}
        }
        actions.extend(self.enter_local_fallback());
        actions
    }

    fn on_probe_resolved(&mut self, ready: bool) -> Vec<Action> {
        if self.state != SourceState::RemoteProbing {
            debug!(ready, state = ?self.state, "Probe resolution outside probing state, ignoring");
            return Vec::new();
        }

        if ready {
            info!("Manifest ready, activating remote feed");
            self.state = SourceState::RemoteActive;
            // Attempts are NOT reset here: a fatal error right after a
            // successful re-probe is still part of the same failure
            // streak, otherwise a flapping stream never degrades.
            self.reacquire_pending = false;
            self.local_playing = false;
            vec![
                Action::PauseLocal,
                Action::LoadRemote,
                Action::StartMonitor,
                Action::StartAudioEnforcer,
                Action::ApplyAudio,
            ]
        } else {
            // Normal, non-error path: the manifest never became playable
            // inside the budget.
            info!("Probe resolved not ready, using local fallback");
            self.reacquire_attempts = 0;
            self.reacquire_pending = false;
            self.leave_remote_to_fallback()
        }
    }

    fn on_player_fatal(&mut self, detail: String) -> Vec<Action> {
        if self.state != SourceState::RemoteActive {
            debug!(%detail, state = ?self.state, "Fatal player error outside active state, ignoring");
            return Vec::new();
        }

        self.reacquire_attempts += 1;
        warn!(
            %detail,
            attempt = self.reacquire_attempts,
            max = self.config.max_attempts,
            "Fatal playback error, re-acquiring stream"
        );

        let mut actions = vec![
            Action::StopMonitor,
            Action::StopAudioEnforcer,
            Action::DestroyRemote,
        ];

        if self.reacquire_attempts > self.config.max_attempts {
            warn!("Re-acquisition attempts exhausted, degrading to fallback");
            self.reacquire_attempts = 0;
            actions.extend(self.leave_remote_to_fallback());
            return actions;
        }

        let delay = self.backoff_delay(self.reacquire_attempts);
        self.state = SourceState::RemoteProbing;
        self.reacquire_pending = true;
        self.waiting_message = "Reconnecting to stream".to_string();
        actions.extend(self.show_local_while_probing());
        actions.push(Action::ScheduleReacquire { delay });
        actions
    }

    fn on_reacquire_due(&mut self) -> Vec<Action> {
        if self.state == SourceState::RemoteProbing && self.reacquire_pending {
            self.reacquire_pending = false;
            vec![Action::StartProbe]
        } else {
            Vec::new()
        }
    }

    fn on_local_ended(&mut self) -> Vec<Action> {
        if !self.local_playing {
            return Vec::new();
        }
        self.local_retry_used = false;
        self.start_local_item(true)
    }

    fn on_local_error(&mut self, fatal: bool) -> Vec<Action> {
        if !self.local_playing {
            return Vec::new();
        }
        if fatal {
            debug!("Fatal local item error, scheduling skip");
            vec![Action::ScheduleLocalSkip]
        } else if self.local_retry_used {
            debug!("Repeated transient local item error, scheduling skip");
            vec![Action::ScheduleLocalSkip]
        } else {
            debug!("Transient local item error, scheduling one resume retry");
            self.local_retry_used = true;
            vec![Action::ScheduleLocalRetry]
        }
    }

    fn on_local_retry_due(&mut self) -> Vec<Action> {
        if self.local_playing {
            vec![Action::ResumeLocal]
        } else {
            Vec::new()
        }
    }

    fn on_local_skip_due(&mut self) -> Vec<Action> {
        if !self.local_playing {
            return Vec::new();
        }
        self.local_retry_used = false;
        self.start_local_item(true)
    }

    /// Leave a remote-oriented state for fallback. With an empty playlist
    /// the probing path returns to `AwaitingSignal`; from active playback
    /// the session stays in `LocalFallback` showing the waiting overlay
    /// until a list arrives.
    fn leave_remote_to_fallback(&mut self) -> Vec<Action> {
        if self.playlist.is_empty() && self.state != SourceState::RemoteActive {
            self.state = SourceState::AwaitingSignal;
            self.local_playing = false;
            self.waiting_message = "Waiting for stream".to_string();
            return vec![Action::RequestPlaylist, Action::ApplyAudio];
        }
        self.enter_local_fallback()
    }

    fn enter_local_fallback(&mut self) -> Vec<Action> {
        self.state = SourceState::LocalFallback;
        self.local_retry_used = false;

        if self.playlist.current().is_some() {
            // An item is still loaded from before the remote takeover;
            // resume it instead of cutting to a different one.
            self.local_playing = true;
            return vec![Action::ResumeLocal, Action::ApplyAudio];
        }
        self.start_local_item(false)
    }

    fn start_local_item(&mut self, exclude_current: bool) -> Vec<Action> {
        match self.playlist.next(exclude_current) {
            Some(uri) => {
                self.local_playing = true;
                vec![Action::PlayLocal { uri }, Action::ApplyAudio]
            }
            None => {
                self.local_playing = false;
                self.waiting_message = "Waiting for stream".to_string();
                vec![Action::RequestPlaylist, Action::ApplyAudio]
            }
        }
    }

    fn show_local_while_probing(&mut self) -> Vec<Action> {
        if self.playlist.current().is_some() {
            self.local_playing = true;
            vec![Action::ResumeLocal, Action::ApplyAudio]
        } else if let Some(uri) = self.playlist.next(false) {
            self.local_playing = true;
            vec![Action::PlayLocal { uri }, Action::ApplyAudio]
        } else {
            vec![Action::ApplyAudio]
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioOwner;

    fn arbiter() -> SourceArbiter {
        SourceArbiter::new(ReacquireConfig::default(), true)
    }

    fn three_items() -> Vec<String> {
        vec!["a.mp4".to_string(), "b.mp4".to_string(), "c.mp4".to_string()]
    }

    fn availability(available: bool, playlist: Option<Vec<String>>) -> ArbiterEvent {
        ArbiterEvent::AvailabilityChanged { available, playlist }
    }

    #[test]
    fn awaiting_to_remote_active_on_ready_probe() {
        let mut a = arbiter();

        let actions = a.handle(availability(true, Some(three_items())));
        assert_eq!(a.state(), SourceState::RemoteProbing);
        assert!(actions.contains(&Action::StartProbe));

        let actions = a.handle(ArbiterEvent::ProbeResolved { ready: true });
        assert_eq!(a.state(), SourceState::RemoteActive);
        assert!(actions.contains(&Action::LoadRemote));
        assert!(actions.contains(&Action::StartMonitor));
        assert!(actions.contains(&Action::StartAudioEnforcer));

        let ds = a.desired_state();
        assert_eq!(ds.active_surface, ActiveSurface::Remote);
        assert_eq!(ds.overlay, Overlay::None);
        assert!(ds.audio.local_muted, "local surface must be force-muted");
        assert_eq!(ds.audio.owner(), AudioOwner::Remote);
    }

    #[test]
    fn availability_loss_mid_probe_cancels_and_falls_back() {
        let mut a = arbiter();
        a.handle(availability(true, Some(three_items())));
        assert_eq!(a.state(), SourceState::RemoteProbing);

        let actions = a.handle(availability(false, None));
        assert_eq!(a.state(), SourceState::LocalFallback);
        assert_eq!(actions.first(), Some(&Action::CancelProbe));
        assert!(actions.iter().any(|x| matches!(x, Action::PlayLocal { .. })));

        // The stale probe resolution must not cause any transition.
        let stale = a.handle(ArbiterEvent::ProbeResolved { ready: true });
        assert!(stale.is_empty());
        assert_eq!(a.state(), SourceState::LocalFallback);
    }

    #[test]
    fn probe_timeout_is_a_normal_fallback_transition() {
        let mut a = arbiter();
        a.handle(availability(true, Some(three_items())));

        let actions = a.handle(ArbiterEvent::ProbeResolved { ready: false });
        assert_eq!(a.state(), SourceState::LocalFallback);
        assert!(actions.iter().any(|x| matches!(x, Action::PlayLocal { .. })));
    }

    #[test]
    fn probe_timeout_without_playlist_returns_to_awaiting() {
        let mut a = arbiter();
        a.handle(availability(true, None));

        let actions = a.handle(ArbiterEvent::ProbeResolved { ready: false });
        assert_eq!(a.state(), SourceState::AwaitingSignal);
        assert!(actions.contains(&Action::RequestPlaylist));
    }

    #[test]
    fn duplicate_availability_never_duplicates_probe_or_monitor() {
        let mut a = arbiter();
        a.handle(availability(true, Some(three_items())));

        // Second true while probing: no second probe.
        let actions = a.handle(availability(true, None));
        assert!(actions.is_empty());

        a.handle(ArbiterEvent::ProbeResolved { ready: true });

        // True while active: idempotent, no reload, only ensure monitor.
        let actions = a.handle(availability(true, None));
        assert_eq!(actions, vec![Action::EnsureMonitor]);
        assert_eq!(a.state(), SourceState::RemoteActive);
    }

    #[test]
    fn availability_loss_while_active_switches_to_local() {
        let mut a = arbiter();
        a.handle(availability(true, Some(three_items())));
        a.handle(ArbiterEvent::ProbeResolved { ready: true });

        let actions = a.handle(availability(false, None));
        assert_eq!(a.state(), SourceState::LocalFallback);
        assert!(actions.contains(&Action::StopMonitor));
        assert!(actions.contains(&Action::StopAudioEnforcer));
        assert!(actions.contains(&Action::DestroyRemote));

        let ds = a.desired_state();
        assert_eq!(ds.active_surface, ActiveSurface::Local);
        assert!(!ds.audio.local_muted, "local audio follows user preference again");
    }

    #[test]
    fn awaiting_without_playlist_requests_one() {
        let mut a = arbiter();
        let actions = a.handle(availability(false, None));
        assert_eq!(a.state(), SourceState::AwaitingSignal);
        assert_eq!(actions, vec![Action::RequestPlaylist]);

        // The list arrives later and fallback playback starts.
        let actions = a.handle(ArbiterEvent::PlaylistUpdated { list: three_items() });
        assert_eq!(a.state(), SourceState::LocalFallback);
        assert!(actions.iter().any(|x| matches!(x, Action::PlayLocal { .. })));
    }

    #[test]
    fn session_stop_is_terminal() {
        let mut a = arbiter();
        a.handle(availability(true, Some(three_items())));

        let actions = a.handle(ArbiterEvent::SessionStopped { message: None });
        assert_eq!(a.state(), SourceState::Stopped);
        assert!(actions.contains(&Action::CancelProbe));
        assert!(actions.contains(&Action::StopMonitor));
        assert!(actions.contains(&Action::StopAudioEnforcer));

        // No event can move a stopped session.
        assert!(a.handle(availability(true, Some(three_items()))).is_empty());
        assert!(a.handle(ArbiterEvent::ProbeResolved { ready: true }).is_empty());
        assert_eq!(a.state(), SourceState::Stopped);

        let ds = a.desired_state();
        assert_eq!(ds.active_surface, ActiveSurface::None);
        assert_eq!(ds.overlay, Overlay::Waiting);
    }

    #[test]
    fn fatal_errors_reacquire_with_backoff_then_degrade() {
        let config = ReacquireConfig { max_attempts: 2, ..ReacquireConfig::default() };
        let mut a = SourceArbiter::new(config, true);
        a.handle(availability(true, Some(three_items())));
        a.handle(ArbiterEvent::ProbeResolved { ready: true });

        // First fatal: backoff of base * 2^0.
        let actions = a.handle(ArbiterEvent::PlayerFatal { detail: "demux".to_string() });
        assert_eq!(a.state(), SourceState::RemoteProbing);
        assert!(actions.contains(&Action::ScheduleReacquire { delay: Duration::from_millis(2_000) }));

        let actions = a.handle(ArbiterEvent::ReacquireDue);
        assert_eq!(actions, vec![Action::StartProbe]);
        a.handle(ArbiterEvent::ProbeResolved { ready: true });
        assert_eq!(a.state(), SourceState::RemoteActive);

        // A successful re-probe does not reset the streak: the second
        // consecutive fatal doubles the delay.
        let actions = a.handle(ArbiterEvent::PlayerFatal { detail: "demux".to_string() });
        assert!(actions.contains(&Action::ScheduleReacquire { delay: Duration::from_millis(4_000) }));
        a.handle(ArbiterEvent::ReacquireDue);
        a.handle(ArbiterEvent::ProbeResolved { ready: true });

        let actions = a.handle(ArbiterEvent::PlayerFatal { detail: "demux".to_string() });
        assert_eq!(a.state(), SourceState::LocalFallback, "attempts exhausted must degrade");
        assert!(!actions.iter().any(|x| matches!(x, Action::ScheduleReacquire { .. })));
    }

    #[test]
    fn successful_activation_resets_reacquire_budget() {
        let config = ReacquireConfig { max_attempts: 1, ..ReacquireConfig::default() };
        let mut a = SourceArbiter::new(config, true);

        for _ in 0..3 {
            a.handle(availability(true, Some(three_items())));
            a.handle(ArbiterEvent::ReacquireDue);
            if a.state() == SourceState::RemoteProbing {
                a.handle(ArbiterEvent::ProbeResolved { ready: true });
            }
            assert_eq!(a.state(), SourceState::RemoteActive);

            // One fatal each episode never exhausts a reset budget.
            let actions = a.handle(ArbiterEvent::PlayerFatal { detail: "net".to_string() });
            assert!(actions.iter().any(|x| matches!(x, Action::ScheduleReacquire { .. })));
            a.handle(ArbiterEvent::ReacquireDue);
            a.handle(ArbiterEvent::ProbeResolved { ready: true });
            assert_eq!(a.state(), SourceState::RemoteActive);
            a.handle(availability(false, None));
        }
    }

    #[test]
    fn local_item_errors_retry_then_skip() {
        let mut a = arbiter();
        a.handle(availability(false, Some(three_items())));
        assert_eq!(a.state(), SourceState::LocalFallback);

        // Transient error: one delayed resume.
        let actions = a.handle(ArbiterEvent::LocalItemError { fatal: false });
        assert_eq!(actions, vec![Action::ScheduleLocalRetry]);
        let actions = a.handle(ArbiterEvent::LocalRetryDue);
        assert_eq!(actions, vec![Action::ResumeLocal]);

        // Second transient error on the same item: skip.
        let actions = a.handle(ArbiterEvent::LocalItemError { fatal: false });
        assert_eq!(actions, vec![Action::ScheduleLocalSkip]);
        let actions = a.handle(ArbiterEvent::LocalSkipDue);
        assert!(actions.iter().any(|x| matches!(x, Action::PlayLocal { .. })));

        // Fatal error: immediate skip scheduling, no retry.
        let actions = a.handle(ArbiterEvent::LocalItemError { fatal: true });
        assert_eq!(actions, vec![Action::ScheduleLocalSkip]);
    }

    #[test]
    fn ended_item_rotates_to_a_different_one() {
        let mut a = arbiter();
        a.handle(availability(false, Some(three_items())));

        for _ in 0..10 {
            let current = a.playlist().current().map(String::from);
            let actions = a.handle(ArbiterEvent::LocalItemEnded);
            match actions.first() {
                Some(Action::PlayLocal { uri }) => {
                    assert_ne!(Some(uri.clone()), current, "rotation repeated the same item");
                }
                other => panic!("expected PlayLocal, got {other:?}"),
            }
        }
    }

    #[test]
    fn playlist_exhaustion_requests_fresh_list() {
        let mut a = arbiter();
        a.handle(availability(false, Some(vec!["only.mp4".to_string()])));
        assert_eq!(a.state(), SourceState::LocalFallback);

        // Replace with an empty update: ignored, playback continues.
        let actions = a.handle(ArbiterEvent::PlaylistUpdated { list: Vec::new() });
        assert!(actions.is_empty());

        // Simulate the item erroring fatally with nothing else to play:
        // the arbiter asks upstream instead of blocking.
        a.playlist.replace(Vec::new());
        a.handle(ArbiterEvent::LocalItemError { fatal: true });
        let actions = a.handle(ArbiterEvent::LocalSkipDue);
        assert!(actions.contains(&Action::RequestPlaylist));

        let ds = a.desired_state();
        assert_eq!(ds.overlay, Overlay::Waiting);
    }

    #[test]
    fn channel_down_overlays_without_resetting_playback() {
        let mut a = arbiter();
        a.handle(availability(false, Some(three_items())));
        assert_eq!(a.state(), SourceState::LocalFallback);

        a.handle(ArbiterEvent::ChannelDown { reason: "io".to_string() });
        let ds = a.desired_state();
        assert_eq!(ds.overlay, Overlay::Waiting);
        assert_eq!(ds.active_surface, ActiveSurface::Local, "playback is not reset");
        assert_eq!(a.state(), SourceState::LocalFallback);

        let actions = a.handle(ArbiterEvent::ChannelUp);
        assert!(actions.contains(&Action::Join));
        assert_eq!(a.desired_state().overlay, Overlay::None);
    }

    #[test]
    fn force_local_tears_down_remote() {
        let mut a = arbiter();
        a.handle(availability(true, Some(three_items())));
        a.handle(ArbiterEvent::ProbeResolved { ready: true });

        let actions = a.handle(ArbiterEvent::ForceLocalPlayback {
            list: three_items(),
            reason: "maintenance".to_string(),
        });
        assert_eq!(a.state(), SourceState::LocalFallback);
        assert!(actions.contains(&Action::DestroyRemote));
        assert!(actions.iter().any(|x| matches!(x, Action::PlayLocal { .. } | Action::ResumeLocal)));
    }

    #[test]
    fn user_audio_toggle_reapplies_policy() {
        let mut a = arbiter();
        a.handle(availability(false, Some(three_items())));
        assert!(!a.desired_state().audio.local_muted);

        let actions = a.handle(ArbiterEvent::SetUserAudio { enabled: false });
        assert_eq!(actions, vec![Action::ApplyAudio]);
        assert!(a.desired_state().audio.local_muted);
    }

    #[test]
    fn audio_exclusivity_holds_in_every_reachable_state() {
        // Drive the machine through a representative event storm and
        // check the invariant after every transition.
        let mut a = arbiter();
        let events = vec![
            availability(false, Some(three_items())),
            availability(true, None),
            ArbiterEvent::ProbeResolved { ready: true },
            availability(true, None),
            ArbiterEvent::PlayerFatal { detail: "x".to_string() },
            ArbiterEvent::ReacquireDue,
            ArbiterEvent::ProbeResolved { ready: false },
            availability(true, None),
            ArbiterEvent::ProbeResolved { ready: true },
            availability(false, None),
            ArbiterEvent::SessionStopped { message: None },
        ];
        for event in events {
            a.handle(event);
            let audio = a.desired_state().audio;
            assert!(
                audio.local_muted || audio.remote_muted,
                "both surfaces audible in {:?}",
                a.state()
            );
        }
    }
}
