//! The stream session actor.
//!
//! One `StreamSession` exists per viewer connection. It serializes every
//! signaling event, timer tick and player report through a single queue,
//! executes the arbiter's actions, and owns every timer and cancellation
//! token for its lifetime — the probe, the health monitor, the audio
//! enforcer, the heartbeat, the availability poller and the one-shot
//! retry/backoff timers are all torn down on state exit or teardown.
//! Because of this single-owner serialization no `SourceState` mutation
//! ever races; components that suspend (probe polls, command calls)
//! re-enter through the queue under a generation or cancellation guard.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigia_proto::{ChannelStatus, InboundEvent, OutboundMessage};

use crate::arbiter::{Action, ArbiterEvent, SourceArbiter};
use crate::audio::{apply_assignment, AudioEnforcer};
use crate::availability::AvailabilityPoller;
use crate::config::Config;
use crate::encoder::EncoderClient;
use crate::health::HealthMonitor;
use crate::models::{ActiveSurface, DesiredState, Overlay, RemoteCommand, SessionKey};
use crate::player::{LocalMediaEvent, ManifestPlayer, PlaybackSurface, PlayerEvent};
use crate::prober::{ManifestFetcher, ReadinessProber};
use crate::relay::CommandRelay;
use crate::signal::SignalOutbound;

/// Everything the session needs from the wiring layer.
pub struct SessionDeps {
    pub signal: Arc<dyn SignalOutbound>,
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub player: Arc<dyn ManifestPlayer>,
    pub remote_surface: Arc<dyn PlaybackSurface>,
    pub local_surface: Arc<dyn PlaybackSurface>,
    pub encoder: Arc<dyn EncoderClient>,
}

/// Events entering the session queue. Processed strictly one at a time.
#[derive(Debug)]
pub enum SessionEvent {
    /// Validated signal-channel event.
    Signal(InboundEvent),
    /// Transport status from the channel adapter.
    Channel(ChannelStatus),
    /// Manifest player report.
    Player(PlayerEvent),
    /// Local fallback surface report.
    LocalMedia(LocalMediaEvent),
    /// Probe resolution; stale generations are dropped here.
    ProbeResolved { generation: u64, ready: bool },
    /// Re-acquisition backoff timer fired.
    ReacquireDue,
    /// Transient-item retry timer fired.
    LocalRetryDue,
    /// Fatal-item skip timer fired.
    LocalSkipDue,
    /// Low-bandwidth advisory expiry.
    LowBandwidthCleared,
    /// Viewer toggled local audio.
    SetUserAudio { enabled: bool },
}

/// Cloneable ingress handle for adapters and observers.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Validate a raw signal payload and enqueue it. Malformed events
    /// are logged and dropped at this boundary, never trusted.
    pub fn signal_json(&self, payload: serde_json::Value) {
        match InboundEvent::from_value(payload) {
            Ok(event) => self.signal(event),
            Err(e) => warn!(error = %e, "Dropping malformed signal event"),
        }
    }

    pub fn signal(&self, event: InboundEvent) {
        self.send(SessionEvent::Signal(event));
    }

    pub fn channel_status(&self, status: ChannelStatus) {
        self.send(SessionEvent::Channel(status));
    }

    pub fn player_event(&self, event: PlayerEvent) {
        self.send(SessionEvent::Player(event));
    }

    pub fn local_media_event(&self, event: LocalMediaEvent) {
        self.send(SessionEvent::LocalMedia(event));
    }

    pub fn set_user_audio(&self, enabled: bool) {
        self.send(SessionEvent::SetUserAudio { enabled });
    }

    fn send(&self, event: SessionEvent) {
        // A closed queue means the session already stopped; late events
        // are no-ops by design.
        if self.tx.send(event).is_err() {
            debug!("Session queue closed, event dropped");
        }
    }
}

/// One-shot timer owned by the session. Dropping it (or arming a
/// replacement) cancels the pending fire.
struct OwnedTimer {
    cancel: CancellationToken,
}

impl OwnedTimer {
    fn spawn(
        delay: Duration,
        tx: mpsc::UnboundedSender<SessionEvent>,
        event: SessionEvent,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(event);
                }
            }
        });
        Self { cancel }
    }
}

impl Drop for OwnedTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct StreamSession {
    key: SessionKey,
    config: Config,
    deps: SessionDeps,
    arbiter: SourceArbiter,
    prober: ReadinessProber,
    monitor: HealthMonitor,
    enforcer: Option<AudioEnforcer>,
    relay: CommandRelay,
    poller: Option<AvailabilityPoller>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<DesiredState>,
    /// Generation of the probe whose resolution we will accept.
    expected_probe: Option<u64>,
    reacquire_timer: Option<OwnedTimer>,
    local_retry_timer: Option<OwnedTimer>,
    local_skip_timer: Option<OwnedTimer>,
    low_bandwidth_timer: Option<OwnedTimer>,
    low_bandwidth: bool,
}

impl StreamSession {
    /// Create the session and start its event loop. Returns the ingress
    /// handle, the desired-state watch, and the loop's join handle.
    pub fn spawn(
        key: SessionKey,
        config: Config,
        deps: SessionDeps,
    ) -> (
        SessionHandle,
        watch::Receiver<DesiredState>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();

        let arbiter = SourceArbiter::new(config.reacquire.clone(), config.session.user_audio_enabled);
        let (state_tx, state_rx) = watch::channel(arbiter.desired_state());

        let prober = ReadinessProber::new(Arc::clone(&deps.fetcher), config.prober.clone());
        let monitor = HealthMonitor::new(config.health.clone());
        let relay = CommandRelay::new(Arc::clone(&deps.encoder), Arc::clone(&deps.signal));

        let handle = SessionHandle { tx: tx.clone() };
        let poller = AvailabilityPoller::start(
            &config.availability,
            key.as_str(),
            Arc::clone(&deps.fetcher),
            handle.clone(),
        );

        let session = Self {
            key,
            config,
            deps,
            arbiter,
            prober,
            monitor,
            enforcer: None,
            relay,
            poller,
            tx,
            state_tx,
            expected_probe: None,
            reacquire_timer: None,
            local_retry_timer: None,
            local_skip_timer: None,
            low_bandwidth_timer: None,
            low_bandwidth: false,
        };

        let join = tokio::spawn(session.run(rx));
        (handle, state_rx, join)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        info!(session_key = %self.key, "Stream session started");
        let heartbeat_period = Duration::from_secs(self.config.session.heartbeat_interval_secs);
        let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => {
                        if self.process(event).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    self.send_upstream(OutboundMessage::Heartbeat).await;
                }
            }
        }

        self.teardown();
        info!(session_key = %self.key, "Stream session ended");
    }

    /// Handle one event to completion. Returns `true` once the session
    /// reached its terminal state.
    async fn process(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Signal(InboundEvent::RemoteCommand { action, params, correlation_id }) => {
                self.relay.on_command(RemoteCommand { action, params, correlation_id });
            }
            SessionEvent::Signal(event) => {
                if let Some(event) = map_inbound(event) {
                    self.dispatch(event).await;
                }
            }
            SessionEvent::Channel(ChannelStatus::Up) => {
                self.dispatch(ArbiterEvent::ChannelUp).await;
            }
            SessionEvent::Channel(ChannelStatus::Down { reason }) => {
                self.dispatch(ArbiterEvent::ChannelDown { reason }).await;
            }
            SessionEvent::Player(PlayerEvent::FatalError { kind, detail }) => {
                self.dispatch(ArbiterEvent::PlayerFatal {
                    detail: format!("{kind:?}: {detail}"),
                })
                .await;
            }
            SessionEvent::Player(PlayerEvent::FragmentLoaded { load_time_ms, duration_ms }) => {
                self.note_fragment(load_time_ms, duration_ms);
            }
            SessionEvent::LocalMedia(LocalMediaEvent::Ended) => {
                self.dispatch(ArbiterEvent::LocalItemEnded).await;
            }
            SessionEvent::LocalMedia(LocalMediaEvent::Error { code }) => {
                self.dispatch(ArbiterEvent::LocalItemError {
                    fatal: LocalMediaEvent::is_fatal_code(code),
                })
                .await;
            }
            SessionEvent::ProbeResolved { generation, ready } => {
                if self.expected_probe == Some(generation) {
                    self.expected_probe = None;
                    self.dispatch(ArbiterEvent::ProbeResolved { ready }).await;
                } else {
                    debug!(generation, ready, "Stale probe resolution ignored");
                }
            }
            SessionEvent::ReacquireDue => {
                self.reacquire_timer = None;
                self.dispatch(ArbiterEvent::ReacquireDue).await;
            }
            SessionEvent::LocalRetryDue => {
                self.local_retry_timer = None;
                self.dispatch(ArbiterEvent::LocalRetryDue).await;
            }
            SessionEvent::LocalSkipDue => {
                self.local_skip_timer = None;
                self.dispatch(ArbiterEvent::LocalSkipDue).await;
            }
            SessionEvent::LowBandwidthCleared => {
                self.low_bandwidth_timer = None;
                if self.low_bandwidth {
                    self.low_bandwidth = false;
                    self.emit();
                }
            }
            SessionEvent::SetUserAudio { enabled } => {
                self.dispatch(ArbiterEvent::SetUserAudio { enabled }).await;
            }
        }

        if self.arbiter.state().is_terminal() {
            self.teardown();
            return true;
        }
        false
    }

    async fn dispatch(&mut self, event: ArbiterEvent) {
        let actions = self.arbiter.handle(event);
        for action in actions {
            self.apply(action).await;
        }
        self.emit();
    }

    async fn apply(&mut self, action: Action) {
        match action {
            Action::Join => {
                let message = OutboundMessage::Join { session_key: self.key.as_str().to_string() };
                self.send_upstream(message).await;
            }
            Action::RequestPlaylist => {
                let message =
                    OutboundMessage::RequestPlaylist { session_key: self.key.as_str().to_string() };
                self.send_upstream(message).await;
            }
            Action::StartProbe => {
                // A new probe supersedes any pending backoff timer.
                self.reacquire_timer = None;
                let url = self.manifest_url();
                let tx = self.tx.clone();
                let generation = self.prober.probe(url, move |generation, ready| {
                    let _ = tx.send(SessionEvent::ProbeResolved { generation, ready });
                });
                self.expected_probe = Some(generation);
            }
            Action::CancelProbe => {
                self.prober.cancel();
                self.expected_probe = None;
                self.reacquire_timer = None;
            }
            Action::StartMonitor => {
                self.monitor.start(Arc::clone(&self.deps.remote_surface));
            }
            Action::EnsureMonitor => {
                if !self.monitor.is_running() {
                    self.monitor.start(Arc::clone(&self.deps.remote_surface));
                }
            }
            Action::StopMonitor => {
                self.monitor.stop();
            }
            Action::StartAudioEnforcer => {
                self.enforcer = Some(AudioEnforcer::start(
                    &self.config.audio,
                    Arc::clone(&self.deps.local_surface),
                    Arc::clone(&self.deps.remote_surface),
                ));
            }
            Action::StopAudioEnforcer => {
                self.enforcer = None;
            }
            Action::LoadRemote => {
                self.deps.player.load(&self.manifest_url());
                self.deps.player.attach(Arc::clone(&self.deps.remote_surface));
                self.deps.remote_surface.play();
            }
            Action::DestroyRemote => {
                self.deps.player.destroy();
            }
            Action::PlayLocal { uri } => {
                self.deps.local_surface.set_source(&uri);
                self.deps.local_surface.play();
            }
            Action::ResumeLocal => {
                self.deps.local_surface.play();
            }
            Action::PauseLocal => {
                self.deps.local_surface.pause();
            }
            Action::ApplyAudio => {
                let assignment = self.arbiter.desired_state().audio;
                apply_assignment(
                    assignment,
                    &*self.deps.local_surface,
                    &*self.deps.remote_surface,
                );
            }
            Action::ScheduleReacquire { delay } => {
                self.reacquire_timer =
                    Some(OwnedTimer::spawn(delay, self.tx.clone(), SessionEvent::ReacquireDue));
            }
            Action::ScheduleLocalRetry => {
                let delay = Duration::from_millis(self.config.fallback.transient_retry_delay_ms);
                self.local_retry_timer =
                    Some(OwnedTimer::spawn(delay, self.tx.clone(), SessionEvent::LocalRetryDue));
            }
            Action::ScheduleLocalSkip => {
                let delay = Duration::from_millis(self.config.fallback.fatal_skip_delay_ms);
                self.local_skip_timer =
                    Some(OwnedTimer::spawn(delay, self.tx.clone(), SessionEvent::LocalSkipDue));
            }
        }
    }

    fn note_fragment(&mut self, load_time_ms: u64, duration_ms: u64) {
        let threshold = self.config.session.low_bandwidth_ratio * duration_ms as f64;
        if (load_time_ms as f64) <= threshold {
            return;
        }
        warn!(
            load_time_ms,
            duration_ms, "Segment loaded slower than real time, flagging low bandwidth"
        );
        if !self.low_bandwidth {
            self.low_bandwidth = true;
            self.emit();
        }
        // Re-arm the auto-clear window from the latest slow segment.
        let delay = Duration::from_millis(self.config.session.low_bandwidth_clear_ms);
        self.low_bandwidth_timer =
            Some(OwnedTimer::spawn(delay, self.tx.clone(), SessionEvent::LowBandwidthCleared));
    }

    /// Publish the current snapshot. The watchdog clause guarantees no
    /// reachable output ever shows neither an active surface nor an
    /// explicit waiting indicator.
    fn emit(&self) {
        let mut state = self.arbiter.desired_state();
        state.low_bandwidth = self.low_bandwidth;

        if state.active_surface == ActiveSurface::None && state.overlay == Overlay::None {
            warn!("Desired state had no surface and no overlay, forcing waiting indicator");
            state.overlay = Overlay::Waiting;
            state.message = Some("Waiting for stream".to_string());
        }

        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    async fn send_upstream(&self, message: OutboundMessage) {
        if let Err(e) = self.deps.signal.send(message).await {
            warn!(error = %e, "Failed to send upstream message");
        }
    }

    fn manifest_url(&self) -> String {
        format!(
            "{}/{}.{}",
            self.config.manifest.base_url.trim_end_matches('/'),
            self.key,
            self.config.manifest.extension
        )
    }

    /// Release every owned resource. Idempotent; also runs when the
    /// queue closes without an explicit stop event.
    fn teardown(&mut self) {
        self.prober.cancel();
        self.expected_probe = None;
        self.monitor.stop();
        self.enforcer = None;
        self.relay.shutdown();
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.reacquire_timer = None;
        self.local_retry_timer = None;
        self.local_skip_timer = None;
        self.low_bandwidth_timer = None;
    }
}

fn map_inbound(event: InboundEvent) -> Option<ArbiterEvent> {
    match event {
        InboundEvent::RemoteAvailabilityChanged { available, playlist } => {
            Some(ArbiterEvent::AvailabilityChanged { available, playlist })
        }
        InboundEvent::PlaylistUpdated { list } => Some(ArbiterEvent::PlaylistUpdated { list }),
        InboundEvent::SessionStarted { available, playlist } => {
            Some(ArbiterEvent::SessionStarted { available, playlist })
        }
        InboundEvent::SessionStopped { message } => Some(ArbiterEvent::SessionStopped { message }),
        InboundEvent::ForceLocalPlayback { list, reason } => {
            Some(ArbiterEvent::ForceLocalPlayback { list, reason })
        }
        // Commands are routed to the relay, never to the state machine.
        InboundEvent::RemoteCommand { .. } => None,
    }
}
