//! Playback health monitoring for the active remote surface.
//!
//! Samples the surface once per second while the remote feed is on
//! screen and issues bounded, rate-limited recovery actions: a seek back
//! to the live edge and a resume when paused. Recovery here is never
//! destructive; a full stream re-acquisition is reserved for fatal
//! player errors and handled by the arbiter.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::HealthSample;
use crate::player::PlaybackSurface;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Sampling interval.
    pub tick_interval_ms: u64,
    /// Playhead delta below which a non-paused tick counts as stagnant.
    pub stagnant_epsilon_secs: f64,
    /// Live-edge gap beyond which playback is too far behind.
    pub behind_threshold_secs: f64,
    /// Buffered-ahead seconds below which playback is about to starve.
    pub low_buffer_threshold_secs: f64,
    /// Consecutive stagnant ticks that trigger recovery.
    pub stagnant_ticks_threshold: u32,
    /// Minimum spacing between two recovery actions.
    pub recovery_cooldown_ms: u64,
    /// Seek target distance behind the live edge.
    pub live_edge_margin_secs: f64,
    /// Spacing of periodic health-sample debug logs.
    pub log_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            stagnant_epsilon_secs: 0.15,
            behind_threshold_secs: 5.0,
            low_buffer_threshold_secs: 0.5,
            stagnant_ticks_threshold: 3,
            recovery_cooldown_ms: 3_000,
            live_edge_margin_secs: 1.0,
            log_interval_ms: 5_000,
        }
    }
}

/// Watches one remote playback surface. At most one monitor loop is
/// alive at a time: `start` tears down the previous loop first.
pub struct HealthMonitor {
    config: HealthConfig,
    cancel: Option<CancellationToken>,
}

impl HealthMonitor {
    #[must_use]
    pub const fn new(config: HealthConfig) -> Self {
        Self { config, cancel: None }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    pub fn start(&mut self, surface: Arc<dyn PlaybackSurface>) {
        self.stop();
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        let config = self.config.clone();
        tokio::spawn(monitor_loop(surface, config, token));
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn monitor_loop(
    surface: Arc<dyn PlaybackSurface>,
    config: HealthConfig,
    token: CancellationToken,
) {
    let tick = Duration::from_millis(config.tick_interval_ms);
    let cooldown = Duration::from_millis(config.recovery_cooldown_ms);
    let log_interval = Duration::from_millis(config.log_interval_ms);

    // First sample one full tick after start; nothing useful to observe
    // before the surface has had a chance to advance.
    let mut timer = interval_at(Instant::now() + tick, tick);

    let mut last_time = 0.0_f64;
    let mut stagnant_ticks = 0u32;
    let mut last_recovery: Option<Instant> = None;
    let mut last_log = Instant::now();

    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!("Health monitor stopped");
                return;
            }
            _ = timer.tick() => {}
        }

        let current_time = surface.current_time();
        let paused = surface.is_paused();

        if !paused && (current_time - last_time).abs() < config.stagnant_epsilon_secs {
            stagnant_ticks += 1;
        } else {
            stagnant_ticks = 0;
        }
        last_time = current_time;

        let buffer_ahead_secs = surface.buffered_ahead_secs();
        let seekable_end = surface.seekable_end();
        let live_edge_gap_secs = (seekable_end - current_time).max(0.0);

        let sample = HealthSample {
            current_time,
            buffer_ahead_secs,
            live_edge_gap_secs,
            stagnant_ticks,
        };

        if last_log.elapsed() >= log_interval {
            last_log = Instant::now();
            debug!(
                current_time = sample.current_time,
                buffer_ahead = sample.buffer_ahead_secs,
                live_edge_gap = sample.live_edge_gap_secs,
                stagnant = sample.stagnant_ticks,
                "Playback health sample"
            );
        }

        let too_far_behind = live_edge_gap_secs > config.behind_threshold_secs;
        let low_buffer = buffer_ahead_secs < config.low_buffer_threshold_secs && !paused;
        let stagnant = stagnant_ticks >= config.stagnant_ticks_threshold;

        if !(too_far_behind || low_buffer || stagnant) {
            continue;
        }
        if last_recovery.is_some_and(|t| t.elapsed() < cooldown) {
            continue;
        }
        last_recovery = Some(Instant::now());

        warn!(
            too_far_behind,
            low_buffer,
            stagnant,
            live_edge_gap = live_edge_gap_secs,
            buffer_ahead = buffer_ahead_secs,
            "Playback degradation detected, recovering"
        );

        if (too_far_behind || stagnant) && seekable_end > 0.0 {
            let target = (seekable_end - config.live_edge_margin_secs).max(0.0);
            surface.seek(target);
        }
        if surface.is_paused() {
            surface.play();
        }
    }
}
