//! Periodic availability polling.
//!
//! Signal events are the canonical availability source, but a missed
//! event would strand the viewer on the wrong surface until the next
//! edge. As a belt-and-braces measure the session polls a status
//! endpoint and feeds *flips* (never repeats) into the same canonical
//! availability path, so polling can never cause probe or monitor churn.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigia_proto::InboundEvent;

use crate::prober::ManifestFetcher;
use crate::session::SessionHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Status endpoint base; the session key is appended. Polling is
    /// disabled when unset.
    pub status_url: Option<String>,
    /// Poll spacing.
    pub poll_interval_secs: u64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            status_url: None,
            poll_interval_secs: 10,
        }
    }
}

impl AvailabilityConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Wire shape of the status endpoint response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    rtmp_active: bool,
}

/// Owned by the session; cancelled on teardown.
pub struct AvailabilityPoller {
    cancel: CancellationToken,
}

impl AvailabilityPoller {
    /// Start polling, or return `None` when no status endpoint is
    /// configured.
    pub fn start(
        config: &AvailabilityConfig,
        session_key: &str,
        fetcher: Arc<dyn ManifestFetcher>,
        handle: SessionHandle,
    ) -> Option<Self> {
        let base = config.status_url.clone()?;
        let url = format!("{}/{}", base.trim_end_matches('/'), session_key);
        let period = config.poll_interval();

        let cancel = CancellationToken::new();
        let token = cancel.clone();

        info!(%url, interval = ?period, "Starting availability poller");
        tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            let mut last_observed: Option<bool> = None;

            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = timer.tick() => {}
                }

                let body = tokio::select! {
                    () = token.cancelled() => return,
                    result = fetcher.fetch(&url) => result,
                };

                let available = match body
                    .and_then(|b| serde_json::from_str::<StatusResponse>(&b).map_err(Into::into))
                {
                    Ok(status) => status.rtmp_active,
                    Err(e) => {
                        warn!(error = %e, "Availability poll failed");
                        continue;
                    }
                };

                if last_observed == Some(available) {
                    continue;
                }
                if last_observed.is_some() {
                    info!(available, "Availability flip observed by poller");
                } else {
                    debug!(available, "Initial availability observation");
                }
                handle.signal(InboundEvent::RemoteAvailabilityChanged {
                    available,
                    playlist: None,
                });
                last_observed = Some(available);
            }
        });

        Some(Self { cancel })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for AvailabilityPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
