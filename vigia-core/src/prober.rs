//! Manifest readiness probing.
//!
//! After the remote feed is announced, the manifest resource usually
//! needs a few seconds before it is safely playable. The prober polls it
//! until it parses as a playlist with at least one addressable segment,
//! or until the probe budget elapses — a timeout is the normal fallback
//! path, not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProberConfig {
    /// Total probe budget before resolving `ready = false`.
    pub budget_ms: u64,
    /// Interval between manifest polls.
    pub poll_interval_ms: u64,
    /// Consecutive ready polls required before resolving `ready = true`.
    pub required_successes: u32,
    /// Per-request timeout for the manifest fetch.
    pub request_timeout_ms: u64,
    /// Substring identifying an addressable media segment reference.
    pub segment_marker: String,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            budget_ms: 15_000,
            poll_interval_ms: 500,
            required_successes: 1,
            request_timeout_ms: 5_000,
            segment_marker: ".ts".to_string(),
        }
    }
}

/// A playlist is safely playable once it carries the playlist marker and
/// references at least one media segment.
#[must_use]
pub fn manifest_is_ready(body: &str, segment_marker: &str) -> bool {
    body.contains("#EXTM3U") && body.matches(segment_marker).count() >= 1
}

/// Fetches the manifest resource as text.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// `reqwest`-backed fetcher. Requests bypass intermediary caches so the
/// probe always observes the current playlist window.
pub struct HttpManifestFetcher {
    client: reqwest::Client,
}

impl HttpManifestFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    #[must_use]
    pub const fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Polls a manifest resource until it is playable or the budget elapses.
///
/// Each `probe` call supersedes the previous one: the prior task is
/// cancelled and its generation retired, so a stale resolution can never
/// drive a state transition. The resolution callback is invoked exactly
/// once per probe — success, timeout, or cancellation (`ready = false`)
/// — and carries the probe generation for staleness filtering.
pub struct ReadinessProber {
    fetcher: Arc<dyn ManifestFetcher>,
    config: ProberConfig,
    generation: u64,
    active: Option<CancellationToken>,
}

impl ReadinessProber {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ManifestFetcher>, config: ProberConfig) -> Self {
        Self { fetcher, config, generation: 0, active: None }
    }

    /// Start probing `manifest_url`. Returns the new probe generation.
    pub fn probe<F>(&mut self, manifest_url: String, on_resolved: F) -> u64
    where
        F: FnOnce(u64, bool) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let token = CancellationToken::new();
        self.active = Some(token.clone());

        let fetcher = Arc::clone(&self.fetcher);
        let config = self.config.clone();

        info!(%manifest_url, generation, "Starting readiness probe");
        tokio::spawn(async move {
            let ready = poll_until_ready(&*fetcher, &config, &manifest_url, &token).await;
            on_resolved(generation, ready);
        });

        generation
    }

    /// Abort the outstanding probe, if any. Its callback still resolves
    /// (`ready = false`) but under a retired generation.
    pub fn cancel(&mut self) {
        if let Some(token) = self.active.take() {
            debug!(generation = self.generation, "Cancelling in-flight probe");
            token.cancel();
        }
    }

    /// Generation of the most recently started probe.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

async fn poll_until_ready(
    fetcher: &dyn ManifestFetcher,
    config: &ProberConfig,
    url: &str,
    token: &CancellationToken,
) -> bool {
    let deadline = Instant::now() + Duration::from_millis(config.budget_ms);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut consecutive = 0u32;

    loop {
        let wakeup = (Instant::now() + poll_interval).min(deadline);
        tokio::select! {
            () = token.cancelled() => return false,
            () = sleep_until(wakeup) => {}
        }

        if Instant::now() >= deadline {
            info!(%url, budget_ms = config.budget_ms, "Probe budget elapsed, resolving not ready");
            return false;
        }

        let body = tokio::select! {
            () = token.cancelled() => return false,
            result = fetcher.fetch(url) => result,
        };

        match body {
            Ok(body) if manifest_is_ready(&body, &config.segment_marker) => {
                consecutive += 1;
                debug!(%url, consecutive, required = config.required_successes, "Manifest poll ready");
                if consecutive >= config.required_successes {
                    return true;
                }
            }
            Ok(_) => {
                consecutive = 0;
            }
            Err(e) => {
                consecutive = 0;
                warn!(%url, error = %e, "Manifest poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    /// Fetcher that pops canned responses, repeating the last one.
    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<String>>>,
    }

    impl ScriptedFetcher {
        fn new(bodies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    bodies.into_iter().rev().map(|b| Ok(b.to_string())).collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl ManifestFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str) -> Result<String> {
            let mut responses = self.responses.lock();
            if responses.len() > 1 {
                responses.pop().expect("non-empty")
            } else {
                match responses.last() {
                    Some(Ok(body)) => Ok(body.clone()),
                    _ => Err(crate::Error::Internal("exhausted".to_string())),
                }
            }
        }
    }

    const READY: &str = "#EXTM3U\n#EXTINF:2.0,\nsegment-000.ts\n";
    const EMPTY: &str = "#EXTM3U\n";

    fn test_config() -> ProberConfig {
        ProberConfig::default()
    }

    #[test]
    fn readiness_parse() {
        assert!(manifest_is_ready(READY, ".ts"));
        assert!(!manifest_is_ready(EMPTY, ".ts"));
        assert!(!manifest_is_ready("not a playlist with seg.ts", ".ts"));
        assert!(!manifest_is_ready("", ".ts"));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_ready_after_polls() {
        let fetcher = ScriptedFetcher::new(vec![EMPTY, EMPTY, READY]);
        let mut prober = ReadinessProber::new(fetcher, test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let generation = prober.probe("http://example/live.m3u8".to_string(), move |gen, ready| {
            let _ = tx.send((gen, ready));
        });

        let (resolved_gen, ready) = rx.recv().await.expect("resolution");
        assert_eq!(resolved_gen, generation);
        assert!(ready);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_not_ready_on_budget() {
        let fetcher = ScriptedFetcher::new(vec![EMPTY]);
        let mut prober = ReadinessProber::new(fetcher, test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        prober.probe("http://example/live.m3u8".to_string(), move |gen, ready| {
            let _ = tx.send((gen, ready));
        });

        let (_, ready) = rx.recv().await.expect("resolution");
        assert!(!ready, "budget elapse must resolve not-ready");
    }

    #[tokio::test(start_paused = true)]
    async fn requires_consecutive_successes() {
        let config = ProberConfig { required_successes: 2, ..test_config() };
        // ready, not ready, ready, ready => resolves on the 4th poll
        let fetcher = ScriptedFetcher::new(vec![READY, EMPTY, READY, READY]);
        let mut prober = ReadinessProber::new(fetcher, config);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        prober.probe("http://example/live.m3u8".to_string(), move |_, ready| {
            let _ = tx.send((started.elapsed(), ready));
        });

        let (elapsed, ready) = rx.recv().await.expect("resolution");
        assert!(ready);
        assert!(elapsed >= Duration::from_millis(2000), "resolved too early: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn superseding_probe_retires_previous_generation() {
        let fetcher = ScriptedFetcher::new(vec![READY]);
        let mut prober = ReadinessProber::new(fetcher, test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx_a = tx.clone();
        let gen_a = prober.probe("http://example/a.m3u8".to_string(), move |gen, ready| {
            let _ = tx_a.send((gen, ready));
        });
        let gen_b = prober.probe("http://example/b.m3u8".to_string(), move |gen, ready| {
            let _ = tx.send((gen, ready));
        });
        assert_ne!(gen_a, gen_b);
        assert_eq!(prober.generation(), gen_b);

        // Both probes resolve exactly once; the superseded one not-ready.
        let mut resolutions = vec![rx.recv().await.expect("first"), rx.recv().await.expect("second")];
        resolutions.sort_by_key(|(gen, _)| *gen);
        assert_eq!(resolutions[0], (gen_a, false));
        assert_eq!(resolutions[1], (gen_b, true));
        assert!(rx.try_recv().is_err(), "a probe resolved more than once");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_resolves_not_ready() {
        let fetcher = ScriptedFetcher::new(vec![EMPTY]);
        let mut prober = ReadinessProber::new(fetcher, test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let generation = prober.probe("http://example/live.m3u8".to_string(), move |gen, ready| {
            let _ = tx.send((gen, ready));
        });
        prober.cancel();

        let (resolved_gen, ready) = rx.recv().await.expect("resolution");
        assert_eq!(resolved_gen, generation);
        assert!(!ready);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn http_fetcher_reads_manifest() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/stream-key.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(READY))
            .mount(&server)
            .await;

        let fetcher = HttpManifestFetcher::new(Duration::from_secs(2)).expect("client");
        let body = fetcher
            .fetch(&format!("{}/hls/stream-key.m3u8", server.uri()))
            .await
            .expect("fetch");
        assert!(manifest_is_ready(&body, ".ts"));
    }

    #[tokio::test]
    async fn http_fetcher_errors_on_missing_manifest() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpManifestFetcher::new(Duration::from_secs(2)).expect("client");
        let result = fetcher.fetch(&format!("{}/hls/missing.m3u8", server.uri())).await;
        assert!(result.is_err());
    }
}
