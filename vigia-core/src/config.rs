use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::arbiter::ReacquireConfig;
use crate::audio::AudioConfig;
use crate::availability::AvailabilityConfig;
use crate::health::HealthConfig;
use crate::prober::ProberConfig;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub manifest: ManifestConfig,
    pub session: SessionConfig,
    pub prober: ProberConfig,
    pub health: HealthConfig,
    pub audio: AudioConfig,
    pub fallback: FallbackConfig,
    pub reacquire: ReacquireConfig,
    pub availability: AvailabilityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Base URL under which `<session_key>.<extension>` is served.
    pub base_url: String,
    pub extension: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/hls".to_string(),
            extension: "m3u8".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub heartbeat_interval_secs: u64,
    /// Initial local-audio preference.
    pub user_audio_enabled: bool,
    /// A segment loading longer than `ratio * duration` flags low
    /// bandwidth.
    pub low_bandwidth_ratio: f64,
    /// How long the advisory stays up after the last slow segment.
    pub low_bandwidth_clear_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            user_audio_enabled: true,
            low_bandwidth_ratio: 0.9,
            low_bandwidth_clear_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Delay before skipping an item after a fatal media error.
    pub fatal_skip_delay_ms: u64,
    /// Delay before the single resume retry after a transient error.
    pub transient_retry_delay_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            fatal_skip_delay_ms: 3_000,
            transient_retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a file, with `VIGIA__*` environment
    /// variables layered on top.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::from(Path::new(path)))
            .add_source(Environment::with_prefix("VIGIA").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(Environment::with_prefix("VIGIA").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.manifest.base_url.trim().is_empty() {
            errors.push("manifest.base_url must not be empty".to_string());
        }
        if self.manifest.extension.trim().is_empty() {
            errors.push("manifest.extension must not be empty".to_string());
        }
        if self.prober.poll_interval_ms == 0 {
            errors.push("prober.poll_interval_ms must be positive".to_string());
        }
        if self.prober.budget_ms < self.prober.poll_interval_ms {
            errors.push("prober.budget_ms must cover at least one poll interval".to_string());
        }
        if self.prober.required_successes == 0 {
            errors.push("prober.required_successes must be at least 1".to_string());
        }
        if self.health.tick_interval_ms == 0 {
            errors.push("health.tick_interval_ms must be positive".to_string());
        }
        if self.health.stagnant_ticks_threshold == 0 {
            errors.push("health.stagnant_ticks_threshold must be at least 1".to_string());
        }
        if self.audio.enforce_interval_ms == 0 {
            errors.push("audio.enforce_interval_ms must be positive".to_string());
        }
        if self.reacquire.max_attempts == 0 {
            errors.push("reacquire.max_attempts must be at least 1".to_string());
        }
        if self.reacquire.base_delay_ms == 0 {
            errors.push("reacquire.base_delay_ms must be positive".to_string());
        }
        if self.session.heartbeat_interval_secs == 0 {
            errors.push("session.heartbeat_interval_secs must be positive".to_string());
        }
        if self.availability.status_url.is_some() && self.availability.poll_interval_secs == 0 {
            errors.push("availability.poll_interval_secs must be positive".to_string());
        }
        if self.session.low_bandwidth_ratio <= 0.0 {
            errors.push("session.low_bandwidth_ratio must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load configuration from config file or environment variables.
///
/// Search order: `VIGIA_CONFIG_PATH`, then `./vigia.yaml`, then
/// environment variables only, then built-in defaults. Validation is
/// fail-fast: a present-but-invalid configuration aborts startup.
pub fn load_config() -> anyhow::Result<Config> {
    let config_path = std::env::var("VIGIA_CONFIG_PATH")
        .ok()
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            let cwd = "vigia.yaml";
            Path::new(cwd).exists().then(|| cwd.to_string())
        });

    let config = if let Some(path) = config_path {
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load config from {path}: {e}"))?
    } else {
        Config::from_env().unwrap_or_default()
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!("Config validation error: {}", error);
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        // Documented defaults for the probe and health policies.
        assert_eq!(config.prober.budget_ms, 15_000);
        assert_eq!(config.prober.poll_interval_ms, 500);
        assert_eq!(config.prober.required_successes, 1);
        assert_eq!(config.health.tick_interval_ms, 1_000);
        assert_eq!(config.health.behind_threshold_secs, 5.0);
        assert_eq!(config.health.low_buffer_threshold_secs, 0.5);
        assert_eq!(config.health.stagnant_ticks_threshold, 3);
        assert_eq!(config.health.recovery_cooldown_ms, 3_000);
        assert_eq!(config.audio.enforce_interval_ms, 500);
        assert_eq!(config.session.heartbeat_interval_secs, 30);
    }

    #[test]
    fn validation_collects_all_errors() {
        let mut config = Config::default();
        config.manifest.base_url = String::new();
        config.prober.required_successes = 0;
        config.health.tick_interval_ms = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn budget_must_cover_a_poll() {
        let mut config = Config::default();
        config.prober.budget_ms = 100;
        config.prober.poll_interval_ms = 500;
        assert!(config.validate().is_err());
    }
}
