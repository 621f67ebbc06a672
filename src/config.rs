//! Configuration management
//!
//! All tunable thresholds for the resilience engine live here, loaded from a
//! YAML file merged with `UNDERSTUDY_`-prefixed environment variables. Every
//! section defaults to the values the engine was calibrated with, so an empty
//! config is fully usable.

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Circuit breaker configuration
    pub breaker: BreakerConfig,
    /// Retry strategy configuration
    pub retry: RetryConfig,
    /// Fallback analyzer configuration
    pub fallback: FallbackConfig,
    /// Quality assessment configuration
    pub quality: QualityConfig,
    /// Upgrade decision configuration
    pub upgrade: UpgradeConfig,
    /// Failure-pattern detector configuration
    pub detector: DetectorConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("UNDERSTUDY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Enable circuit breaking (disabled breakers always report closed)
    pub enabled: bool,
    /// Failures within the rolling window before opening
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted
    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,
    /// Time an open circuit waits before allowing a half-open probe
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Retry strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries
    pub enabled: bool,
    /// Maximum call attempts (first call included)
    pub max_attempts: u32,
    /// Backoff delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on any backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Minimum delay after a rate-limited failure
    #[serde(with = "humantime_serde")]
    pub rate_limit_min_delay: Duration,
    /// Additive jitter as a fraction of the base delay (0.0–0.9)
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            rate_limit_min_delay: Duration::from_secs(5),
            jitter_ratio: 0.25,
        }
    }
}

/// Fallback analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Soft wall-clock budget for a single analysis; when exceeded the
    /// analyzer finalizes with the stages completed so far
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
    /// Entries under this many words get a reduced confidence weight
    pub short_entry_words: usize,
    /// Entries over this many words get an increased confidence weight
    pub long_entry_words: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(100),
            short_entry_words: 10,
            long_entry_words: 50,
        }
    }
}

/// Quality assessment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum quality score for a fallback result to be considered valid
    pub min_valid_score: f64,
    /// A result with this many issues (or more) is invalid
    pub max_issues: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_valid_score: 0.3,
            max_issues: 3,
        }
    }
}

/// Upgrade decision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Budget ceiling for a single upgrade; estimates above it veto the upgrade
    pub cost_budget: f64,
    /// Cost attributed to each matched keyword by the default estimator
    pub keyword_unit_cost: f64,
    /// AI quality must exceed fallback quality by this margin to justify an upgrade
    pub quality_margin: f64,
    /// On sentiment disagreement, AI confidence must exceed fallback
    /// confidence by this margin to justify an upgrade
    pub confidence_margin: f64,
    /// Theme alignment below this floor (combined with low fallback quality)
    /// justifies an upgrade
    pub theme_alignment_floor: f64,
    /// Fallback quality below this floor counts as low quality
    pub low_quality_floor: f64,
    /// Fallback quality above this is considered settled when sentiments agree
    pub settled_quality: f64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            cost_budget: 50.0,
            keyword_unit_cost: 2.5,
            quality_margin: 0.2,
            confidence_margin: 0.3,
            theme_alignment_floor: 0.3,
            low_quality_floor: 0.4,
            settled_quality: 0.6,
        }
    }
}

/// Failure-pattern detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Rolling analysis window a detector run looks back over
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Span at the end of the window treated as "recent" for spike/latency
    /// comparisons against the earlier baseline
    #[serde(with = "humantime_serde")]
    pub recent_span: Duration,
    /// An active detection of the same pattern within this window suppresses
    /// a new one (idempotent re-runs)
    #[serde(with = "humantime_serde")]
    pub dedup_window: Duration,
    /// Recent error rate must reach this multiple of the baseline rate.
    /// When the baseline window has zero errors the raw recent error count
    /// stands in for the ratio.
    pub spike_ratio: f64,
    /// Minimum absolute recent errors for a spike
    pub spike_min_errors: usize,
    /// Ratio at which a spike is high severity
    pub spike_high_ratio: f64,
    /// Ratio at which a spike is critical severity
    pub spike_critical_ratio: f64,
    /// Recent average latency must reach this multiple of the baseline average
    pub latency_ratio: f64,
    /// Recent average latency below this is never a degradation (ms)
    pub latency_min_avg_ms: u64,
    /// Recent average latency above this is a degradation regardless of ratio (ms)
    pub latency_ceiling_ms: u64,
    /// Bucket width for cascade correlation
    #[serde(with = "humantime_serde")]
    pub cascade_bucket: Duration,
    /// Distinct failing services within one bucket for a cascade
    pub cascade_min_services: usize,
    /// Trailing latency samples that must all breach the exhaustion threshold
    pub exhaustion_tail: usize,
    /// Latency threshold for the exhaustion tail check (ms)
    pub exhaustion_latency_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30 * 60),
            recent_span: Duration::from_secs(5 * 60),
            dedup_window: Duration::from_secs(60 * 60),
            spike_ratio: 3.0,
            spike_min_errors: 5,
            spike_high_ratio: 5.0,
            spike_critical_ratio: 10.0,
            latency_ratio: 2.0,
            latency_min_avg_ms: 200,
            latency_ceiling_ms: 5_000,
            cascade_bucket: Duration::from_secs(5 * 60),
            cascade_min_services: 3,
            exhaustion_tail: 3,
            exhaustion_latency_ms: 8_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.fallback.deadline, Duration::from_millis(100));
        assert!((config.quality.min_valid_score - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.detector.spike_min_errors, 5);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/understudy.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "breaker:\n  failure_threshold: 9\n  cooldown: 10s\nretry:\n  max_attempts: 7\ndetector:\n  spike_ratio: 4.5"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.breaker.failure_threshold, 9);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 7);
        assert!((config.detector.spike_ratio - 4.5).abs() < f64::EPSILON);
        // Untouched sections keep their defaults.
        assert_eq!(config.fallback.short_entry_words, 10);
    }

    #[test]
    fn humantime_durations_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.breaker.failure_window, config.breaker.failure_window);
        assert_eq!(back.detector.window, config.detector.window);
    }
}
