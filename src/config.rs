use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_API_BASE;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
///
/// Every field has a default, so a missing config file means "run with the
/// reference thresholds". Credentials never live here — see [`Credentials`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Thresholds for the rank-streak detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// A keyword qualifies as top-like when its average rank is at or below
    /// this value.
    #[serde(default = "default_rank_threshold")]
    pub rank_threshold: f64,
    /// Minimum impressions for an observation to count at all.
    #[serde(default = "default_min_impressions")]
    pub min_impressions: u64,
    /// Consecutive qualifying runs required before an alert fires.
    #[serde(default = "default_streak_threshold")]
    pub streak_threshold: u32,
}

/// HTTP client tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request socket timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per request (first try included).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base backoff in seconds; the sleep before attempt N is `base * N`
    /// plus jitter.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: f64,
    /// Maximum keyword IDs per stats call (upstream request-size limit).
    #[serde(default = "default_max_ids_per_call")]
    pub max_ids_per_call: usize,
}

fn default_rank_threshold() -> f64 {
    1.5
}

fn default_min_impressions() -> u64 {
    30
}

fn default_streak_threshold() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_secs() -> f64 {
    1.5
}

fn default_max_ids_per_call() -> usize {
    200
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            rank_threshold: default_rank_threshold(),
            min_impressions: default_min_impressions(),
            streak_threshold: default_streak_threshold(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
            max_ids_per_call: default_max_ids_per_call(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path. A missing file yields the
    /// defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }
}

/// API credentials and delivery targets, sourced from the environment
/// (a `.env` file is honored via `dotenvy` in the binaries).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_base: String,
    pub api_key: String,
    pub secret_key: String,
    pub customer_id: String,
    /// Alert webhook; `None` disables delivery.
    pub webhook_url: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("NAVER_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let api_key = require_env("NAVER_API_KEY")?;
        let secret_key = require_env("NAVER_SECRET_KEY")?;
        let customer_id = require_env("NAVER_CUSTOMER_ID")?;
        let webhook_url = std::env::var("SLACK_WEBHOOK_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            api_base,
            api_key,
            secret_key,
            customer_id,
            webhook_url,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .with_context(|| format!("{name} is not set"))?
        .trim()
        .to_string();
    if value.is_empty() {
        anyhow::bail!("{name} is empty");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: AppConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(config.detector.rank_threshold, 1.5);
        assert_eq!(config.detector.min_impressions, 30);
        assert_eq!(config.detector.streak_threshold, 2);
        assert_eq!(config.http.retry_attempts, 3);
        assert_eq!(config.http.max_ids_per_call, 200);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            "[detector]\nrank_threshold = 2.0\n\n[http]\ntimeout_secs = 5\n",
        )
        .expect("partial config parses");
        assert_eq!(config.detector.rank_threshold, 2.0);
        assert_eq!(config.detector.min_impressions, 30);
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.retry_backoff_secs, 1.5);
    }

    #[test]
    fn missing_file_is_defaults() {
        let config = AppConfig::load(Path::new("does/not/exist.toml")).expect("defaults");
        assert_eq!(config.detector.streak_threshold, 2);
    }
}
