//! Pipeline configuration.
//!
//! [`PipelineConfig::default`] reproduces the production setup: a single
//! DeepStateMap source, 9/40/80 km bands and output under `data/`. The
//! binary overrides individual fields from the command line or
//! `BUFFERZONES_*` environment variables.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ZoneBands;
use crate::data_sources::SourceSpec;
use crate::error::ConfigError;
use crate::geometry::DEFAULT_PRECISION;

/// Source used when none is configured.
pub const DEFAULT_SOURCE: &str = "deepstate=deepstate:https://deepstatemap.live/api/history/last";

/// Statuses marking territory behind the contact line.
pub const DEFAULT_FRONTLINE_STATUSES: [&str; 3] = ["CADR and CALR", "Occupied", "Occupied Crimea"];

/// The DeepStateMap API rejects requests without a browser User-Agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows Phone 10.0; Android 6.0.1; Microsoft; RM-1152) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/52.0.2743.116 \
     Mobile Safari/537.36 Edge/15.15254";

/// File name of the "latest" snapshot inside `last/`.
pub const LATEST_FILENAME: &str = "buffer_zones_data_last.geojson";

const ARCHIVE_DIGEST_CHARS: usize = 12;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// What to do when some, but not all, sources fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Publish what the remaining sources produced.
    #[default]
    Continue,
    /// Fail the run on the first source failure.
    Abort,
}

/// HTTP behaviour of the source fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per HTTP source, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_delay.saturating_mul(1 << exponent)
    }
}

/// Where published artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    /// SQLite URL of the publication log; derived from `output_dir` if unset.
    pub database_url: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::new("data")
    }
}

impl OutputConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            database_url: None,
        }
    }

    /// Path of the "latest" snapshot.
    pub fn latest_path(&self) -> PathBuf {
        self.output_dir.join("last").join(LATEST_FILENAME)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.output_dir.join("archive")
    }

    /// Archive file for a publication made at `published_at`.
    ///
    /// The digest prefix keeps two publications within the same second
    /// from sharing a file.
    pub fn archive_path(&self, published_at: DateTime<Utc>, content_sha256: &str) -> PathBuf {
        let digest: String = content_sha256.chars().take(ARCHIVE_DIGEST_CHARS).collect();
        self.archive_dir().join(format!(
            "buffer_zones_data_{}_{digest}.geojson",
            published_at.format("%Y%m%dT%H%M%SZ")
        ))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.output_dir.join(".refresh.lock")
    }

    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| sqlite_url(&self.output_dir.join("publications.db")))
    }
}

/// SQLite URL for a database file, created on first use.
pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}?mode=rwc", path.display())
}

/// Everything a pipeline run needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sources: Vec<SourceSpec>,
    pub fetch: FetchConfig,
    pub bands: ZoneBands,
    /// Statuses classified as distance zero.
    pub frontline_statuses: BTreeSet<String>,
    /// Decimals kept for coordinates.
    pub precision: u32,
    pub on_source_failure: FailurePolicy,
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let sources = DEFAULT_SOURCE
            .parse::<SourceSpec>()
            .map(|spec| vec![spec])
            .unwrap_or_default();

        Self {
            sources,
            fetch: FetchConfig::default(),
            bands: ZoneBands::default(),
            frontline_statuses: DEFAULT_FRONTLINE_STATUSES
                .iter()
                .map(|status| status.to_string())
                .collect(),
            precision: DEFAULT_PRECISION,
            on_source_failure: FailurePolicy::default(),
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check invariants that the types alone do not enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bands.validate()?;

        if self.precision > 15 {
            return Err(ConfigError::InvalidPrecision(self.precision));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::InvalidSource {
                    spec: source.to_string(),
                    reason: "duplicate source id".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].id, "deepstate");
        assert!(config.frontline_statuses.contains("Occupied Crimea"));
    }

    #[test]
    fn test_backoff_doubles() {
        let fetch = FetchConfig {
            retry_delay: Duration::from_secs(5),
            ..FetchConfig::default()
        };
        assert_eq!(fetch.backoff(1), Duration::from_secs(5));
        assert_eq!(fetch.backoff(2), Duration::from_secs(10));
        assert_eq!(fetch.backoff(3), Duration::from_secs(20));
    }

    #[test]
    fn test_output_paths() {
        let output = OutputConfig::new("/srv/map");
        assert_eq!(
            output.latest_path(),
            PathBuf::from("/srv/map/last/buffer_zones_data_last.geojson")
        );
        assert_eq!(output.database_url(), "sqlite:/srv/map/publications.db?mode=rwc");

        let at = DateTime::parse_from_rfc3339("2025-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            output.archive_path(at, "0123456789abcdef0123"),
            PathBuf::from("/srv/map/archive/buffer_zones_data_20250304T050607Z_0123456789ab.geojson")
        );
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let config = PipelineConfig {
            sources: vec![
                "a=geojson:one.geojson".parse().unwrap(),
                "a=geojson:two.geojson".parse().unwrap(),
            ],
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_precision_bound() {
        let config = PipelineConfig {
            precision: 16,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPrecision(16))
        ));
    }
}
