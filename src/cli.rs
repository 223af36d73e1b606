//! Command line and environment configuration for the `bufferzones` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::classify::{DEFAULT_CRITICAL_KM, DEFAULT_HIGH_KM, DEFAULT_MODERATE_KM, ZoneBands};
use crate::config::{
    DEFAULT_FRONTLINE_STATUSES, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS, DEFAULT_SOURCE,
    DEFAULT_TIMEOUT_SECS, FailurePolicy, FetchConfig, OutputConfig, PipelineConfig,
};
use crate::data_sources::SourceSpec;
use crate::error::ConfigError;
use crate::geometry::DEFAULT_PRECISION;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Parser, Debug)]
#[command(name = "bufferzones", version, about = "Buffer zone map data refresher")]
pub struct Cli {
    #[command(flatten)]
    pub pipeline: PipelineArgs,
    /// Defaults to `refresh`.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Fetch, classify and publish once, then exit.
    Refresh,
    /// Serve the published snapshot over HTTP.
    Serve {
        #[arg(long, env = "BUFFERZONES_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Sources as ID=KIND:LOCATION, KIND being `deepstate` or `geojson`.
    #[arg(
        long = "source",
        global = true,
        env = "BUFFERZONES_SOURCES",
        value_delimiter = ',',
        default_value = DEFAULT_SOURCE
    )]
    pub sources: Vec<SourceSpec>,

    #[arg(long, global = true, env = "BUFFERZONES_OUTPUT_DIR", default_value = "data")]
    pub output_dir: PathBuf,

    /// Publication log; `<output-dir>/publications.db` when unset.
    #[arg(long, global = true, env = "BUFFERZONES_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, global = true, env = "BUFFERZONES_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Total attempts per HTTP source, including the first.
    #[arg(long, global = true, env = "BUFFERZONES_MAX_RETRIES", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each further retry.
    #[arg(long, global = true, env = "BUFFERZONES_RETRY_DELAY_SECS", default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    pub retry_delay_secs: u64,

    #[arg(long, global = true, env = "BUFFERZONES_CRITICAL_KM", default_value_t = DEFAULT_CRITICAL_KM)]
    pub critical_km: f64,

    #[arg(long, global = true, env = "BUFFERZONES_HIGH_KM", default_value_t = DEFAULT_HIGH_KM)]
    pub high_km: f64,

    #[arg(long, global = true, env = "BUFFERZONES_MODERATE_KM", default_value_t = DEFAULT_MODERATE_KM)]
    pub moderate_km: f64,

    /// Statuses treated as distance zero.
    #[arg(
        long = "frontline-status",
        global = true,
        env = "BUFFERZONES_FRONTLINE_STATUSES",
        value_delimiter = ',',
        default_values = DEFAULT_FRONTLINE_STATUSES
    )]
    pub frontline_statuses: Vec<String>,

    /// Decimals kept for coordinates.
    #[arg(long, global = true, env = "BUFFERZONES_PRECISION", default_value_t = DEFAULT_PRECISION)]
    pub precision: u32,

    #[arg(
        long,
        global = true,
        env = "BUFFERZONES_ON_SOURCE_FAILURE",
        value_enum,
        default_value_t = FailurePolicy::Continue
    )]
    pub on_source_failure: FailurePolicy,
}

impl PipelineArgs {
    pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
        let bands = ZoneBands::new(self.critical_km, self.high_km, self.moderate_km)?;

        let config = PipelineConfig {
            sources: self.sources,
            fetch: FetchConfig {
                timeout: Duration::from_secs(self.timeout_secs),
                max_attempts: self.max_retries,
                retry_delay: Duration::from_secs(self.retry_delay_secs),
                ..FetchConfig::default()
            },
            bands,
            frontline_statuses: self
                .frontline_statuses
                .into_iter()
                .map(|status| status.trim().to_string())
                .filter(|status| !status.is_empty())
                .collect(),
            precision: self.precision,
            on_source_failure: self.on_source_failure,
            output: OutputConfig {
                output_dir: self.output_dir,
                database_url: self.database_url,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library_defaults() {
        let cli = Cli::try_parse_from(["bufferzones"]).unwrap();
        assert_eq!(cli.command, None);

        let config = cli.pipeline.into_config().unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(config.sources, defaults.sources);
        assert_eq!(config.fetch, defaults.fetch);
        assert_eq!(config.bands, defaults.bands);
        assert_eq!(config.frontline_statuses, defaults.frontline_statuses);
        assert_eq!(config.precision, defaults.precision);
        assert_eq!(config.output, defaults.output);
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "bufferzones",
            "serve",
            "--port",
            "8080",
            "--source",
            "a=geojson:a.geojson,b=geojson:b.geojson",
            "--critical-km",
            "5",
            "--on-source-failure",
            "abort",
        ])
        .unwrap();

        assert_eq!(cli.command, Some(Commands::Serve { port: 8080 }));
        let config = cli.pipeline.into_config().unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.bands.critical_km, 5.0);
        assert_eq!(config.on_source_failure, FailurePolicy::Abort);
    }

    #[test]
    fn test_invalid_bands_rejected() {
        let cli = Cli::try_parse_from(["bufferzones", "--high-km", "100"]).unwrap();
        assert!(matches!(
            cli.pipeline.into_config(),
            Err(ConfigError::InvalidBands { .. })
        ));
    }

    #[test]
    fn test_invalid_source_rejected_at_parse() {
        assert!(Cli::try_parse_from(["bufferzones", "--source", "no-kind"]).is_err());
    }
}
