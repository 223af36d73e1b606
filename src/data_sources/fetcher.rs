//! Concurrent source fetching with bounded retries.

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{SourceLocation, SourceSpec};
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::model::RawRecord;

/// Fetches and decodes configured sources.
#[derive(Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

/// Failure of a single HTTP attempt.
enum AttemptError {
    Transport(reqwest::Error),
    Status(u16),
    /// The body arrived but did not decode.
    Decode(FetchError),
}

impl AttemptError {
    fn into_fetch_error(self, source_id: &str, attempts: u32) -> FetchError {
        match self {
            AttemptError::Transport(error) => FetchError::Unreachable {
                source_id: source_id.to_string(),
                attempts,
                error,
            },
            AttemptError::Status(status) => FetchError::Status {
                source_id: source_id.to_string(),
                status,
                attempts,
            },
            AttemptError::Decode(error) => error,
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transport(error) => write!(f, "{error}"),
            AttemptError::Status(status) => write!(f, "HTTP {status}"),
            AttemptError::Decode(error) => write!(f, "{error}"),
        }
    }
}

/// Result of fetching every configured source.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Records of all successful sources, grouped by source id in ascending
    /// order, upstream order within a source.
    pub records: Vec<RawRecord>,

    /// Ids of the sources that succeeded, ascending.
    pub succeeded: Vec<String>,

    /// Failures, ordered by source id.
    pub failures: Vec<FetchError>,
}

impl FetchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.succeeded.is_empty()
    }

    pub fn all_failed(&self) -> bool {
        !self.failures.is_empty() && self.succeeded.is_empty()
    }
}

impl SourceFetcher {
    /// Create a fetcher with the given timeout, retry and User-Agent settings.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, config })
    }

    /// Fetch and decode a single source.
    ///
    /// For HTTP sources a body that fails to decode counts as a failed
    /// attempt and is retried like a transport error.
    pub async fn fetch(&self, spec: &SourceSpec) -> Result<Vec<RawRecord>, FetchError> {
        let records = match &spec.location {
            SourceLocation::Http(url) => self.get_with_retries(spec, url).await?,
            SourceLocation::File(path) => {
                let payload = tokio::fs::read(path)
                    .await
                    .map_err(|error| FetchError::Io {
                        source_id: spec.id.clone(),
                        path: path.clone(),
                        error,
                    })?;
                spec.kind.decode(&spec.id, &payload)?
            }
        };

        info!(
            source = %spec.id,
            kind = spec.kind.as_str(),
            records = records.len(),
            "Source fetched"
        );
        Ok(records)
    }

    /// Fetch all sources concurrently.
    ///
    /// Results are merged in source id order regardless of which request
    /// finishes first.
    pub async fn fetch_all(&self, specs: &[SourceSpec]) -> FetchOutcome {
        let mut tasks = JoinSet::new();
        for spec in specs.iter().cloned() {
            let fetcher = self.clone();
            tasks.spawn(async move {
                let result = fetcher.fetch(&spec).await;
                (spec.id, result)
            });
        }

        let mut results = Vec::with_capacity(specs.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => warn!(error = %e, "Source task cancelled"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut outcome = FetchOutcome::default();
        for (source_id, result) in results {
            match result {
                Ok(records) => {
                    outcome.records.extend(records);
                    outcome.succeeded.push(source_id);
                }
                Err(e) => {
                    warn!(source = %source_id, error = %e, "Source failed");
                    outcome.failures.push(e);
                }
            }
        }

        outcome
    }

    async fn get_with_retries(
        &self,
        spec: &SourceSpec,
        url: &str,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let source_id = spec.id.as_str();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(source = %source_id, attempt, %url, "Requesting source");

            let result = self.get_once(url).await.and_then(|payload| {
                debug!(source = %source_id, bytes = payload.len(), "Decoding source payload");
                spec.kind
                    .decode(source_id, &payload)
                    .map_err(AttemptError::Decode)
            });
            let error = match result {
                Ok(records) => return Ok(records),
                Err(error) => error,
            };

            warn!(
                source = %source_id,
                attempt,
                max_attempts,
                error = %error,
                "Source request failed"
            );

            if attempt >= max_attempts {
                return Err(error.into_fetch_error(source_id, attempt));
            }

            let delay = self.config.backoff(attempt);
            info!(source = %source_id, delay_ms = delay.as_millis() as u64, "Retrying source");
            tokio::time::sleep(delay).await;
        }
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }

        let payload = response.bytes().await.map_err(AttemptError::Transport)?;
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::data_sources::SourceKind;

    #[tokio::test]
    async fn test_fetch_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"distance_km":3},"geometry":null}]}"#,
        )
        .unwrap();

        let fetcher = SourceFetcher::new(FetchConfig::default()).unwrap();
        let spec = SourceSpec::new(
            "local",
            SourceKind::GeoJson,
            SourceLocation::File(file.path().to_path_buf()),
        );

        let records = fetcher.fetch(&spec).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].distance_km, Some(3.0));
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let fetcher = SourceFetcher::new(FetchConfig::default()).unwrap();
        let spec = SourceSpec::new(
            "missing",
            SourceKind::GeoJson,
            SourceLocation::File("/nonexistent/bufferzones/input.geojson".into()),
        );

        let err = fetcher.fetch(&spec).await.unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }

    #[tokio::test]
    async fn test_fetch_all_orders_by_source_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut specs = Vec::new();
        for id in ["zulu", "alpha", "mike"] {
            let path = dir.path().join(format!("{id}.geojson"));
            std::fs::write(
                &path,
                r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},"geometry":null}]}"#,
            )
            .unwrap();
            specs.push(SourceSpec::new(id, SourceKind::GeoJson, SourceLocation::File(path)));
        }
        specs.push(SourceSpec::new(
            "broken",
            SourceKind::GeoJson,
            SourceLocation::File(dir.path().join("absent.geojson")),
        ));

        let fetcher = SourceFetcher::new(FetchConfig::default()).unwrap();
        let outcome = fetcher.fetch_all(&specs).await;

        assert_eq!(outcome.succeeded, vec!["alpha", "mike", "zulu"]);
        let order: Vec<&str> = outcome.records.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(order, vec!["alpha", "mike", "zulu"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source_id(), Some("broken"));
        assert!(outcome.is_partial());
        assert!(!outcome.all_failed());
    }
}
