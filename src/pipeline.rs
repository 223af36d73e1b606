//! One refresh run: fetch, classify, write, publish.
//!
//! A run moves through
//! `Idle → Fetching → Transforming → Writing → Comparing → {NoChange | Publishing} → Idle`
//! and ends in `Failed` on any terminal error. Nothing is carried over
//! between runs except the published snapshot and its log; the scheduler
//! decides when the next run happens.

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::classify::Classifier;
use crate::config::{FailurePolicy, PipelineConfig};
use crate::data_sources::{FetchOutcome, SourceFetcher};
use crate::error::PipelineError;
use crate::publisher::{PublishOutcome, Publisher};
use crate::storage::PublicationLog;
use crate::writer::SnapshotWriter;

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Transforming,
    Writing,
    Comparing,
    NoChange,
    Publishing,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Transforming => "transforming",
            RunState::Writing => "writing",
            RunState::Comparing => "comparing",
            RunState::NoChange => "no_change",
            RunState::Publishing => "publishing",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records and logs every state a run passes through.
#[derive(Debug, Default)]
struct StateTrail {
    states: Vec<RunState>,
}

impl StateTrail {
    fn enter(&mut self, state: RunState) {
        info!(state = %state, "Run state changed");
        self.states.push(state);
    }
}

/// Exclusive claim on an output directory for the duration of a run.
///
/// Backed by an OS advisory lock on a file in the output directory. The
/// file itself is never removed; only the lock is released, by drop or by
/// the OS when the process dies, so a crashed run never blocks the next one.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: std::fs::File,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, PipelineError> {
        let io_error = |error| PipelineError::Io {
            path: path.to_path_buf(),
            error,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_error)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(std::fs::TryLockError::WouldBlock) => {
                return Err(PipelineError::AlreadyRunning(path.to_path_buf()));
            }
            Err(std::fs::TryLockError::Error(e)) => return Err(io_error(e)),
        }

        // The pid is informational; a failed write still holds the lock
        let written = file
            .set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Failed to write pid to lock file");
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: PublishOutcome,
    /// States passed through, starting and ending with `Idle`.
    pub states: Vec<RunState>,
    /// Ids of sources that were fetched successfully.
    pub sources_ok: Vec<String>,
    /// One message per failed source, ordered by source id.
    pub source_failures: Vec<String>,
    pub records: usize,
    pub features: usize,
    pub unclassified: usize,
    pub invalid_geometry: usize,
    /// Hex SHA-256 of the snapshot this run produced.
    pub sha256: String,
}

/// The refresh pipeline with its long-lived collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: SourceFetcher,
    classifier: Classifier,
    writer: SnapshotWriter,
    publisher: Publisher,
}

impl Pipeline {
    /// Validate `config`, prepare the output directory and open the log.
    pub async fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let output_dir = &config.output.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|error| PipelineError::Io {
                path: output_dir.clone(),
                error,
            })?;

        let fetcher = SourceFetcher::new(config.fetch.clone())?;
        let log = PublicationLog::new(&config.output.database_url()).await?;
        let classifier = Classifier::new(
            config.bands,
            config.frontline_statuses.clone(),
            config.precision,
        );
        let writer = SnapshotWriter::new(config.precision);
        let publisher = Publisher::new(config.output.clone(), log);

        Ok(Self {
            config,
            fetcher,
            classifier,
            writer,
            publisher,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn log(&self) -> &PublicationLog {
        self.publisher.log()
    }

    /// Run once. On error the published snapshot is unchanged.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let mut trail = StateTrail::default();
        trail.enter(RunState::Idle);

        match self.run_stages(&mut trail).await {
            Ok(report) => Ok(report),
            Err(e) => {
                trail.enter(RunState::Failed);
                error!(error = %e, "Refresh failed, published snapshot left untouched");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, trail: &mut StateTrail) -> Result<RunReport, PipelineError> {
        let _lock = RunLock::acquire(&self.config.output.lock_path())?;

        trail.enter(RunState::Fetching);
        let FetchOutcome {
            records,
            succeeded,
            failures,
        } = self.fetcher.fetch_all(&self.config.sources).await;

        let source_failures: Vec<String> = failures.iter().map(|e| e.to_string()).collect();
        let fatal = !failures.is_empty()
            && (succeeded.is_empty() || self.config.on_source_failure == FailurePolicy::Abort);
        if fatal {
            if let Some(first) = failures.into_iter().next() {
                return Err(first.into());
            }
        } else if !failures.is_empty() {
            warn!(
                succeeded = succeeded.len(),
                failed = source_failures.len(),
                "Continuing with partial source data"
            );
        }

        trail.enter(RunState::Transforming);
        let record_count = records.len();
        let transformed = self.classifier.transform(records)?;

        trail.enter(RunState::Writing);
        let snapshot = self.writer.write(&transformed.features)?;

        trail.enter(RunState::Comparing);
        let previous = self.publisher.current().await?;
        let outcome = if previous.as_deref() == Some(snapshot.bytes.as_slice()) {
            trail.enter(RunState::NoChange);
            PublishOutcome::NoChange
        } else {
            trail.enter(RunState::Publishing);
            PublishOutcome::Published(self.publisher.replace(&snapshot, previous.as_deref()).await?)
        };

        trail.enter(RunState::Idle);

        Ok(RunReport {
            outcome,
            states: std::mem::take(&mut trail.states),
            sources_ok: succeeded,
            source_failures,
            records: record_count,
            features: snapshot.feature_count,
            unclassified: transformed.unclassified,
            invalid_geometry: transformed.invalid_geometry,
            sha256: snapshot.sha256(),
        })
    }
}
