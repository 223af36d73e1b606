//! Error taxonomy for the refresh pipeline.
//!
//! Each stage has its own error type so the run can tell a retryable,
//! per-source failure ([`FetchError`]) apart from the fatal ones that must
//! leave the published snapshot untouched.

use std::path::PathBuf;

/// A source could not be fetched or decoded.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Every attempt to reach the source failed at the transport level.
    #[error("source '{source_id}' unreachable after {attempts} attempt(s): {error}")]
    Unreachable {
        source_id: String,
        attempts: u32,
        #[source]
        error: reqwest::Error,
    },

    /// The source kept answering with a non-success status.
    #[error("source '{source_id}' returned HTTP {status} after {attempts} attempt(s)")]
    Status {
        source_id: String,
        status: u16,
        attempts: u32,
    },

    /// The payload was not the expected JSON shape.
    #[error("source '{source_id}' returned malformed data: {error}")]
    Malformed {
        source_id: String,
        #[source]
        error: serde_json::Error,
    },

    /// A local source file could not be read.
    #[error("source '{source_id}' could not read {}: {error}", .path.display())]
    Io {
        source_id: String,
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl FetchError {
    /// Identifier of the source this error belongs to, if any.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            FetchError::Client(_) => None,
            FetchError::Unreachable { source_id, .. }
            | FetchError::Status { source_id, .. }
            | FetchError::Malformed { source_id, .. }
            | FetchError::Io { source_id, .. } => Some(source_id),
        }
    }
}

/// The snapshot document could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The snapshot could not be published.
///
/// Whenever this is returned the previously published "latest" artifact is
/// still in place, byte for byte.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("filesystem error on {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to append publication record: {0}")]
    Database(#[from] sqlx::Error),

    /// The commit failed after the rename and the previous artifact could
    /// not be put back.
    #[error("failed to restore {} after aborted publish: {error}", .path.display())]
    Restore {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl PublishError {
    pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            error,
        }
    }
}

/// Invalid pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid source '{spec}': {reason}")]
    InvalidSource { spec: String, reason: String },

    #[error("zone bands must be positive and strictly increasing (got {critical}, {high}, {moderate})")]
    InvalidBands {
        critical: f64,
        high: f64,
        moderate: f64,
    },

    #[error("coordinate precision must be between 0 and 15 decimals (got {0})")]
    InvalidPrecision(u32),
}

/// Terminal failure of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// No feature survived classification; publishing would blank the map.
    #[error("no features survived classification ({records} record(s) fetched)")]
    EmptyResult { records: usize },

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("failed to open publication log: {0}")]
    Database(#[from] sqlx::Error),

    /// The output directory or lock file could not be set up.
    #[error("filesystem error on {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Another run holds the lock in the output directory.
    #[error("another refresh is already running (lock file {})", .0.display())]
    AlreadyRunning(PathBuf),
}
