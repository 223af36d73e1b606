//! Publishing snapshots to the output directory.
//!
//! The "latest" snapshot is only ever replaced by writing a temporary file
//! next to it and renaming it into place, so a reader sees either the old
//! or the new document, never a truncated one. A publication record is
//! appended in the same step; if either half fails, the old snapshot stays.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::OutputConfig;
use crate::error::PublishError;
use crate::storage::{NewPublication, PublicationLog, PublicationRecord};
use crate::writer::Snapshot;

/// What a publish attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The new snapshot equals the published one; nothing was written.
    NoChange,
    /// The snapshot was replaced and a record appended.
    Published(PublicationRecord),
}

/// Replace `path` with `bytes` via a synced temporary file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    replace_file(path, bytes)
        .await
        .map_err(|e| PublishError::io(path, e))
}

async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let tmp_path = dir.join(format!(".{file_name}.tmp-{}", std::process::id()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

/// Owns the published snapshot and its history.
#[derive(Clone)]
pub struct Publisher {
    output: OutputConfig,
    log: PublicationLog,
}

impl Publisher {
    pub fn new(output: OutputConfig, log: PublicationLog) -> Self {
        Self { output, log }
    }

    pub fn log(&self) -> &PublicationLog {
        &self.log
    }

    /// Bytes of the currently published snapshot, if any.
    pub async fn current(&self) -> Result<Option<Vec<u8>>, PublishError> {
        let path = self.output.latest_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PublishError::io(path, e)),
        }
    }


    /// Publish `snapshot` unless it equals the current one.
    ///
    /// Must not run concurrently with another publish on the same output
    /// directory; the pipeline's run lock guarantees that.
    pub async fn publish(&self, snapshot: &Snapshot) -> Result<PublishOutcome, PublishError> {
        let previous = self.current().await?;
        if previous.as_deref() == Some(snapshot.bytes.as_slice()) {
            info!(features = snapshot.feature_count, "Snapshot unchanged, nothing to publish");
            return Ok(PublishOutcome::NoChange);
        }

        self.replace(snapshot, previous.as_deref())
            .await
            .map(PublishOutcome::Published)
    }

    /// Replace the published snapshot with `snapshot` and append a record.
    ///
    /// `previous` must be what [`Publisher::current`] returned; it is written
    /// back if the record cannot be committed after the rename.
    pub async fn replace(
        &self,
        snapshot: &Snapshot,
        previous: Option<&[u8]>,
    ) -> Result<PublicationRecord, PublishError> {
        let published_at = Utc::now();
        let content_sha256 = snapshot.sha256();
        let archive_path = self.output.archive_path(published_at, &content_sha256);

        write_atomic(&archive_path, &snapshot.bytes).await?;

        let publication = NewPublication {
            published_at,
            content_sha256,
            byte_len: snapshot.bytes.len() as i64,
            feature_count: snapshot.feature_count as i64,
            archive_path: archive_path.display().to_string(),
        };

        match self.replace_latest(snapshot, publication, previous).await {
            Ok(record) => {
                info!(
                    id = record.id,
                    features = record.feature_count,
                    bytes = record.byte_len,
                    sha256 = %record.content_sha256,
                    archive = %record.archive_path,
                    "Snapshot published"
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&archive_path).await {
                    warn!(path = %archive_path.display(), error = %cleanup, "Failed to remove orphaned archive copy");
                }
                Err(e)
            }
        }
    }

    async fn replace_latest(
        &self,
        snapshot: &Snapshot,
        publication: NewPublication,
        previous: Option<&[u8]>,
    ) -> Result<PublicationRecord, PublishError> {
        let latest_path = self.output.latest_path();

        // Dropping the transaction on any early return rolls the insert back
        let mut tx = self.log.begin().await?;
        let record = PublicationLog::append(&mut tx, publication).await?;
        write_atomic(&latest_path, &snapshot.bytes).await?;

        if let Err(e) = tx.commit().await {
            warn!(error = %e, "Commit failed after replacing snapshot, restoring previous version");
            self.restore(&latest_path, previous).await?;
            return Err(e.into());
        }

        Ok(record)
    }

    async fn restore(&self, latest_path: &Path, previous: Option<&[u8]>) -> Result<(), PublishError> {
        let result = match previous {
            Some(bytes) => replace_file(latest_path, bytes).await,
            None => tokio::fs::remove_file(latest_path).await,
        };

        result.map_err(|error| PublishError::Restore {
            path: latest_path.to_path_buf(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sqlite_url;

    async fn publisher(dir: &tempfile::TempDir) -> Publisher {
        let output = OutputConfig::new(dir.path());
        let log = PublicationLog::new(&sqlite_url(&dir.path().join("log.db")))
            .await
            .unwrap();
        Publisher::new(output, log)
    }

    fn snapshot(body: &str) -> Snapshot {
        Snapshot {
            bytes: body.as_bytes().to_vec(),
            feature_count: 1,
        }
    }

    fn archive_files(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path().join("archive"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_first_publish() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;

        let outcome = publisher.publish(&snapshot("{\"v\":1}\n")).await.unwrap();
        let PublishOutcome::Published(record) = outcome else {
            panic!("expected a publication");
        };

        let latest = std::fs::read(OutputConfig::new(dir.path()).latest_path()).unwrap();
        assert_eq!(latest, b"{\"v\":1}\n");
        assert_eq!(std::fs::read(&record.archive_path).unwrap(), latest);
        assert_eq!(record.byte_len, latest.len() as i64);
        assert_eq!(publisher.log().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_is_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;

        publisher.publish(&snapshot("same")).await.unwrap();
        let outcome = publisher.publish(&snapshot("same")).await.unwrap();

        assert_eq!(outcome, PublishOutcome::NoChange);
        assert_eq!(publisher.log().count().await.unwrap(), 1);
        assert_eq!(archive_files(&dir), 1);
        assert_eq!(publisher.current().await.unwrap().unwrap(), b"same");
    }

    #[tokio::test]
    async fn test_changed_snapshot_appends_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;

        publisher.publish(&snapshot("one")).await.unwrap();
        publisher.publish(&snapshot("two")).await.unwrap();

        assert_eq!(publisher.log().count().await.unwrap(), 2);
        assert_eq!(archive_files(&dir), 2);
        assert_eq!(publisher.current().await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_failed_history_append_keeps_previous_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;
        publisher.publish(&snapshot("stable")).await.unwrap();

        publisher.log().close().await;
        let err = publisher.publish(&snapshot("broken")).await.unwrap_err();

        assert!(matches!(err, PublishError::Database(_)));
        assert_eq!(publisher.current().await.unwrap().unwrap(), b"stable");
        assert_eq!(archive_files(&dir), 1);
    }

    #[tokio::test]
    async fn test_failed_replace_rolls_back_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;
        publisher.publish(&snapshot("stable")).await.unwrap();

        // Occupy the temporary file name so the write cannot start
        let latest = OutputConfig::new(dir.path()).latest_path();
        let blocker = latest
            .parent()
            .unwrap()
            .join(format!(".buffer_zones_data_last.geojson.tmp-{}", std::process::id()));
        std::fs::create_dir(&blocker).unwrap();

        let err = publisher.publish(&snapshot("broken")).await.unwrap_err();

        assert!(matches!(err, PublishError::Io { .. }));
        assert_eq!(std::fs::read(&latest).unwrap(), b"stable");
        assert_eq!(publisher.log().count().await.unwrap(), 1);
        assert_eq!(archive_files(&dir), 1);
    }

    /// Make every later commit on the log fail: a deferred foreign key is
    /// violated by a trigger on insert, so the error only surfaces at COMMIT.
    async fn fail_commits(dir: &tempfile::TempDir) {
        let pool = sqlx::SqlitePool::connect(&sqlite_url(&dir.path().join("log.db")))
            .await
            .unwrap();
        for statement in [
            "CREATE TABLE parents (id INTEGER PRIMARY KEY)",
            "CREATE TABLE orphans (parent_id INTEGER REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED)",
            "CREATE TRIGGER orphan_on_publish AFTER INSERT ON publications \
             BEGIN INSERT INTO orphans (parent_id) VALUES (42); END",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn test_failed_commit_restores_previous_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;
        publisher.publish(&snapshot("stable")).await.unwrap();
        let latest = OutputConfig::new(dir.path()).latest_path();
        let before = std::fs::read(&latest).unwrap();

        fail_commits(&dir).await;
        let err = publisher.publish(&snapshot("broken")).await.unwrap_err();

        assert!(matches!(err, PublishError::Database(_)));
        assert_eq!(std::fs::read(&latest).unwrap(), before);
        assert_eq!(publisher.log().count().await.unwrap(), 1);
        assert_eq!(archive_files(&dir), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_removes_first_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;

        fail_commits(&dir).await;
        let err = publisher.publish(&snapshot("first")).await.unwrap_err();

        assert!(matches!(err, PublishError::Database(_)));
        assert!(!OutputConfig::new(dir.path()).latest_path().exists());
        assert_eq!(publisher.current().await.unwrap(), None);
        assert_eq!(publisher.log().count().await.unwrap(), 0);
        assert_eq!(archive_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_replace_skips_comparison() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = publisher(&dir).await;
        publisher.publish(&snapshot("same")).await.unwrap();

        let previous = publisher.current().await.unwrap();
        let record = publisher
            .replace(&snapshot("same"), previous.as_deref())
            .await
            .unwrap();

        assert_eq!(record.id, 2);
        assert_eq!(publisher.log().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_whole_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.json");

        write_atomic(&path, b"a much longer first version").await.unwrap();
        write_atomic(&path, b"short").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"short");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
