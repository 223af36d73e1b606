//! SQLite publication log.
//!
//! Every time the published snapshot changes, one row is appended to
//! `publications`. Rows are never updated or deleted; together with the
//! archive copies they form the version history of the map data.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};

/// A row of the publication log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationRecord {
    pub id: i64,
    pub published_at: DateTime<Utc>,
    /// Hex SHA-256 of the published document.
    pub content_sha256: String,
    pub byte_len: i64,
    pub feature_count: i64,
    /// Archive copy of the document.
    pub archive_path: String,
}

/// Fields of a record that is about to be appended.
#[derive(Debug, Clone)]
pub struct NewPublication {
    pub published_at: DateTime<Utc>,
    pub content_sha256: String,
    pub byte_len: i64,
    pub feature_count: i64,
    pub archive_path: String,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PublicationLog {
    pool: SqlitePool,
}

impl PublicationLog {
    /// Open the log and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:data/publications.db?mode=rwc")
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let log = Self { pool };
        log.initialize_schema().await?;

        Ok(log)
    }

    async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                published_at INTEGER NOT NULL,
                content_sha256 TEXT NOT NULL,
                byte_len INTEGER NOT NULL,
                feature_count INTEGER NOT NULL,
                archive_path TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Start a transaction; the publisher keeps it open across the rename.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Append a record inside `tx`. Nothing is visible until commit.
    pub async fn append(
        tx: &mut Transaction<'_, Sqlite>,
        publication: NewPublication,
    ) -> Result<PublicationRecord, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO publications (published_at, content_sha256, byte_len, feature_count, archive_path)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(publication.published_at.timestamp())
        .bind(&publication.content_sha256)
        .bind(publication.byte_len)
        .bind(publication.feature_count)
        .bind(&publication.archive_path)
        .execute(&mut **tx)
        .await?;

        Ok(PublicationRecord {
            id: result.last_insert_rowid(),
            published_at: publication.published_at,
            content_sha256: publication.content_sha256,
            byte_len: publication.byte_len,
            feature_count: publication.feature_count,
            archive_path: publication.archive_path,
        })
    }

    /// Most recent record, if anything was ever published.
    pub async fn latest(&self) -> Result<Option<PublicationRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, published_at, content_sha256, byte_len, feature_count, archive_path
            FROM publications
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let published_at: i64 = row.get("published_at");
            PublicationRecord {
                id: row.get("id"),
                published_at: Utc
                    .timestamp_opt(published_at, 0)
                    .single()
                    .unwrap_or_default(),
                content_sha256: row.get("content_sha256"),
                byte_len: row.get("byte_len"),
                feature_count: row.get("feature_count"),
                archive_path: row.get("archive_path"),
            }
        }))
    }

    /// Number of records in the log.
    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) as total FROM publications")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("total"))
    }

    /// Close the pool. Subsequent operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
