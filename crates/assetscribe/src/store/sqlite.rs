//! SQLite-backed job and asset store.
//!
//! Uses rusqlite with a thread-safe `Database` handle; all access is
//! serialized through a `Mutex<Connection>`, and async callers hop onto the
//! blocking pool. Tables are created on open if missing.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::store::{AssetStore, JobStore, StoreError};
use crate::worker::{Asset, JobStatus, ProcessingJob};

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle to one SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at `path` and ensures the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp '{}': {}", value, e)))
}

/// A raw `processing_jobs` row.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    asset_id: String,
    project_id: Option<String>,
    status: String,
    attempts: i64,
    last_heartbeat: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            asset_id: row.get("asset_id")?,
            project_id: row.get("project_id")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            last_heartbeat: row.get("last_heartbeat")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_job(self) -> Result<ProcessingJob, StoreError> {
        Ok(ProcessingJob {
            status: self.status.parse::<JobStatus>().map_err(StoreError::Decode)?,
            attempts: u32::try_from(self.attempts)
                .map_err(|_| StoreError::Decode(format!("bad attempts {}", self.attempts)))?,
            last_heartbeat: self
                .last_heartbeat
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            created_at: Some(parse_timestamp(&self.created_at)?),
            updated_at: Some(parse_timestamp(&self.updated_at)?),
            id: self.id,
            asset_id: self.asset_id,
            project_id: self.project_id,
            error_message: self.error_message,
        })
    }
}

fn asset_from_row(row: &Row<'_>) -> Result<Asset, rusqlite::Error> {
    let size: Option<i64> = row.get("size")?;
    Ok(Asset {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        file_name: row.get("file_name")?,
        file_type: row.get("file_type")?,
        file_url: row.get("file_url")?,
        mime_type: row.get("mime_type")?,
        size: size.and_then(|s| u64::try_from(s).ok()),
        content: row.get("content")?,
    })
}

fn find_job_in(conn: &Connection, id: &str) -> Result<Option<ProcessingJob>, StoreError> {
    let row = conn
        .query_row(
            "SELECT * FROM processing_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

fn job_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM processing_jobs WHERE id = ?1",
        params![id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Explains why a compare-and-set on `id` touched no rows.
fn cas_failure(conn: &Connection, id: &str, expected: JobStatus) -> StoreError {
    match job_exists(conn, id) {
        Ok(true) if expected == JobStatus::Pending => StoreError::ClaimConflict {
            job_id: id.to_string(),
        },
        Ok(true) => StoreError::Conflict {
            job_id: id.to_string(),
            expected,
        },
        Ok(false) => StoreError::NotFound {
            kind: "Job",
            id: id.to_string(),
        },
        Err(e) => e,
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let now = timestamp(Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assets (id, project_id, file_name, file_type, file_url, mime_type,
                 size, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    asset.id,
                    asset.project_id,
                    asset.file_name,
                    asset.file_type,
                    asset.file_url,
                    asset.mime_type,
                    asset.size.map(|s| s as i64),
                    asset.content,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn insert_job(&self, job: &ProcessingJob) -> Result<(), StoreError> {
        let now = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processing_jobs (id, asset_id, project_id, status, attempts,
                 last_heartbeat, error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id,
                    job.asset_id,
                    job.project_id,
                    job.status.as_str(),
                    job.attempts,
                    job.last_heartbeat.map(timestamp),
                    job.error_message,
                    timestamp(job.created_at.unwrap_or(now)),
                    timestamp(job.updated_at.unwrap_or(now)),
                ],
            )?;
            Ok(())
        })
    }

    /// Creates a pending job for `asset_id`.
    pub fn enqueue(&self, asset_id: &str) -> Result<ProcessingJob, StoreError> {
        let asset = self
            .find_asset(asset_id)?
            .ok_or_else(|| StoreError::NotFound {
                kind: "Asset",
                id: asset_id.to_string(),
            })?;
        let now = Utc::now();
        let job = ProcessingJob {
            id: uuid::Uuid::new_v4().to_string(),
            asset_id: asset.id,
            project_id: asset.project_id,
            status: JobStatus::Pending,
            attempts: 0,
            last_heartbeat: None,
            error_message: None,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.insert_job(&job)?;
        Ok(job)
    }

    pub fn find_job(&self, id: &str) -> Result<Option<ProcessingJob>, StoreError> {
        self.db.with_conn(|conn| find_job_in(conn, id))
    }

    pub fn find_asset(&self, id: &str) -> Result<Option<Asset>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM assets WHERE id = ?1",
                    params![id],
                    asset_from_row,
                )
                .optional()?)
        })
    }

    /// Returns a processing job to pending, the way a staleness monitor
    /// would after missed heartbeats.
    pub fn requeue(&self, id: &str) -> Result<(), StoreError> {
        let now = timestamp(Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE processing_jobs SET status = 'pending', updated_at = ?2
                 WHERE id = ?1 AND status = 'processing'",
                params![id, now],
            )?;
            if changed == 0 {
                return Err(cas_failure(conn, id, JobStatus::Processing));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn list_active(&self) -> Result<Vec<ProcessingJob>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM processing_jobs
                 WHERE status IN ('pending', 'processing')
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([], JobRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(JobRow::into_job).collect()
        })
        .await
    }

    async fn claim(
        &self,
        job: &ProcessingJob,
        at: DateTime<Utc>,
    ) -> Result<ProcessingJob, StoreError> {
        let id = job.id.clone();
        let now = timestamp(at);
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE processing_jobs
                 SET status = 'processing', attempts = attempts + 1,
                     last_heartbeat = ?2, updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, now],
            )?;
            if changed == 0 {
                return Err(cas_failure(conn, &id, JobStatus::Pending));
            }
            find_job_in(conn, &id)?.ok_or(StoreError::NotFound { kind: "Job", id })
        })
        .await
    }

    async fn heartbeat(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let id = job_id.to_string();
        let now = timestamp(at);
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE processing_jobs SET last_heartbeat = ?2, updated_at = ?2
                 WHERE id = ?1 AND status = 'processing'",
                params![id, now],
            )?;
            if changed == 0 {
                return Err(cas_failure(conn, &id, JobStatus::Processing));
            }
            Ok(())
        })
        .await
    }

    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition { to: status });
        }
        let id = job_id.to_string();
        let error_message = error_message.map(str::to_string);
        let now = timestamp(Utc::now());
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE processing_jobs SET status = ?2, error_message = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![id, status.as_str(), error_message, now],
            )?;
            if changed == 0 {
                return Err(cas_failure(conn, &id, JobStatus::Processing));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AssetStore for SqliteStore {
    async fn get_asset(&self, asset_id: &str) -> Result<Asset, StoreError> {
        let store = self.clone();
        let id = asset_id.to_string();
        tokio::task::spawn_blocking(move || store.find_asset(&id)?.ok_or(StoreError::NotFound {
            kind: "Asset",
            id,
        }))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn set_content(&self, asset_id: &str, content: &str) -> Result<(), StoreError> {
        let id = asset_id.to_string();
        let content = content.to_string();
        let now = timestamp(Utc::now());
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE assets SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, content, now],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { kind: "Asset", id });
            }
            Ok(())
        })
        .await
    }
}
