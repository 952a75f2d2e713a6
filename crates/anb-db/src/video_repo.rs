//! Video repository: reads and writes rows of the `videos` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use anb_models::{VideoId, VideoRecord, VideoStatus};

use crate::error::{DbError, DbResult};
use crate::Database;

/// Persistence seam used by the orchestrator and the upload side.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Persist a freshly uploaded record.
    async fn insert(&self, record: &VideoRecord) -> DbResult<()>;

    /// Load a record by id.
    async fn find(&self, video_id: &VideoId) -> DbResult<Option<VideoRecord>>;

    /// Write back status, processed location, timestamps and task reference.
    ///
    /// `source_location` and `uploaded_at` are immutable and never rewritten.
    async fn save(&self, record: &VideoRecord) -> DbResult<()>;
}

/// A raw video row from the database.
#[derive(Debug, Clone)]
struct VideoRow {
    video_id: String,
    status: String,
    source_location: String,
    processed_location: Option<String>,
    uploaded_at: String,
    processing_started_at: Option<String>,
    processed_at: Option<String>,
    task_reference: Option<String>,
}

impl VideoRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            video_id: row.get("video_id")?,
            status: row.get("status")?,
            source_location: row.get("source_location")?,
            processed_location: row.get("processed_location")?,
            uploaded_at: row.get("uploaded_at")?,
            processing_started_at: row.get("processing_started_at")?,
            processed_at: row.get("processed_at")?,
            task_reference: row.get("task_reference")?,
        })
    }

    fn into_record(self) -> DbResult<VideoRecord> {
        let corrupt = |reason: String| DbError::Corrupt {
            video_id: self.video_id.clone(),
            reason,
        };

        let status: VideoStatus = self
            .status
            .parse()
            .map_err(|e: anb_models::TransitionError| corrupt(e.to_string()))?;
        let uploaded_at = parse_ts(&self.uploaded_at).map_err(&corrupt)?;
        let processing_started_at = self
            .processing_started_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(&corrupt)?;
        let processed_at = self
            .processed_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(&corrupt)?;

        Ok(VideoRecord {
            video_id: VideoId::from_string(self.video_id.clone()),
            status,
            source_location: self.source_location,
            processed_location: self.processed_location,
            uploaded_at,
            processing_started_at,
            processed_at,
            task_reference: self.task_reference,
        })
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Inserts a new video row.
pub fn insert(db: &Database, record: &VideoRecord) -> DbResult<()> {
    db.with_conn(|conn| {
        let result = conn.execute(
            "INSERT INTO videos (video_id, status, source_location, processed_location,
             uploaded_at, processing_started_at, processed_at, task_reference, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.video_id.as_str(),
                record.status.as_str(),
                record.source_location,
                record.processed_location,
                fmt_ts(&record.uploaded_at),
                record.processing_started_at.as_ref().map(fmt_ts),
                record.processed_at.as_ref().map(fmt_ts),
                record.task_reference,
                fmt_ts(&Utc::now()),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(DbError::Duplicate(record.video_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    })
}

/// Fetches a video by id.
pub fn get(db: &Database, video_id: &str) -> DbResult<Option<VideoRecord>> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM videos WHERE video_id = ?1",
                params![video_id],
                VideoRow::from_row,
            )
            .optional()?)
    })?;
    row.map(VideoRow::into_record).transpose()
}

/// Updates the mutable columns of an existing video row.
///
/// A processed row only accepts another processed write. Anything else
/// leaves the row untouched and returns [`DbError::AlreadyProcessed`].
pub fn update(db: &Database, record: &VideoRecord) -> DbResult<()> {
    let id = record.video_id.as_str();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE videos SET status=?2, processed_location=?3, processing_started_at=?4,
             processed_at=?5, task_reference=?6, updated_at=?7
             WHERE video_id=?1 AND (status <> 'processed' OR ?2 = 'processed')",
            params![
                id,
                record.status.as_str(),
                record.processed_location,
                record.processing_started_at.as_ref().map(fmt_ts),
                record.processed_at.as_ref().map(fmt_ts),
                record.task_reference,
                fmt_ts(&Utc::now()),
            ],
        )?;
        if changed > 0 {
            return Ok(());
        }

        let exists = conn
            .query_row(
                "SELECT 1 FROM videos WHERE video_id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            Err(DbError::AlreadyProcessed(id.to_string()))
        } else {
            Err(DbError::NotFound(id.to_string()))
        }
    })
}

/// Counts videos per status.
pub fn count_by_status(db: &Database) -> DbResult<Vec<(VideoStatus, u64)>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM videos GROUP BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(status, n)| status.parse().ok().map(|s| (s, n)))
            .collect())
    })
}

/// `VideoRepository` over SQLite.
///
/// Each call runs on the blocking thread pool so the async executor is
/// never parked on the connection mutex or on disk I/O.
#[derive(Clone)]
pub struct SqliteVideoRepository {
    db: Database,
}

impl SqliteVideoRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn blocking<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }
}

#[async_trait]
impl VideoRepository for SqliteVideoRepository {
    async fn insert(&self, record: &VideoRecord) -> DbResult<()> {
        let record = record.clone();
        self.blocking(move |db| insert(db, &record)).await
    }

    async fn find(&self, video_id: &VideoId) -> DbResult<Option<VideoRecord>> {
        let id = video_id.as_str().to_string();
        self.blocking(move |db| get(db, &id)).await
    }

    async fn save(&self, record: &VideoRecord) -> DbResult<()> {
        let record = record.clone();
        self.blocking(move |db| update(db, &record)).await
    }
}
