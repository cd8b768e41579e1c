//! Asset processing status, persisted in SQLite.
//!
//! The row layout matches what the upload API writes: one `assets` row
//! per upload, with `processing_status` as the only field the pipeline
//! touches afterwards.

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::sqlite::configure_connection;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to open status store at {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("status store query failed: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("unknown processing state: {0}")]
    InvalidState(String),
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("status store io error: {0}")]
    Io(#[from] io::Error),
}

pub type StatusResult<T> = Result<T, StatusError>;

/// Lifecycle of an asset as readers of the public API see it.
///
/// The pipeline only ever writes `Processing` and `Done`; `Failed` is
/// reserved for operators marking an asset dead after investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Uploading,
    Processing,
    Done,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Uploading => "uploading",
            ProcessingState::Processing => "processing",
            ProcessingState::Done => "done",
            ProcessingState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = StatusError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "uploading" => Ok(ProcessingState::Uploading),
            "processing" => Ok(ProcessingState::Processing),
            "done" => Ok(ProcessingState::Done),
            "failed" => Ok(ProcessingState::Failed),
            other => Err(StatusError::InvalidState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub processing_status: ProcessingState,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AssetRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let raw_status: String = row.get("processing_status")?;
        let processing_status = raw_status.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                0,
                "processing_status".to_string(),
                rusqlite::types::Type::Text,
            )
        })?;
        Ok(Self {
            asset_id: row.get("asset_id")?,
            owner_id: row.get("owner_id")?,
            title: row.get("title")?,
            processing_status,
            created_at: parse_timestamp(row.get::<_, Option<String>>("created_at")?),
            updated_at: parse_timestamp(row.get::<_, Option<String>>("updated_at")?),
        })
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|raw| {
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    })
}

/// Filter for [`SqliteStatusStore::list`].
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    pub status: Option<ProcessingState>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SqliteStatusStoreBuilder {
    path: PathBuf,
    read_only: bool,
    create_if_missing: bool,
}

impl SqliteStatusStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
            create_if_missing: true,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        if read_only {
            self.create_if_missing = false;
        }
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn build(self) -> StatusResult<SqliteStatusStore> {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        let store = SqliteStatusStore {
            path: self.path,
            flags,
        };
        if self.read_only {
            store.open()?;
        } else {
            store.initialize()?;
        }
        Ok(store)
    }
}

/// Handle to the assets database. Cheap to clone; every operation opens
/// a fresh connection so clones can be used from blocking worker
/// threads without coordination.
#[derive(Debug, Clone)]
pub struct SqliteStatusStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteStatusStore {
    pub fn builder(path: impl Into<PathBuf>) -> SqliteStatusStoreBuilder {
        SqliteStatusStoreBuilder::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StatusResult<Connection> {
        let conn =
            Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
                StatusError::Open {
                    source,
                    path: self.path.clone(),
                }
            })?;
        configure_connection(&conn)?;
        Ok(conn)
    }

    fn initialize(&self) -> StatusResult<()> {
        let conn = self.open()?;
        conn.execute_batch(include_str!("../../sql/assets.sql"))?;
        Ok(())
    }

    /// Records a freshly uploaded asset. The API layer calls this before
    /// the job is enqueued, so the row exists when the worker flips it
    /// to `processing`.
    pub fn register_upload(
        &self,
        asset_id: &str,
        owner_id: &str,
        title: Option<&str>,
    ) -> StatusResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO assets (asset_id, owner_id, title, processing_status)
             VALUES (?1, ?2, ?3, 'uploading')",
            rusqlite::params![asset_id, owner_id, title],
        )?;
        Ok(())
    }

    pub fn set_state(&self, asset_id: &str, state: ProcessingState) -> StatusResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE assets
             SET processing_status = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE asset_id = ?2",
            rusqlite::params![state.as_str(), asset_id],
        )?;
        if affected == 0 {
            return Err(StatusError::NotFound(asset_id.to_string()));
        }
        debug!(asset_id, state = %state, "asset status updated");
        Ok(())
    }

    pub fn fetch(&self, asset_id: &str) -> StatusResult<AssetRecord> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT asset_id, owner_id, title, processing_status, created_at, updated_at
             FROM assets WHERE asset_id = ?1",
        )?;
        let mut rows = stmt.query_map([asset_id], AssetRecord::from_row)?;
        match rows.next() {
            Some(record) => Ok(record?),
            None => Err(StatusError::NotFound(asset_id.to_string())),
        }
    }

    pub fn list(&self, filter: &AssetFilter) -> StatusResult<Vec<AssetRecord>> {
        let conn = self.open()?;
        let limit = filter.limit.unwrap_or(100) as i64;
        let records = match filter.status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT asset_id, owner_id, title, processing_status, created_at, updated_at
                     FROM assets WHERE processing_status = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![status.as_str(), limit],
                    AssetRecord::from_row,
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT asset_id, owner_id, title, processing_status, created_at, updated_at
                     FROM assets ORDER BY created_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], AssetRecord::from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    /// Assets still marked `processing` whose last update is older than
    /// the given age. These are the ones left behind by a crashed worker
    /// or a run where every rendition failed.
    pub fn stalled(&self, older_than: chrono::Duration) -> StatusResult<Vec<AssetRecord>> {
        let cutoff = (Utc::now() - older_than)
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT asset_id, owner_id, title, processing_status, created_at, updated_at
             FROM assets
             WHERE processing_status = 'processing' AND updated_at < ?1
             ORDER BY updated_at ASC",
        )?;
        let rows = stmt.query_map([cutoff], AssetRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_by_status(&self) -> StatusResult<Vec<(ProcessingState, i64)>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT processing_status, COUNT(*) FROM assets GROUP BY processing_status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            let (raw, count) = row?;
            counts.push((raw.parse()?, count));
        }
        Ok(counts)
    }
}

/// Async seam the pipeline uses to publish status transitions. Tests
/// substitute recording implementations to assert transition order.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn set_processing_status(
        &self,
        asset_id: &str,
        state: ProcessingState,
    ) -> StatusResult<()>;
}

#[async_trait]
impl StatusPublisher for SqliteStatusStore {
    async fn set_processing_status(
        &self,
        asset_id: &str,
        state: ProcessingState,
    ) -> StatusResult<()> {
        let store = self.clone();
        let asset_id = asset_id.to_string();
        tokio::task::spawn_blocking(move || store.set_state(&asset_id, state))
            .await
            .map_err(|err| StatusError::Io(io::Error::other(err)))?
    }
}
