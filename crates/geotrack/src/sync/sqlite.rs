//! Local `SQLite` tracker store.
//!
//! This is the default backend. It keeps one row per session in `trackers`
//! and one row per sample in `samples`, and also serves the read-only
//! queries behind the `status` and `history` commands.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sample::{DeviceInfo, RawPosition, TelemetrySample};
use crate::session::SessionId;

use super::migrations;
use super::{RemoteStore, TrackerMetadata};

const MEMORY_PATH: &str = ":memory:";

/// Tracker store backed by a `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    ///
    /// Creates parent directories and initializes the schema as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening tracker store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Tracker store ready at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(MEMORY_PATH),
            source,
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(MEMORY_PATH),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::internal("tracker store connection poisoned"))?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::internal(format!("tracker store task failed: {e}")))?
    }

    /// All tracker records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn trackers(&self) -> Result<Vec<TrackerSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT t.session_id, t.created_at, t.client,
                       COUNT(s.id), MAX(s.timestamp)
                FROM trackers t LEFT JOIN samples s ON s.session_id = t.session_id
                GROUP BY t.session_id
                ORDER BY t.created_at DESC
                ",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(TrackerSummary {
                        session_id: SessionId::new(row.get::<_, String>(0)?),
                        created_at: parse_time(&row.get::<_, String>(1)?, 1)?,
                        client: row.get(2)?,
                        sample_count: row.get(3)?,
                        last_sample_at: row
                            .get::<_, Option<String>>(4)?
                            .map(|s| parse_time(&s, 4))
                            .transpose()?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// The most recent samples, newest first, optionally for one session.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn samples(
        &self,
        session: Option<SessionId>,
        limit: usize,
    ) -> Result<Vec<StoredSample>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT id, session_id, latitude, longitude, accuracy, timestamp, ip, device_info
                FROM samples
                WHERE ?1 IS NULL OR session_id = ?1
                ORDER BY id DESC LIMIT ?2
                ",
            )?;
            let session = session.as_ref().map(SessionId::as_str);
            let rows = stmt
                .query_map(params![session, limit], row_to_sample)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Counts and time range of the stored data.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stats(&self) -> Result<StoreStats> {
        let db_size_bytes = if self.path.as_os_str() == MEMORY_PATH {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        self.with_conn(move |conn| {
            let trackers: i64 = conn.query_row("SELECT COUNT(*) FROM trackers", [], |row| row.get(0))?;
            let (samples, oldest, newest): (i64, Option<String>, Option<String>) = conn.query_row(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM samples",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            Ok(StoreStats {
                trackers,
                samples,
                oldest_sample: oldest.map(|s| parse_time(&s, 1)).transpose()?,
                newest_sample: newest.map(|s| parse_time(&s, 2)).transpose()?,
                db_size_bytes,
            })
        })
        .await
    }
}

#[async_trait::async_trait]
impl RemoteStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_if_absent(&self, id: &SessionId, metadata: &TrackerMetadata) -> Result<bool> {
        let id = id.clone();
        let created_at = metadata.created_at.to_rfc3339();
        let client = metadata.client.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO trackers (session_id, created_at, client) VALUES (?1, ?2, ?3)",
                params![id.as_str(), created_at, client],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn append(&self, id: &SessionId, sample: &TelemetrySample) -> Result<()> {
        let id = id.clone();
        let sample = sample.clone();
        let device_info = serde_json::to_string(sample.device_info())?;
        self.with_conn(move |conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM trackers WHERE session_id = ?1",
                    [id.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(Error::TrackerNotFound {
                    session_id: id.to_string(),
                });
            }

            conn.execute(
                r"
                INSERT INTO samples (session_id, latitude, longitude, accuracy, timestamp, ip, device_info)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    id.as_str(),
                    sample.latitude(),
                    sample.longitude(),
                    sample.accuracy(),
                    sample.timestamp_iso(),
                    sample.public_ip(),
                    device_info,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn parse_time(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<StoredSample> {
    let device_json: String = row.get(7)?;
    let device_info: DeviceInfo = serde_json::from_str(&device_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    let position = RawPosition {
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        accuracy: row.get(4)?,
        timestamp: parse_time(&row.get::<_, String>(5)?, 5)?,
    };

    Ok(StoredSample {
        id: row.get(0)?,
        session_id: SessionId::new(row.get::<_, String>(1)?),
        sample: TelemetrySample::new(position, device_info, row.get(6)?),
    })
}

/// A tracker record with sample totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSummary {
    /// Session the record belongs to.
    pub session_id: SessionId,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Agent that created it.
    pub client: String,
    /// Number of samples.
    pub sample_count: i64,
    /// Timestamp of the newest sample.
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// A sample as stored, with its row id and owning session.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSample {
    /// Row id, increasing in arrival order.
    pub id: i64,
    /// Owning session.
    pub session_id: SessionId,
    /// The sample itself.
    pub sample: TelemetrySample,
}

/// Statistics about the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Number of tracker records.
    pub trackers: i64,
    /// Number of samples across all records.
    pub samples: i64,
    /// Oldest sample timestamp.
    pub oldest_sample: Option<DateTime<Utc>>,
    /// Newest sample timestamp.
    pub newest_sample: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
