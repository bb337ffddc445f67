//! SQLite-backed append/drain event buffer.
//!
//! Each [`append`](EventStore::append) is a single autocommitted `INSERT`,
//! so every event is either fully recorded or not recorded at all. The
//! database runs in WAL mode with `synchronous = FULL`: once `append`
//! returns, the event survives a crash of the broker process or the host.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! so no database is needed at build time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor_types::{Event, EventName, EventPayload};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, warn};

use crate::error::StoreError;

/// File name of the event store below the storage root.
pub const DEFAULT_FILE_NAME: &str = "gs_db";

/// Default time SQLite waits on a held lock before reporting `SQLITE_BUSY`.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Embedded schema migrations.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Where the event store lives and how long to wait on a held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Storage root directory.
    pub root: PathBuf,
    /// File name below `root`.
    pub file_name: String,
    /// How long an operation waits for a competing writer before failing
    /// with [`StoreError::Locked`].
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Configuration for the default store file under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_name: DEFAULT_FILE_NAME.to_owned(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    /// Set the lock wait.
    #[must_use]
    pub const fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Full path of the store file.
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.file_name)
    }
}

/// An event as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Row id. Strictly increasing in append order.
    pub id: i64,
    /// The recorded event.
    pub event: Event,
    /// When the event was appended.
    pub recorded_at: DateTime<Utc>,
}

/// A row from the `events` table.
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    event_name: String,
    event_data: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let name: EventName =
            serde_json::from_value(serde_json::Value::String(row.event_name.clone())).map_err(
                |e| StoreError::Corrupt {
                    id: row.id,
                    reason: format!("unknown event name {:?}: {e}", row.event_name),
                },
            )?;
        let payload: EventPayload =
            serde_json::from_str(&row.event_data).map_err(|e| StoreError::Corrupt {
                id: row.id,
                reason: format!("invalid event data: {e}"),
            })?;
        Ok(Self {
            id: row.id,
            event: Event::new(name, payload.unit_name),
            recorded_at: row.recorded_at,
        })
    }
}

/// Handle on the event store file.
///
/// Holds a single SQLite connection until [`close`](Self::close) is called
/// or the handle is dropped. Concurrent writers (another broker, or the
/// governor draining events) are arbitrated by SQLite's lock; losing that
/// race surfaces as [`StoreError::Locked`].
#[derive(Debug)]
pub struct EventStore {
    conn: Option<SqliteConnection>,
    path: PathBuf,
}

impl EventStore {
    /// Open or create the event store described by `config`.
    ///
    /// Creates the file if missing and applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another writer holds the lock for
    /// longer than the busy timeout, [`StoreError::Unavailable`] if the file
    /// cannot be opened or created, and [`StoreError::Migration`] if the
    /// schema cannot be applied.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let path = config.path();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(config.busy_timeout);

        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Sqlite(inner) => StoreError::Unavailable {
                    path: path.display().to_string(),
                    reason: inner.to_string(),
                },
                other => other,
            })?;

        if let Err(e) = MIGRATOR.run(&mut conn).await {
            close_quietly(conn).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), "event store opened");
        Ok(Self {
            conn: Some(conn),
            path,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`close`](Self::close) has not been called yet.
    pub const fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Durably append one event. Returns the row id assigned to it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another writer holds the lock (the
    /// event was not recorded and may be retried), [`StoreError::Closed`]
    /// after `close`, and [`StoreError::Sqlite`] for any other failure.
    pub async fn append(&mut self, event: &Event) -> Result<i64, StoreError> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let data = serde_json::to_string(event.payload())?;

        let result = sqlx::query(
            "INSERT INTO events (event_name, event_data, recorded_at) VALUES (?1, ?2, ?3)",
        )
        .bind(event.name().as_str())
        .bind(data)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, event = %event, "event appended");
        Ok(id)
    }

    /// Remove and return every stored event, oldest first.
    ///
    /// Reading and deleting happen in one immediate transaction, so an event
    /// is returned by exactly one drain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another writer holds the lock,
    /// [`StoreError::Corrupt`] if a row cannot be decoded (nothing is
    /// deleted in that case), and [`StoreError::Sqlite`] otherwise.
    pub async fn drain(&mut self) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let drained = match drain_in_transaction(conn).await {
            Ok(events) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| events)
                .map_err(StoreError::from),
            Err(e) => Err(e),
        };

        match drained {
            Ok(events) => {
                debug!(count = events.len(), "events drained");
                Ok(events)
            }
            Err(e) => {
                // The transaction may still be open, holding the write lock.
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(error = %rollback, "failed to roll back drain");
                }
                Err(e)
            }
        }
    }

    /// Release the connection and with it any lock. Idempotent.
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            close_quietly(conn).await;
            debug!(path = %self.path.display(), "event store closed");
        }
    }
}

/// Body of [`EventStore::drain`], run inside `BEGIN IMMEDIATE`.
async fn drain_in_transaction(
    conn: &mut SqliteConnection,
) -> Result<Vec<StoredEvent>, StoreError> {
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, event_name, event_data, recorded_at FROM events ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;

    let events = rows
        .into_iter()
        .map(StoredEvent::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(last) = events.last() {
        sqlx::query("DELETE FROM events WHERE id <= ?1")
            .bind(last.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(events)
}

/// Close a connection, logging instead of failing.
async fn close_quietly(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "error while closing event store connection");
    }
}
