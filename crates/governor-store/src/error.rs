//! Error types for the event store.
//!
//! [`StoreError::Locked`] is the only transient variant: another connection
//! currently holds the SQLite write lock and the operation can be retried
//! later without losing anything. Every other variant means the store cannot
//! be trusted and is fatal to the caller.

/// SQLite primary result code `SQLITE_BUSY`.
const SQLITE_BUSY: i32 = 5;

/// SQLite primary result code `SQLITE_LOCKED`.
const SQLITE_LOCKED: i32 = 6;

/// Errors that can occur in the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer holds the lock. Retry later.
    #[error("event store is locked: {0}")]
    Locked(String),

    /// The backing file could not be opened or created.
    #[error("event store unavailable at {path}: {reason}")]
    Unavailable {
        /// Location of the backing file.
        path: String,
        /// Description of the failure.
        reason: String,
    },

    /// Any other SQLite failure (I/O error, disk full, corruption, ...).
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// The schema could not be brought up to date.
    #[error("event store migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),

    /// An event could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded back into an event.
    #[error("corrupt event record {id}: {reason}")]
    Corrupt {
        /// Row id of the offending record.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// The store was used after [`close`](crate::EventStore::close).
    #[error("event store is closed")]
    Closed,
}

impl StoreError {
    /// Whether this error is the transient lock-contention condition.
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Locked(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if is_lock_code(db.code().as_deref()) => {
                Self::Locked(db.message().to_owned())
            }
            other => Self::Sqlite(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        match err {
            sqlx::migrate::MigrateError::Execute(inner)
            | sqlx::migrate::MigrateError::ExecuteMigration(inner, _) => Self::from(inner),
            other => Self::Migration(other),
        }
    }
}

/// Classify an SQLite result code (primary or extended) as lock contention.
///
/// Extended codes carry the primary code in their low byte, so
/// `SQLITE_BUSY_SNAPSHOT` (517) and friends count as busy too.
fn is_lock_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}
