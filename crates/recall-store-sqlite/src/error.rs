//! Error type for `recall-store-sqlite`.

use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] recall_core::Error),

  #[error("journal error: {0}")]
  Journal(#[from] recall_journal::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("blocking task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  /// The advisory lock stayed held by someone else for the whole TTL.
  #[error("lock {name:?} not acquired within {waited:?}")]
  LockTimeout { name: String, waited: Duration },

  /// The lease expired and was reclaimed by another owner before the
  /// guarded write committed.
  #[error("lock {name:?} lost before commit")]
  LockLost { name: String },

  /// Both search paths failed.
  #[error("search failed for {query:?}: {source}")]
  SearchFailed {
    query:  String,
    #[source]
    source: Box<Error>,
  },
}

impl Error {
  /// SQLite reported the database busy or locked; worth retrying.
  pub fn is_busy(&self) -> bool {
    match self {
      Error::Database(tokio_rusqlite::Error::Rusqlite(e)) => is_busy(e),
      _ => false,
    }
  }
}

pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
  matches!(
    err.sqlite_error_code(),
    Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
  )
}

pub(crate) fn is_constraint(err: &rusqlite::Error) -> bool {
  err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
