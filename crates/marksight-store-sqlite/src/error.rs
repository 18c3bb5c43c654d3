//! Error type for `marksight-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] marksight_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("student not found: {0}")]
  StudentNotFound(uuid::Uuid),

  #[error("class level {0} is outside 9..=12")]
  InvalidClass(i64),

  /// Two records in one activation batch name the same subject.
  #[error("subject {0:?} appears twice in one activation")]
  DuplicateSubject(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
