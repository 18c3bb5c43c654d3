//! Error types for `marksight-core`.

use thiserror::Error;

/// Raised when a stored or user-supplied string does not name a known
/// domain value.
#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown exam type: {0:?}")]
  UnknownExamType(String),

  #[error("unknown term: {0:?}")]
  UnknownTerm(String),

  #[error("unknown gender: {0:?}")]
  UnknownGender(String),

  #[error("invalid academic year: {0:?}")]
  InvalidAcademicYear(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
