//! Error types for `marksight-engine`.

use thiserror::Error;
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] BoxError),

  #[error("model error: {0}")]
  Model(#[from] marksight_ml::Error),

  #[error("feature extraction failed: {0}")]
  Feature(#[from] marksight_ml::FeatureError),

  #[error("student not found: {0}")]
  StudentNotFound(Uuid),

  #[error("prediction not found: {0}")]
  PredictionNotFound(Uuid),

  #[error("prediction {0} already has an actual score")]
  AlreadyRecorded(Uuid),

  #[error("score {0} is outside 0..=100")]
  InvalidScore(f64),

  #[error("no {subject} records for student {student_id}")]
  NoRecords { student_id: Uuid, subject: String },

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  /// Wrap a backend-specific store error.
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
