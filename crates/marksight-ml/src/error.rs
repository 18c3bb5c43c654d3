//! Error types for `marksight-ml`.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::family::ModelFamily;

/// A student's inputs could not be turned into a feature vector. The student
/// is skipped; the rest of the batch continues.
#[derive(Debug, Error)]
pub enum FeatureError {
  #[error("record {record_id} has non-positive max score {max_score}")]
  NonPositiveMaxScore { record_id: Uuid, max_score: f64 },

  #[error("record {record_id} has invalid score {score}")]
  InvalidScore { record_id: Uuid, score: f64 },

  #[error("invalid profile: {0}")]
  Profile(#[from] marksight_core::Error),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("feature extraction failed: {0}")]
  Feature(#[from] FeatureError),

  #[error("unknown model family: {0:?}")]
  UnknownFamily(String),

  #[error("{family} training failed: {reason}")]
  Training { family: ModelFamily, reason: String },

  #[error("expected {expected} features, got {found}")]
  ShapeMismatch { expected: usize, found: usize },

  #[error("feature layout of the input does not match the trained layout")]
  LayoutMismatch,

  #[error("artifact {path:?} failed its checksum")]
  ChecksumMismatch { path: PathBuf },

  #[error("artifact format version {0} is not supported")]
  UnsupportedFormat(u32),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("shape error: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

impl Error {
  pub(crate) fn training(family: ModelFamily, reason: impl Into<String>) -> Self {
    Self::Training { family, reason: reason.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
