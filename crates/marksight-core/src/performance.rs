//! Model performance records, one per (subject, model generation).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Evaluation results for one subject of one trained generation.
///
/// For a given subject at most one record is active at any time. Activation
/// happens through [`crate::store::ScoreStore::activate_performance`], which
/// retires the previous active record in the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformanceRecord {
  pub record_id:          Uuid,
  pub model_name:         String,
  pub model_version:      String,
  pub subject:            String,
  /// `1 - MAE / 100`; may be negative for a pathological model.
  pub accuracy:           f64,
  pub mae:                f64,
  pub rmse:               f64,
  pub training_samples:   usize,
  pub validation_samples: usize,
  pub hyperparameters:    serde_json::Value,
  pub feature_importance: BTreeMap<String, f64>,
  pub trained_at:         DateTime<Utc>,
  pub is_active:          bool,
}

/// Input to [`crate::store::ScoreStore::activate_performance`].
/// `record_id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPerformanceRecord {
  pub model_name:         String,
  pub model_version:      String,
  pub subject:            String,
  pub accuracy:           f64,
  pub mae:                f64,
  pub rmse:               f64,
  pub training_samples:   usize,
  pub validation_samples: usize,
  pub hyperparameters:    serde_json::Value,
  pub feature_importance: BTreeMap<String, f64>,
  pub trained_at:         DateTime<Utc>,
}

impl NewPerformanceRecord {
  /// The active record this input becomes once stored under `record_id`.
  pub fn into_active(self, record_id: Uuid) -> ModelPerformanceRecord {
    ModelPerformanceRecord {
      record_id,
      model_name: self.model_name,
      model_version: self.model_version,
      subject: self.subject,
      accuracy: self.accuracy,
      mae: self.mae,
      rmse: self.rmse,
      training_samples: self.training_samples,
      validation_samples: self.validation_samples,
      hyperparameters: self.hyperparameters,
      feature_importance: self.feature_importance,
      trained_at: self.trained_at,
      is_active: true,
    }
  }
}
