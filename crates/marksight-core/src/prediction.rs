//! Prediction records produced by the prediction service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored prediction. Written once at inference time; `actual_score` may be
/// filled in exactly once afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub prediction_id:   Uuid,
  pub student_id:      Uuid,
  pub subject:         String,
  /// 0–100.
  pub predicted_score: f64,
  /// 0.0–1.0.
  pub confidence:      f64,
  pub model_version:   String,
  pub generated_at:    DateTime<Utc>,
  pub actual_score:    Option<f64>,
}

impl Prediction {
  /// `1 - |predicted - actual| / 100`, once the actual score is known.
  /// Always derived, never stored.
  pub fn accuracy(&self) -> Option<f64> {
    self
      .actual_score
      .map(|actual| prediction_accuracy(self.predicted_score, actual))
  }
}

pub fn prediction_accuracy(predicted: f64, actual: f64) -> f64 {
  1.0 - (predicted - actual).abs() / 100.0
}

/// Input to [`crate::store::ScoreStore::record_predictions`].
/// `prediction_id` and `generated_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPrediction {
  pub student_id:      Uuid,
  pub subject:         String,
  pub predicted_score: f64,
  pub confidence:      f64,
  pub model_version:   String,
}

/// Result of backfilling an actual score.
#[derive(Debug, Clone, PartialEq)]
pub enum ActualUpdate {
  Recorded(Prediction),
  /// The prediction already carried an actual score; it is returned
  /// unchanged.
  AlreadyRecorded(Prediction),
  NotFound,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accuracy_is_derived_from_actual() {
    let mut p = Prediction {
      prediction_id:   Uuid::nil(),
      student_id:      Uuid::nil(),
      subject:         "English".into(),
      predicted_score: 78.0,
      confidence:      0.8,
      model_version:   "v1".into(),
      generated_at:    Utc::now(),
      actual_score:    None,
    };
    assert_eq!(p.accuracy(), None);

    p.actual_score = Some(70.0);
    let acc = p.accuracy().unwrap();
    assert!((acc - 0.92).abs() < 1e-9);
  }
}
