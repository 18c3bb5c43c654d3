//! When to retrain.

use chrono::{DateTime, Utc};
use marksight_core::performance::ModelPerformanceRecord;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetrainDecision {
  NoActiveModel,
  AccuracyBelowThreshold { accuracy: f64, threshold: f64 },
  Stale { age_days: i64, max_age_days: i64 },
  UpToDate,
}

impl RetrainDecision {
  pub fn needs_retrain(self) -> bool { !matches!(self, Self::UpToDate) }
}

/// Decide from the most recently trained active performance record.
///
/// Retrain when there is no record, when its accuracy is under `threshold`,
/// or when more than `max_age_days` whole days have passed since it was
/// trained.
pub fn retrain_decision(
  latest: Option<&ModelPerformanceRecord>,
  now: DateTime<Utc>,
  threshold: f64,
  max_age_days: i64,
) -> RetrainDecision {
  let Some(latest) = latest else {
    return RetrainDecision::NoActiveModel;
  };
  if latest.accuracy < threshold {
    return RetrainDecision::AccuracyBelowThreshold { accuracy: latest.accuracy, threshold };
  }
  let age_days = (now - latest.trained_at).num_days();
  if age_days > max_age_days {
    return RetrainDecision::Stale { age_days, max_age_days };
  }
  RetrainDecision::UpToDate
}
