//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that they
//! sort lexically. Exam dates are `YYYY-MM-DD`. Enumerations use their
//! snake_case string forms. Structured fields are compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use marksight_core::{
  performance::ModelPerformanceRecord,
  prediction::Prediction,
  student::{AcademicRecord, ExamType, Gender, StudentProfile, Term},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_count(v: i64) -> usize { usize::try_from(v).unwrap_or(0) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `students` row.
pub struct RawStudent {
  pub student_id:    String,
  pub current_class: i64,
  pub gender:        String,
  pub school_code:   Option<String>,
  pub academic_year: String,
}

impl RawStudent {
  pub fn into_profile(self) -> Result<StudentProfile> {
    let current_class = u8::try_from(self.current_class)
      .map_err(|_| Error::InvalidClass(self.current_class))?;
    Ok(StudentProfile {
      student_id: decode_uuid(&self.student_id)?,
      current_class,
      gender: Gender::parse(&self.gender)?,
      school_code: self.school_code,
      academic_year: self.academic_year,
    })
  }
}

/// Raw values read directly from an `academic_records` row.
pub struct RawRecord {
  pub record_id:     String,
  pub student_id:    String,
  pub subject:       String,
  pub score:         f64,
  pub max_score:     f64,
  pub exam_type:     String,
  pub exam_date:     String,
  pub academic_year: String,
  pub term:          String,
}

impl RawRecord {
  pub fn into_record(self) -> Result<AcademicRecord> {
    Ok(AcademicRecord {
      record_id:     decode_uuid(&self.record_id)?,
      student_id:    decode_uuid(&self.student_id)?,
      subject:       self.subject,
      score:         self.score,
      max_score:     self.max_score,
      exam_type:     ExamType::parse(&self.exam_type)?,
      exam_date:     decode_date(&self.exam_date)?,
      academic_year: self.academic_year,
      term:          Term::parse(&self.term)?,
    })
  }
}

pub const PREDICTION_COLUMNS: &str = "prediction_id, student_id, subject, \
  predicted_score, confidence, model_version, generated_at, actual_score";

/// Raw values read directly from a `predictions` row, in
/// [`PREDICTION_COLUMNS`] order.
pub struct RawPrediction {
  pub prediction_id:   String,
  pub student_id:      String,
  pub subject:         String,
  pub predicted_score: f64,
  pub confidence:      f64,
  pub model_version:   String,
  pub generated_at:    String,
  pub actual_score:    Option<f64>,
}

impl RawPrediction {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      prediction_id:   row.get(0)?,
      student_id:      row.get(1)?,
      subject:         row.get(2)?,
      predicted_score: row.get(3)?,
      confidence:      row.get(4)?,
      model_version:   row.get(5)?,
      generated_at:    row.get(6)?,
      actual_score:    row.get(7)?,
    })
  }

  pub fn into_prediction(self) -> Result<Prediction> {
    Ok(Prediction {
      prediction_id:   decode_uuid(&self.prediction_id)?,
      student_id:      decode_uuid(&self.student_id)?,
      subject:         self.subject,
      predicted_score: self.predicted_score,
      confidence:      self.confidence,
      model_version:   self.model_version,
      generated_at:    decode_dt(&self.generated_at)?,
      actual_score:    self.actual_score,
    })
  }
}

pub const PERFORMANCE_COLUMNS: &str = "record_id, model_name, model_version, \
  subject, accuracy, mae, rmse, training_samples, validation_samples, \
  hyperparameters, feature_importance, trained_at, is_active";

/// Raw values read directly from a `model_performance` row, in
/// [`PERFORMANCE_COLUMNS`] order.
pub struct RawPerformance {
  pub record_id:          String,
  pub model_name:         String,
  pub model_version:      String,
  pub subject:            String,
  pub accuracy:           f64,
  pub mae:                f64,
  pub rmse:               f64,
  pub training_samples:   i64,
  pub validation_samples: i64,
  pub hyperparameters:    String,
  pub feature_importance: String,
  pub trained_at:         String,
  pub is_active:          bool,
}

impl RawPerformance {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:          row.get(0)?,
      model_name:         row.get(1)?,
      model_version:      row.get(2)?,
      subject:            row.get(3)?,
      accuracy:           row.get(4)?,
      mae:                row.get(5)?,
      rmse:               row.get(6)?,
      training_samples:   row.get(7)?,
      validation_samples: row.get(8)?,
      hyperparameters:    row.get(9)?,
      feature_importance: row.get(10)?,
      trained_at:         row.get(11)?,
      is_active:          row.get(12)?,
    })
  }

  pub fn into_record(self) -> Result<ModelPerformanceRecord> {
    let feature_importance: BTreeMap<String, f64> =
      serde_json::from_str(&self.feature_importance)?;
    Ok(ModelPerformanceRecord {
      record_id: decode_uuid(&self.record_id)?,
      model_name: self.model_name,
      model_version: self.model_version,
      subject: self.subject,
      accuracy: self.accuracy,
      mae: self.mae,
      rmse: self.rmse,
      training_samples: decode_count(self.training_samples),
      validation_samples: decode_count(self.validation_samples),
      hyperparameters: serde_json::from_str(&self.hyperparameters)?,
      feature_importance,
      trained_at: decode_dt(&self.trained_at)?,
      is_active: self.is_active,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let a = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();
    let b = a + chrono::Duration::milliseconds(1);
    assert!(encode_dt(a) < encode_dt(b));
    assert_eq!(decode_dt(&encode_dt(a)).unwrap(), a);
  }

  #[test]
  fn dates_use_iso_form() {
    let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
    assert_eq!(encode_date(d), "2024-03-09");
    assert!(decode_date("09/03/2024").is_err());
  }
}
