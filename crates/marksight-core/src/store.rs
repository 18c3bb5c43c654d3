//! The `ScoreStore` trait: the persistence collaborator of the engine.
//!
//! The trait is implemented by storage backends (e.g.
//! `marksight-store-sqlite`). The training pipeline and the prediction service
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  performance::{ModelPerformanceRecord, NewPerformanceRecord},
  prediction::{ActualUpdate, NewPrediction, Prediction},
  student::StudentHistory,
};

/// Abstraction over the engine's persistence backend.
///
/// Student profiles and academic records are read-only from the engine's
/// point of view. Predictions are append-only apart from a single
/// actual-score backfill. Performance records are never deleted; they are
/// retired by clearing their active flag.
///
/// All methods return `Send` futures so the trait can be used from spawned
/// tokio tasks.
pub trait ScoreStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Students & records ────────────────────────────────────────────────

  /// Every student with their full, date-ordered record history.
  fn list_histories(
    &self,
  ) -> impl Future<Output = Result<Vec<StudentHistory>, Self::Error>> + Send + '_;

  /// One student's history. Returns `None` if the student does not exist.
  fn get_history(
    &self,
    student_id: Uuid,
  ) -> impl Future<Output = Result<Option<StudentHistory>, Self::Error>> + Send + '_;

  /// Subjects with at least one board-exam record, sorted by name.
  fn board_subjects(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  // ── Predictions ───────────────────────────────────────────────────────

  /// Persist a batch of predictions in one transaction. `generated_at` is set
  /// by the store and shared by the whole batch.
  fn record_predictions(
    &self,
    predictions: Vec<NewPrediction>,
  ) -> impl Future<Output = Result<Vec<Prediction>, Self::Error>> + Send + '_;

  /// A student's predictions, most recent first, optionally for one subject.
  fn prediction_history(
    &self,
    student_id: Uuid,
    subject: Option<String>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Prediction>, Self::Error>> + Send + '_;

  /// Backfill the actual score of a prediction. The score can be set once;
  /// later calls leave the stored value untouched.
  fn record_actual(
    &self,
    prediction_id: Uuid,
    actual_score: f64,
  ) -> impl Future<Output = Result<ActualUpdate, Self::Error>> + Send + '_;

  // ── Model performance ─────────────────────────────────────────────────

  /// Insert the given records as active, retiring any previously active
  /// record for the same subjects. All-or-nothing: readers observe either the
  /// old active set or the new one.
  fn activate_performance(
    &self,
    records: Vec<NewPerformanceRecord>,
  ) -> impl Future<Output = Result<Vec<ModelPerformanceRecord>, Self::Error>>
  + Send
  + '_;

  /// Active records, optionally restricted to one subject, sorted by subject.
  fn active_performance(
    &self,
    subject: Option<String>,
  ) -> impl Future<Output = Result<Vec<ModelPerformanceRecord>, Self::Error>>
  + Send
  + '_;

  /// The most recently trained active record across all subjects.
  fn latest_active_performance(
    &self,
  ) -> impl Future<Output = Result<Option<ModelPerformanceRecord>, Self::Error>>
  + Send
  + '_;

  /// Every record for a subject, active or retired, newest first.
  fn performance_history(
    &self,
    subject: String,
  ) -> impl Future<Output = Result<Vec<ModelPerformanceRecord>, Self::Error>>
  + Send
  + '_;
}
