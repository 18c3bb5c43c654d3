//! Serving predictions from the active model generation.
//!
//! The service holds the generation behind an `RwLock<Option<Arc<_>>>`:
//! requests clone the `Arc` and work on an immutable snapshot, and
//! [`PredictionService::reload`] swaps in a freshly loaded generation
//! wholesale.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use marksight_core::{
  curriculum,
  grade::Grade,
  performance::ModelPerformanceRecord,
  prediction::{ActualUpdate, NewPrediction, Prediction},
  store::ScoreStore,
};
use marksight_ml::ModelGeneration;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  clock::Clock,
  insights::{self, SubjectInsights},
};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubjectPrediction {
  Predicted {
    score:              f64,
    confidence:         f64,
    grade:              Grade,
    /// Points still missing to the target percentage; zero once reached.
    improvement_needed: f64,
    prediction_id:      Uuid,
  },
  /// No trained model covers the subject.
  Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentPrediction {
  pub student_id:    Uuid,
  /// `None` when no model is loaded.
  pub model_version: Option<String>,
  pub generated_at:  DateTime<Utc>,
  pub subjects:      BTreeMap<String, SubjectPrediction>,
}

/// A stored prediction with its accuracy, once the actual score is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
  #[serde(flatten)]
  pub prediction: Prediction,
  pub accuracy:   Option<f64>,
}

impl From<Prediction> for HistoryEntry {
  fn from(prediction: Prediction) -> Self {
    let accuracy = prediction.accuracy();
    Self { prediction, accuracy }
  }
}

pub struct PredictionService<S> {
  store:      Arc<S>,
  model_path: PathBuf,
  clock:      Arc<dyn Clock>,
  generation: RwLock<Option<Arc<ModelGeneration>>>,
}

impl<S: ScoreStore> PredictionService<S> {
  /// Build the service and load the artifact at `model_path`. A missing or
  /// unreadable artifact leaves the service without a model.
  pub async fn load(store: Arc<S>, model_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
    let generation = match read_generation(model_path.clone()).await {
      Ok(Some(g)) => {
        info!(version = %g.model_version, "model loaded");
        Some(Arc::new(g))
      }
      Ok(None) => {
        warn!(path = ?model_path, "no trained model found");
        None
      }
      Err(e) => {
        warn!(path = ?model_path, error = %e, "model could not be loaded");
        None
      }
    };
    Self { store, model_path, clock, generation: RwLock::new(generation) }
  }

  /// Re-read the artifact and serve it. On error, or when the file has gone
  /// away, the current generation keeps serving. Returns the version now
  /// being served.
  pub async fn reload(&self) -> Result<Option<String>> {
    match read_generation(self.model_path.clone()).await? {
      Some(g) => {
        let version = g.model_version.clone();
        *self.generation.write().await = Some(Arc::new(g));
        info!(%version, "model reloaded");
        Ok(Some(version))
      }
      None => {
        warn!(path = ?self.model_path, "no model to reload");
        Ok(self.model_version().await)
      }
    }
  }

  pub async fn model_version(&self) -> Option<String> {
    self.current().await.map(|g| g.model_version.clone())
  }

  async fn current(&self) -> Option<Arc<ModelGeneration>> { self.generation.read().await.clone() }

  /// Predict the requested subjects (all curriculum subjects when `None`)
  /// and persist every prediction made.
  pub async fn predict(
    &self,
    student_id: Uuid,
    subjects: Option<Vec<String>>,
  ) -> Result<StudentPrediction> {
    let history = self
      .store
      .get_history(student_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::StudentNotFound(student_id))?;
    let subjects = subjects
      .unwrap_or_else(|| curriculum::SUBJECTS.iter().map(|s| (*s).to_owned()).collect());
    let now = self.clock.now();

    let Some(generation) = self.current().await else {
      warn!(%student_id, "prediction requested but no model is loaded");
      return Ok(StudentPrediction {
        student_id,
        model_version: None,
        generated_at: now,
        subjects: subjects
          .into_iter()
          .map(|s| (s, SubjectPrediction::Unavailable))
          .collect(),
      });
    };

    let features = generation
      .engineer()
      .with_reference_date(now.date_naive())
      .extract(&history.profile, &history.records)?;

    let mut scored = Vec::new();
    let mut out = BTreeMap::new();
    for subject in subjects {
      match generation.ensemble.predict_subject(&subject, features.values())? {
        Some((score, confidence)) => scored.push((subject, score, confidence)),
        None => {
          warn!(%student_id, %subject, "no model for subject");
          out.insert(subject, SubjectPrediction::Unavailable);
        }
      }
    }

    let batch = scored
      .iter()
      .map(|(subject, score, confidence)| NewPrediction {
        student_id,
        subject: subject.clone(),
        predicted_score: *score,
        confidence: *confidence,
        model_version: generation.model_version.clone(),
      })
      .collect();
    let stored = if scored.is_empty() {
      Vec::new()
    } else {
      self.store.record_predictions(batch).await.map_err(Error::store)?
    };

    let mut generated_at = now;
    for ((subject, score, confidence), p) in scored.into_iter().zip(stored) {
      generated_at = p.generated_at;
      out.insert(subject, SubjectPrediction::Predicted {
        score,
        confidence,
        grade: Grade::from_score(score),
        improvement_needed: (curriculum::TARGET_PERCENTAGE - score).max(0.0),
        prediction_id: p.prediction_id,
      });
    }

    Ok(StudentPrediction {
      student_id,
      model_version: Some(generation.model_version.clone()),
      generated_at,
      subjects: out,
    })
  }

  /// Most recent first; `limit` defaults to 50.
  pub async fn prediction_history(
    &self,
    student_id: Uuid,
    subject: Option<String>,
    limit: Option<usize>,
  ) -> Result<Vec<HistoryEntry>> {
    let predictions = self
      .store
      .prediction_history(student_id, subject, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
      .await
      .map_err(Error::store)?;
    Ok(predictions.into_iter().map(HistoryEntry::from).collect())
  }

  /// Backfill the actual score of a prediction. Only the first call counts.
  pub async fn record_actual(&self, prediction_id: Uuid, actual_score: f64) -> Result<HistoryEntry> {
    if !(0.0..=100.0).contains(&actual_score) {
      return Err(Error::InvalidScore(actual_score));
    }
    match self
      .store
      .record_actual(prediction_id, actual_score)
      .await
      .map_err(Error::store)?
    {
      ActualUpdate::Recorded(p) => {
        info!(%prediction_id, accuracy = ?p.accuracy(), "actual score recorded");
        Ok(p.into())
      }
      ActualUpdate::AlreadyRecorded(_) => Err(Error::AlreadyRecorded(prediction_id)),
      ActualUpdate::NotFound => Err(Error::PredictionNotFound(prediction_id)),
    }
  }

  /// Active performance snapshots, optionally for one subject.
  pub async fn model_performance(
    &self,
    subject: Option<String>,
  ) -> Result<Vec<ModelPerformanceRecord>> {
    self.store.active_performance(subject).await.map_err(Error::store)
  }

  pub async fn subject_insights(&self, student_id: Uuid, subject: &str) -> Result<SubjectInsights> {
    let history = self
      .store
      .get_history(student_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::StudentNotFound(student_id))?;
    insights::subject_insights(subject, &history.records).ok_or_else(|| Error::NoRecords {
      student_id,
      subject: subject.to_owned(),
    })
  }
}

async fn read_generation(path: PathBuf) -> Result<Option<ModelGeneration>> {
  Ok(tokio::task::spawn_blocking(move || ModelGeneration::load(&path)).await??)
}
