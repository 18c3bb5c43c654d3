//! The training pipeline: labelled histories in, a persisted model generation
//! and activated performance records out.
//!
//! A run walks `Idle → PreparingData → Training → Evaluating → Persisting →
//! Idle`. Any failure moves it to `Failed`, which stays visible until the next
//! run starts. Nothing is persisted by a run that fails before `Persisting`,
//! and the previously active generation keeps serving throughout. A run whose
//! records cannot be activated rolls `current.json` back.

use std::{
  collections::{BTreeMap, btree_map::Entry},
  io::ErrorKind,
  path::PathBuf,
  sync::Arc,
};

use chrono::{DateTime, NaiveDate, Utc};
use marksight_core::{
  curriculum,
  performance::{ModelPerformanceRecord, NewPerformanceRecord},
  store::ScoreStore,
  student::LabelledHistory,
};
use marksight_ml::{
  FeatureEngineer, FeatureLayout, ModelEnsemble, ModelGeneration,
  artifact::{self, MODEL_NAME},
  ensemble::{FamilyFailure, SubjectDataset},
  metrics::RegressionMetrics,
};
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
  Error, Result,
  clock::Clock,
  config::{Settings, TrainingSettings},
  retrain::{self, RetrainDecision},
  scheduler::TrainingJob,
  synthetic::{SyntheticGenerator, SyntheticSource},
};

// ─── Run vocabulary ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineState {
  Idle,
  PreparingData,
  Training,
  Evaluating,
  Persisting,
  Failed,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
  /// The scheduler's check when it starts.
  Startup,
  /// Daily slot. Skipped when the active model is still good.
  Daily,
  /// Weekly full retrain.
  Weekly,
  Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
  Success,
  Failed,
  Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeReason {
  InsufficientData,
  UpToDate,
  StoreUnavailable,
  TrainingFailed,
  PersistenceFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSubject {
  pub subject: String,
  /// Rows with a non-zero target for the subject.
  pub samples: usize,
  pub reason:  String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectEvaluation {
  pub subject:          String,
  #[serde(flatten)]
  pub metrics:          RegressionMetrics,
  pub mean_confidence:  f64,
  pub training_samples: usize,
  /// Whether `metrics` were measured on rows the ensemble never saw.
  pub held_out:         bool,
}

/// Everything a run did, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
  pub status:             RunStatus,
  pub reason:             Option<OutcomeReason>,
  pub message:            Option<String>,
  pub trigger:            Trigger,
  pub model_version:      Option<String>,
  /// Feature rows the ensemble was trained and evaluated on.
  pub samples:            usize,
  pub real_students:      usize,
  pub synthetic_students: usize,
  /// Students dropped because their features could not be extracted.
  pub rejected_students:  usize,
  pub subjects:           Vec<String>,
  /// Subjects this run did not train that keep serving from the previous
  /// generation.
  pub carried_forward:    Vec<String>,
  pub skipped:            Vec<SkippedSubject>,
  pub failures:           Vec<FamilyFailure>,
  pub evaluations:        Vec<SubjectEvaluation>,
  pub started_at:         DateTime<Utc>,
  pub finished_at:        DateTime<Utc>,
}

impl TrainingOutcome {
  pub(crate) fn started(trigger: Trigger, at: DateTime<Utc>) -> Self {
    Self {
      status: RunStatus::Failed,
      reason: None,
      message: None,
      trigger,
      model_version: None,
      samples: 0,
      real_students: 0,
      synthetic_students: 0,
      rejected_students: 0,
      subjects: Vec::new(),
      carried_forward: Vec::new(),
      skipped: Vec::new(),
      failures: Vec::new(),
      evaluations: Vec::new(),
      started_at: at,
      finished_at: at,
    }
  }

  pub fn is_success(&self) -> bool { self.status == RunStatus::Success }
}

/// Why a run stopped early.
#[derive(Debug)]
struct RunFailure {
  reason:  OutcomeReason,
  message: String,
}

impl RunFailure {
  fn new(reason: OutcomeReason, message: impl ToString) -> Self {
    Self { reason, message: message.to_string() }
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct TrainingPipeline<S> {
  store:     Arc<S>,
  settings:  Settings,
  clock:     Arc<dyn Clock>,
  synthetic: Arc<dyn SyntheticSource>,
  state:     watch::Sender<PipelineState>,
}

impl<S: ScoreStore + 'static> TrainingPipeline<S> {
  pub fn new(store: Arc<S>, settings: Settings, clock: Arc<dyn Clock>) -> Self {
    let synthetic = Arc::new(SyntheticGenerator::new(
      settings.training.random_seed,
      settings.training.synthetic_years,
    ));
    let (state, _) = watch::channel(PipelineState::Idle);
    Self { store, settings, clock, synthetic, state }
  }

  /// Replace the synthetic data source.
  pub fn with_synthetic(mut self, source: Arc<dyn SyntheticSource>) -> Self {
    self.synthetic = source;
    self
  }

  pub fn settings(&self) -> &Settings { &self.settings }

  pub fn state(&self) -> PipelineState { *self.state.borrow() }

  /// Observe state transitions.
  pub fn subscribe(&self) -> watch::Receiver<PipelineState> { self.state.subscribe() }

  fn set_state(&self, state: PipelineState) {
    self.state.send_replace(state);
  }

  /// Why (or why not) the active model should be replaced, judged from the
  /// most recently trained active performance record.
  pub async fn retrain_decision(&self) -> Result<RetrainDecision> {
    let latest = self
      .store
      .latest_active_performance()
      .await
      .map_err(Error::store)?;
    let t = &self.settings.training;
    Ok(retrain::retrain_decision(
      latest.as_ref(),
      self.clock.now(),
      t.retrain_accuracy_threshold,
      t.max_model_age_days,
    ))
  }

  pub async fn should_retrain(&self) -> Result<bool> {
    Ok(self.retrain_decision().await?.needs_retrain())
  }

  /// Run the pipeline once. Never returns an error: failures are reported
  /// in the outcome.
  pub async fn run(&self, trigger: Trigger) -> TrainingOutcome {
    let mut outcome = TrainingOutcome::started(trigger, self.clock.now());

    if trigger == Trigger::Daily {
      match self.retrain_decision().await {
        Ok(RetrainDecision::UpToDate) => {
          info!(%trigger, "active model is up to date; skipping run");
          outcome.status = RunStatus::Skipped;
          outcome.reason = Some(OutcomeReason::UpToDate);
          outcome.finished_at = self.clock.now();
          return outcome;
        }
        Ok(decision) => info!(%trigger, ?decision, "retraining"),
        Err(e) => warn!(%trigger, error = %e, "retrain check failed; training anyway"),
      }
    }

    info!(%trigger, "training run started");
    match self.execute(&mut outcome).await {
      Ok(()) => {
        self.set_state(PipelineState::Idle);
        outcome.status = RunStatus::Success;
        info!(
          %trigger,
          version = outcome.model_version.as_deref().unwrap_or_default(),
          samples = outcome.samples,
          subjects = outcome.subjects.len(),
          "training run finished"
        );
      }
      Err(failure) => {
        self.set_state(PipelineState::Failed);
        error!(%trigger, reason = %failure.reason, message = %failure.message, "training run failed");
        outcome.status = RunStatus::Failed;
        outcome.reason = Some(failure.reason);
        outcome.message = Some(failure.message);
      }
    }
    outcome.finished_at = self.clock.now();
    outcome
  }

  async fn execute(&self, outcome: &mut TrainingOutcome) -> Result<(), RunFailure> {
    self.set_state(PipelineState::PreparingData);
    let prepared = Arc::new(self.prepare(outcome).await?);

    self.set_state(PipelineState::Training);
    let config = self.settings.model.clone();
    let data = prepared.clone();
    let training = tokio::task::spawn_blocking(move || {
      ModelEnsemble::train(&config, data.x.view(), data.layout.names(), &data.datasets)
    })
    .await
    .map_err(|e| RunFailure::new(OutcomeReason::TrainingFailed, e))?
    .map_err(|e| RunFailure::new(OutcomeReason::TrainingFailed, e))?;
    outcome.failures = training.failures;
    if training.ensemble.subjects.is_empty() {
      return Err(RunFailure::new(
        OutcomeReason::TrainingFailed,
        "every model family failed for every subject",
      ));
    }

    self.set_state(PipelineState::Evaluating);
    let ensemble = training.ensemble;
    let data = prepared.clone();
    let (ensemble, evaluations) = tokio::task::spawn_blocking(move || {
      let evaluations = evaluate(&ensemble, &data);
      evaluations.map(|e| (ensemble, e))
    })
    .await
    .map_err(|e| RunFailure::new(OutcomeReason::TrainingFailed, e))?
    .map_err(|e| RunFailure::new(OutcomeReason::TrainingFailed, e))?;
    outcome.subjects = evaluations.iter().map(|e| e.subject.clone()).collect();
    outcome.evaluations = evaluations;

    self.set_state(PipelineState::Persisting);
    let (version, carried) =
      self.persist(ensemble, prepared.layout.clone(), &outcome.evaluations).await?;
    outcome.model_version = Some(version);
    outcome.carried_forward = carried;
    Ok(())
  }

  async fn prepare(&self, outcome: &mut TrainingOutcome) -> Result<Prepared, RunFailure> {
    let t = self.settings.training.clone();
    let histories = self
      .store
      .list_histories()
      .await
      .map_err(|e| RunFailure::new(OutcomeReason::StoreUnavailable, e))?;
    let mut labelled: Vec<LabelledHistory> = histories
      .into_iter()
      .filter_map(LabelledHistory::from_board_records)
      .collect();
    outcome.real_students = labelled.len();

    let board_subjects = self
      .store
      .board_subjects()
      .await
      .map_err(|e| RunFailure::new(OutcomeReason::StoreUnavailable, e))?;
    for subject in board_subjects
      .iter()
      .filter(|s| !curriculum::is_curriculum_subject(s))
    {
      warn!(%subject, "board records outside the curriculum are not modelled");
    }
    info!(
      students = outcome.real_students,
      board_subjects = board_subjects.len(),
      "real training data loaded"
    );

    if t.use_synthetic || labelled.len() < t.min_training_samples {
      let source = self.synthetic.clone();
      let count = t.synthetic_students;
      let generated = tokio::task::spawn_blocking(move || source.generate(count))
        .await
        .map_err(|e| RunFailure::new(OutcomeReason::TrainingFailed, e))?;
      info!(requested = count, generated = generated.len(), "added synthetic students");
      outcome.synthetic_students = generated.len();
      labelled.extend(generated);
    }

    let today = self.clock.now().date_naive();
    let prepared = tokio::task::spawn_blocking(move || build_dataset(&labelled, today, &t))
      .await
      .map_err(|e| RunFailure::new(OutcomeReason::TrainingFailed, e))??;

    outcome.samples = prepared.x.nrows();
    outcome.rejected_students = prepared.rejected;
    outcome.skipped = prepared.skipped.clone();
    info!(
      samples = outcome.samples,
      subjects = prepared.datasets.len(),
      skipped = prepared.skipped.len(),
      "training data prepared"
    );
    Ok(prepared)
  }

  /// Archive the generation, make it the served generation, then activate
  /// its performance records. Subjects the run did not train keep the models
  /// of the generation being replaced, and their active records move to the
  /// new version. If activation fails the previous `current.json` is put
  /// back. Returns the new version and the carried subjects.
  async fn persist(
    &self,
    mut ensemble: ModelEnsemble,
    layout: FeatureLayout,
    evaluations: &[SubjectEvaluation],
  ) -> Result<(String, Vec<String>), RunFailure> {
    let now = self.clock.now();
    let version = model_version(now);
    let current_path = self.settings.current_model_path();

    let previous = read_artifact(current_path.clone()).await?;
    let carried = match previous.as_deref().map(|b| ModelGeneration::from_bytes(b, &current_path)) {
      Some(Ok(served)) if served.feature_names == layout => {
        carry_forward(&mut ensemble, served.ensemble)
      }
      Some(Ok(served)) => {
        warn!(served = %served.model_version, "feature layout changed; nothing carried forward");
        Vec::new()
      }
      Some(Err(e)) => {
        warn!(error = %e, "served generation unreadable; nothing carried forward");
        Vec::new()
      }
      None => Vec::new(),
    };

    let generation = ModelGeneration {
      model_name:    MODEL_NAME.to_owned(),
      model_version: version.clone(),
      created_at:    now,
      feature_names: layout,
      ensemble,
    };
    let mut records = performance_records(&generation, evaluations, now);
    if !carried.is_empty() {
      let active = self
        .store
        .active_performance(None)
        .await
        .map_err(|e| RunFailure::new(OutcomeReason::PersistenceFailed, e))?;
      records.extend(
        active
          .into_iter()
          .filter(|r| carried.contains(&r.subject))
          .map(|r| reissue(r, &version)),
      );
      info!(subjects = ?carried, "carried forward from the served generation");
    }
    let generation = Arc::new(generation);

    write_artifact(generation.clone(), self.settings.generation_path(&version)).await?;
    write_artifact(generation, current_path.clone()).await?;
    if let Err(e) = self.store.activate_performance(records).await {
      restore_artifact(current_path, previous).await;
      return Err(RunFailure::new(OutcomeReason::PersistenceFailed, e));
    }
    Ok((version, carried))
  }
}

impl<S: ScoreStore + 'static> TrainingJob for TrainingPipeline<S> {
  async fn should_retrain(&self) -> Result<bool> { TrainingPipeline::should_retrain(self).await }

  async fn run(&self, trigger: Trigger) -> TrainingOutcome { TrainingPipeline::run(self, trigger).await }
}

// ─── Stages ──────────────────────────────────────────────────────────────────

struct Prepared {
  x:        Array2<f64>,
  layout:   FeatureLayout,
  datasets: Vec<SubjectDataset>,
  skipped:  Vec<SkippedSubject>,
  rejected: usize,
}

/// `v{YYYYmmdd_HHMMSS_mmm}`.
pub fn model_version(at: DateTime<Utc>) -> String { at.format("v%Y%m%d_%H%M%S_%3f").to_string() }

fn build_dataset(
  labelled: &[LabelledHistory],
  today: NaiveDate,
  t: &TrainingSettings,
) -> Result<Prepared, RunFailure> {
  let engineer = FeatureEngineer::new().with_reference_date(today);
  let layout = engineer.freeze().clone();

  let mut values = Vec::with_capacity(labelled.len() * layout.len());
  let mut row_targets: Vec<&BTreeMap<String, f64>> = Vec::with_capacity(labelled.len());
  let mut rejected = 0;
  for item in labelled {
    let profile = &item.history.profile;
    match engineer.extract(profile, &item.history.records) {
      Ok(v) => {
        values.extend_from_slice(v.values());
        row_targets.push(&item.targets);
      }
      Err(e) => {
        rejected += 1;
        warn!(student_id = %profile.student_id, error = %e, "skipping student");
      }
    }
  }

  let n = row_targets.len();
  if n < t.min_training_samples {
    return Err(RunFailure::new(
      OutcomeReason::InsufficientData,
      format!("{n} training samples, at least {} required", t.min_training_samples),
    ));
  }
  let x = Array2::from_shape_vec((n, layout.len()), values)
    .map_err(|e| RunFailure::new(OutcomeReason::TrainingFailed, e))?;
  let held_out = validation_mask(n, t.validation_fraction, t.random_seed);

  let mut datasets = Vec::new();
  let mut skipped = Vec::new();
  for subject in curriculum::SUBJECTS {
    let targets: Vec<f64> = row_targets
      .iter()
      .map(|m| m.get(subject).copied().unwrap_or(0.0))
      .collect();
    let rows: Vec<usize> = (0..n).filter(|&r| targets[r] != 0.0).collect();
    if rows.len() < t.min_subject_samples {
      info!(subject, samples = rows.len(), "not enough samples; subject skipped");
      skipped.push(SkippedSubject {
        subject: subject.to_owned(),
        samples: rows.len(),
        reason:  format!("at least {} samples required", t.min_subject_samples),
      });
      continue;
    }
    let samples = rows.len();
    let (validation_rows, train_rows): (Vec<usize>, Vec<usize>) =
      rows.into_iter().partition(|&r| held_out[r]);
    if train_rows.is_empty() {
      skipped.push(SkippedSubject {
        subject: subject.to_owned(),
        samples,
        reason: "every sample fell into the validation split".into(),
      });
      continue;
    }
    datasets.push(SubjectDataset {
      subject: subject.to_owned(),
      train_rows,
      validation_rows,
      targets,
    });
  }

  if datasets.is_empty() {
    return Err(RunFailure::new(
      OutcomeReason::InsufficientData,
      "no subject has enough samples to train",
    ));
  }
  Ok(Prepared { x, layout, datasets, skipped, rejected })
}

/// `true` for rows held out for validation: a seeded shuffle, with the first
/// `round(n * fraction)` rows of the permutation held out.
fn validation_mask(n: usize, fraction: f64, seed: u64) -> Vec<bool> {
  let mut order: Vec<usize> = (0..n).collect();
  order.shuffle(&mut StdRng::seed_from_u64(seed));
  let held = ((n as f64 * fraction).round() as usize).min(n);
  let mut mask = vec![false; n];
  for &row in &order[..held] {
    mask[row] = true;
  }
  mask
}

/// Blended-ensemble metrics per subject, on held-out rows when the subject has
/// any.
fn evaluate(
  ensemble: &ModelEnsemble,
  data: &Prepared,
) -> marksight_ml::Result<Vec<SubjectEvaluation>> {
  let mut out = Vec::new();
  for d in &data.datasets {
    if !ensemble.has_subject(&d.subject) {
      continue;
    }
    let held_out = !d.validation_rows.is_empty();
    let rows = if held_out { &d.validation_rows } else { &d.train_rows };

    let mut predicted = Vec::with_capacity(rows.len());
    let mut actual = Vec::with_capacity(rows.len());
    let mut confidence = 0.0;
    for &r in rows {
      let x = data.x.row(r).to_vec();
      if let Some((score, conf)) = ensemble.predict_subject(&d.subject, &x)? {
        predicted.push(score);
        actual.push(d.targets[r]);
        confidence += conf;
      }
    }
    if predicted.is_empty() {
      warn!(subject = %d.subject, "ensemble produced no predictions; subject not activated");
      continue;
    }
    out.push(SubjectEvaluation {
      subject: d.subject.clone(),
      mean_confidence: confidence / predicted.len() as f64,
      metrics: RegressionMetrics::compute(&predicted, &actual),
      training_samples: d.train_rows.len(),
      held_out,
    });
  }
  Ok(out)
}

fn performance_records(
  generation: &ModelGeneration,
  evaluations: &[SubjectEvaluation],
  trained_at: DateTime<Utc>,
) -> Vec<NewPerformanceRecord> {
  evaluations
    .iter()
    .filter_map(|e| {
      let models = generation.ensemble.subjects.get(&e.subject)?;
      let weights: serde_json::Map<String, serde_json::Value> = models
        .weights
        .iter()
        .map(|w| (w.family.to_string(), w.weight.into()))
        .collect();
      Some(NewPerformanceRecord {
        model_name: generation.model_name.clone(),
        model_version: generation.model_version.clone(),
        subject: e.subject.clone(),
        accuracy: e.metrics.accuracy,
        mae: e.metrics.mae,
        rmse: e.metrics.rmse,
        training_samples: e.training_samples,
        validation_samples: e.metrics.samples,
        hyperparameters: serde_json::json!({
          "weights": weights,
          "families": models.hyperparameters(),
        }),
        feature_importance: models.feature_importance(),
        trained_at,
      })
    })
    .collect()
}

/// Move the served models of subjects missing from `ensemble` into it.
fn carry_forward(ensemble: &mut ModelEnsemble, served: ModelEnsemble) -> Vec<String> {
  let mut carried = Vec::new();
  for (subject, models) in served.subjects {
    if let Entry::Vacant(slot) = ensemble.subjects.entry(subject) {
      carried.push(slot.key().clone());
      slot.insert(models);
    }
  }
  carried
}

/// An active record re-issued under `version`, metrics and training time
/// unchanged.
fn reissue(record: ModelPerformanceRecord, version: &str) -> NewPerformanceRecord {
  NewPerformanceRecord {
    model_name:         record.model_name,
    model_version:      version.to_owned(),
    subject:            record.subject,
    accuracy:           record.accuracy,
    mae:                record.mae,
    rmse:               record.rmse,
    training_samples:   record.training_samples,
    validation_samples: record.validation_samples,
    hyperparameters:    record.hyperparameters,
    feature_importance: record.feature_importance,
    trained_at:         record.trained_at,
  }
}

/// Raw bytes of an artifact; `None` when it does not exist.
async fn read_artifact(path: PathBuf) -> Result<Option<Vec<u8>>, RunFailure> {
  tokio::task::spawn_blocking(move || match std::fs::read(&path) {
    Ok(bytes) => Ok(Some(bytes)),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
  })
  .await
  .map_err(|e| RunFailure::new(OutcomeReason::PersistenceFailed, e))?
  .map_err(|e| RunFailure::new(OutcomeReason::PersistenceFailed, e))
}

/// Put back the artifact `path` held before this run, removing it if there
/// was none.
async fn restore_artifact(path: PathBuf, previous: Option<Vec<u8>>) {
  let restored = tokio::task::spawn_blocking(move || match previous {
    Some(bytes) => artifact::write_atomic(&path, &bytes).map_err(|e| e.to_string()),
    None => std::fs::remove_file(&path).map_err(|e| e.to_string()),
  })
  .await;
  match restored {
    Ok(Ok(())) => warn!("activation failed; previous generation restored"),
    Ok(Err(e)) => error!(error = %e, "activation failed and the previous generation could not be restored"),
    Err(e) => error!(error = %e, "activation failed and the restore task panicked"),
  }
}

async fn write_artifact(generation: Arc<ModelGeneration>, path: PathBuf) -> Result<(), RunFailure> {
  tokio::task::spawn_blocking(move || generation.save(&path))
    .await
    .map_err(|e| RunFailure::new(OutcomeReason::PersistenceFailed, e))?
    .map_err(|e| RunFailure::new(OutcomeReason::PersistenceFailed, e))
}
