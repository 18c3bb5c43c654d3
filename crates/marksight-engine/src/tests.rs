//! End-to-end tests: pipeline, prediction service and scheduler against an
//! in-memory SQLite store and a manual clock.

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use marksight_core::{
  grade::Grade,
  performance::{ModelPerformanceRecord, NewPerformanceRecord},
  prediction::{ActualUpdate, NewPrediction, Prediction},
  store::ScoreStore,
  student::{
    ExamType, Gender, LabelledHistory, NewAcademicRecord, NewStudent, StudentHistory, Term,
  },
};
use marksight_ml::{
  EnsembleConfig, ModelGeneration, boosting::BoostingParams, forest::ForestParams,
};
use marksight_store_sqlite::SqliteStore;
use tokio::sync::Semaphore;

use crate::{
  Clock, Error, Result,
  config::{ScheduleSettings, Settings, TrainingSettings},
  pipeline::{OutcomeReason, PipelineState, RunStatus, TrainingOutcome, TrainingPipeline, Trigger},
  prediction::{PredictionService, SubjectPrediction},
  scheduler::{TrainingJob, TrainingScheduler, TriggerResult},
  synthetic::{SyntheticGenerator, SyntheticSource},
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
  fn new() -> Arc<Self> {
    Arc::new(Self(Mutex::new(Utc.with_ymd_and_hms(2025, 6, 2, 2, 0, 0).unwrap())))
  }

  fn advance(&self, by: Duration) { *self.0.lock().unwrap() += by; }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> { *self.0.lock().unwrap() }
}

fn scratch_dir() -> PathBuf {
  std::env::temp_dir().join(format!("marksight-engine-{}", uuid::Uuid::new_v4()))
}

fn settings(model_dir: &Path) -> Settings {
  Settings {
    database_path: PathBuf::from(":memory:"),
    model_dir:     model_dir.to_path_buf(),
    training:      TrainingSettings {
      min_training_samples: 40,
      min_subject_samples: 10,
      synthetic_students: 80,
      ..TrainingSettings::default()
    },
    model:         EnsembleConfig {
      random_forest: ForestParams { n_trees: 8, max_depth: 4, ..Default::default() },
      gradient_boosting: BoostingParams { n_rounds: 15, max_depth: 3, ..Default::default() },
      ..EnsembleConfig::default()
    },
    schedule:      ScheduleSettings::default(),
  }
}

async fn pipeline(
  model_dir: &Path,
  clock: &Arc<ManualClock>,
) -> (Arc<SqliteStore>, TrainingPipeline<SqliteStore>) {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let today = clock.now().date_naive();
  let pipeline = TrainingPipeline::new(store.clone(), settings(model_dir), clock.clone())
    .with_synthetic(Arc::new(SyntheticGenerator::new(42, 3).with_today(today)));
  (store, pipeline)
}

fn performance(accuracy: f64, trained_at: DateTime<Utc>) -> NewPerformanceRecord {
  NewPerformanceRecord {
    model_name: "subject_ensemble".into(),
    model_version: "v20250101_000000_000".into(),
    subject: "English".into(),
    accuracy,
    mae: 100.0 * (1.0 - accuracy),
    rmse: 100.0 * (1.0 - accuracy),
    training_samples: 800,
    validation_samples: 200,
    hyperparameters: serde_json::Value::Null,
    feature_importance: Default::default(),
    trained_at,
  }
}

/// A class-10 student with twelve results over three subjects, the last of
/// each a board exam.
async fn real_student(store: &SqliteStore) -> uuid::Uuid {
  let student = store
    .add_student(NewStudent {
      current_class: 10,
      gender:        Gender::Female,
      school_code:   Some("20417".into()),
      academic_year: "2024-2025".into(),
    })
    .await
    .unwrap();
  let calendar = [
    (ExamType::UnitTest, 1, Term::FirstTerm),
    (ExamType::MidTerm, 2, Term::FirstTerm),
    (ExamType::Final, 3, Term::SecondTerm),
    (ExamType::Board, 20, Term::SecondTerm),
  ];
  let subjects = [
    ("Mathematics", [62.0, 58.0, 66.0, 70.0]),
    ("English", [81.0, 77.0, 79.0, 84.0]),
    ("Hindi", [70.0, 72.0, 69.0, 74.0]),
  ];
  for (subject, scores) in subjects {
    for ((exam_type, slot, term), score) in calendar.into_iter().zip(scores) {
      // Slots 1 to 3 are months; the board exam sits on 20 March.
      let exam_date = if exam_type == ExamType::Board {
        NaiveDate::from_ymd_opt(2025, 3, slot)
      } else {
        NaiveDate::from_ymd_opt(2025, slot, 10)
      };
      store
        .add_record(NewAcademicRecord {
          student_id: student.student_id,
          subject: subject.into(),
          score,
          max_score: 100.0,
          exam_type,
          exam_date: exam_date.unwrap(),
          academic_year: "2024-2025".into(),
          term,
        })
        .await
        .unwrap();
    }
  }
  student.student_id
}

// ─── Retrain decision ────────────────────────────────────────────────────────

#[tokio::test]
async fn should_retrain_follows_the_latest_active_record() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let (store, pipeline) = pipeline(&dir, &clock).await;

  // Nothing trained.
  assert!(pipeline.should_retrain().await.unwrap());

  // Accuracy below threshold.
  store.activate_performance(vec![performance(0.80, clock.now())]).await.unwrap();
  assert!(pipeline.should_retrain().await.unwrap());

  // Fresh and accurate.
  store.activate_performance(vec![performance(0.92, clock.now())]).await.unwrap();
  assert!(!pipeline.should_retrain().await.unwrap());

  // Thirty-one days later it is stale.
  clock.advance(Duration::days(31));
  assert!(pipeline.should_retrain().await.unwrap());
}

#[tokio::test]
async fn daily_trigger_skips_when_up_to_date() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let (store, pipeline) = pipeline(&dir, &clock).await;
  store.activate_performance(vec![performance(0.95, clock.now())]).await.unwrap();

  let outcome = pipeline.run(Trigger::Daily).await;
  assert_eq!(outcome.status, RunStatus::Skipped);
  assert_eq!(outcome.reason, Some(OutcomeReason::UpToDate));
  assert_eq!(pipeline.state(), PipelineState::Idle);
  assert!(!dir.exists());
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insufficient_data_persists_nothing() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let mut s = settings(&dir);
  s.training.synthetic_students = 5;
  let pipeline = TrainingPipeline::new(store.clone(), s, clock.clone()).with_synthetic(Arc::new(
    SyntheticGenerator::new(1, 3).with_today(clock.now().date_naive()),
  ));

  let outcome = pipeline.run(Trigger::Manual).await;
  assert_eq!(outcome.status, RunStatus::Failed);
  assert_eq!(outcome.reason, Some(OutcomeReason::InsufficientData));
  assert!(outcome.model_version.is_none());
  assert_eq!(pipeline.state(), PipelineState::Failed);
  assert!(store.active_performance(None).await.unwrap().is_empty());
  assert!(!dir.join("current.json").exists());
}

#[tokio::test]
async fn consecutive_runs_leave_one_active_record_per_subject() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let (store, pipeline) = pipeline(&dir, &clock).await;

  let first = pipeline.run(Trigger::Manual).await;
  assert!(first.is_success(), "{first:?}");
  assert_eq!(first.synthetic_students, 80);
  assert!(first.evaluations.iter().all(|e| e.held_out));
  assert!(first.subjects.contains(&"Mathematics".to_owned()));
  clock.advance(Duration::seconds(1));

  let second = pipeline.run(Trigger::Weekly).await;
  assert!(second.is_success(), "{second:?}");
  clock.advance(Duration::seconds(1));

  // Third run through the scheduler's manual trigger.
  let scheduler =
    TrainingScheduler::new(pipeline, clock.clone(), &ScheduleSettings::default()).unwrap();
  let TriggerResult::Completed(third) = scheduler.trigger_now().await else {
    panic!("scheduler should not be busy");
  };
  assert!(third.is_success(), "{third:?}");
  assert_eq!(scheduler.job().state(), PipelineState::Idle);

  let versions: BTreeSet<_> = [&first, &second, &third]
    .iter()
    .filter_map(|o| o.model_version.clone())
    .collect();
  assert_eq!(versions.len(), 3);
  let latest = third.model_version.clone().unwrap();

  let active = store.active_performance(None).await.unwrap();
  let subjects: BTreeSet<_> = active.iter().map(|r| r.subject.clone()).collect();
  assert_eq!(subjects.len(), active.len());
  assert_eq!(subjects, third.subjects.iter().cloned().collect::<BTreeSet<_>>());
  assert!(active.iter().all(|r| r.model_version == latest));

  let english = store.performance_history("English".into()).await.unwrap();
  assert_eq!(english.len(), 3);
  assert_eq!(english.iter().filter(|r| r.is_active).count(), 1);
  assert!(!english[0].feature_importance.is_empty());
  assert!(english[0].hyperparameters["weights"].is_object());

  let archived = std::fs::read_dir(dir.join("generations")).unwrap().count();
  assert_eq!(archived, 3);
  let current = ModelGeneration::load(&dir.join("current.json")).unwrap().unwrap();
  assert_eq!(current.model_version, latest);

  std::fs::remove_dir_all(dir).unwrap();
}

/// Synthetic students with one subject's board targets removed.
struct WithoutSubject {
  inner:   SyntheticGenerator,
  subject: &'static str,
}

impl SyntheticSource for WithoutSubject {
  fn generate(&self, count: usize) -> Vec<LabelledHistory> {
    let mut students = self.inner.generate(count);
    for student in &mut students {
      student.targets.remove(self.subject);
    }
    students
  }
}

#[tokio::test]
async fn untrained_subject_keeps_serving_under_the_new_version() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let (store, pipeline) = pipeline(&dir, &clock).await;
  let first = pipeline.run(Trigger::Manual).await;
  assert!(first.is_success(), "{first:?}");
  assert!(first.subjects.contains(&"Mathematics".to_owned()));
  assert!(first.carried_forward.is_empty());
  clock.advance(Duration::seconds(1));

  let without_maths = TrainingPipeline::new(store.clone(), settings(&dir), clock.clone())
    .with_synthetic(Arc::new(WithoutSubject {
      inner:   SyntheticGenerator::new(42, 3).with_today(clock.now().date_naive()),
      subject: "Mathematics",
    }));
  let second = without_maths.run(Trigger::Weekly).await;
  assert!(second.is_success(), "{second:?}");
  assert!(!second.subjects.contains(&"Mathematics".to_owned()));
  assert!(second.skipped.iter().any(|s| s.subject == "Mathematics"));
  assert_eq!(second.carried_forward, vec!["Mathematics".to_owned()]);
  let latest = second.model_version.clone().unwrap();

  // Every active record names the served generation.
  let active = store.active_performance(None).await.unwrap();
  assert!(active.iter().all(|r| r.model_version == latest));
  let maths = store.performance_history("Mathematics".into()).await.unwrap();
  assert_eq!(maths.len(), 2);
  assert_eq!(maths.iter().filter(|r| r.is_active).count(), 1);
  let original = maths.iter().find(|r| !r.is_active).unwrap();
  let reissued = maths.iter().find(|r| r.is_active).unwrap();
  assert_eq!(reissued.accuracy, original.accuracy);
  assert_eq!(reissued.trained_at, original.trained_at);

  let student = real_student(&store).await;
  let service =
    PredictionService::load(store.clone(), dir.join("current.json"), clock.clone()).await;
  assert_eq!(service.model_version().await, Some(latest.clone()));
  let result = service.predict(student, Some(vec!["Mathematics".into()])).await.unwrap();
  assert_eq!(result.model_version, Some(latest));
  assert!(matches!(result.subjects["Mathematics"], SubjectPrediction::Predicted { .. }));

  std::fs::remove_dir_all(dir).unwrap();
}

/// Delegates to SQLite, except that activation can be made to fail.
struct RefusingStore {
  inner:  Arc<SqliteStore>,
  refuse: AtomicBool,
}

impl ScoreStore for RefusingStore {
  type Error = std::io::Error;

  async fn list_histories(&self) -> Result<Vec<StudentHistory>, Self::Error> {
    self.inner.list_histories().await.map_err(std::io::Error::other)
  }

  async fn get_history(&self, student_id: uuid::Uuid) -> Result<Option<StudentHistory>, Self::Error> {
    self.inner.get_history(student_id).await.map_err(std::io::Error::other)
  }

  async fn board_subjects(&self) -> Result<Vec<String>, Self::Error> {
    self.inner.board_subjects().await.map_err(std::io::Error::other)
  }

  async fn record_predictions(
    &self,
    predictions: Vec<NewPrediction>,
  ) -> Result<Vec<Prediction>, Self::Error> {
    self.inner.record_predictions(predictions).await.map_err(std::io::Error::other)
  }

  async fn prediction_history(
    &self,
    student_id: uuid::Uuid,
    subject: Option<String>,
    limit: usize,
  ) -> Result<Vec<Prediction>, Self::Error> {
    self
      .inner
      .prediction_history(student_id, subject, limit)
      .await
      .map_err(std::io::Error::other)
  }

  async fn record_actual(
    &self,
    prediction_id: uuid::Uuid,
    actual_score: f64,
  ) -> Result<ActualUpdate, Self::Error> {
    self.inner.record_actual(prediction_id, actual_score).await.map_err(std::io::Error::other)
  }

  async fn activate_performance(
    &self,
    records: Vec<NewPerformanceRecord>,
  ) -> Result<Vec<ModelPerformanceRecord>, Self::Error> {
    if self.refuse.load(Ordering::SeqCst) {
      return Err(std::io::Error::other("activation refused"));
    }
    self.inner.activate_performance(records).await.map_err(std::io::Error::other)
  }

  async fn active_performance(
    &self,
    subject: Option<String>,
  ) -> Result<Vec<ModelPerformanceRecord>, Self::Error> {
    self.inner.active_performance(subject).await.map_err(std::io::Error::other)
  }

  async fn latest_active_performance(
    &self,
  ) -> Result<Option<ModelPerformanceRecord>, Self::Error> {
    self.inner.latest_active_performance().await.map_err(std::io::Error::other)
  }

  async fn performance_history(
    &self,
    subject: String,
  ) -> Result<Vec<ModelPerformanceRecord>, Self::Error> {
    self.inner.performance_history(subject).await.map_err(std::io::Error::other)
  }
}

#[tokio::test]
async fn failed_activation_restores_the_served_generation() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let sqlite = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let store = Arc::new(RefusingStore { inner: sqlite.clone(), refuse: AtomicBool::new(true) });
  let pipeline = TrainingPipeline::new(store.clone(), settings(&dir), clock.clone())
    .with_synthetic(Arc::new(SyntheticGenerator::new(42, 3).with_today(clock.now().date_naive())));
  let current = dir.join("current.json");

  // Nothing was served before, so nothing is served after.
  let refused = pipeline.run(Trigger::Manual).await;
  assert_eq!(refused.reason, Some(OutcomeReason::PersistenceFailed));
  assert!(!current.exists());
  clock.advance(Duration::seconds(1));

  store.refuse.store(false, Ordering::SeqCst);
  let served = pipeline.run(Trigger::Manual).await;
  assert!(served.is_success(), "{served:?}");
  let served_bytes = std::fs::read(&current).unwrap();
  clock.advance(Duration::seconds(1));

  store.refuse.store(true, Ordering::SeqCst);
  let refused = pipeline.run(Trigger::Weekly).await;
  assert_eq!(refused.status, RunStatus::Failed);
  assert_eq!(refused.reason, Some(OutcomeReason::PersistenceFailed));
  assert_eq!(pipeline.state(), PipelineState::Failed);
  assert_eq!(std::fs::read(&current).unwrap(), served_bytes);
  let active = sqlite.active_performance(None).await.unwrap();
  assert!(!active.is_empty());
  assert!(active.iter().all(|r| Some(&r.model_version) == served.model_version.as_ref()));

  std::fs::remove_dir_all(dir).unwrap();
}

// ─── Prediction service ──────────────────────────────────────────────────────

#[tokio::test]
async fn predict_history_and_backfill() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let (store, pipeline) = pipeline(&dir, &clock).await;
  let trained = pipeline.run(Trigger::Manual).await;
  assert!(trained.is_success(), "{trained:?}");

  let student = real_student(&store).await;
  let service =
    PredictionService::load(store.clone(), dir.join("current.json"), clock.clone()).await;
  assert_eq!(service.model_version().await, trained.model_version);

  let requested = ["Mathematics", "English", "Hindi"].map(str::to_owned).to_vec();
  let result = service.predict(student, Some(requested.clone())).await.unwrap();
  assert_eq!(result.model_version, trained.model_version);
  assert!(result.subjects.keys().eq(requested.iter().collect::<BTreeSet<_>>()));
  for (subject, prediction) in &result.subjects {
    let SubjectPrediction::Predicted { score, confidence, grade, improvement_needed, .. } =
      prediction
    else {
      panic!("{subject} should be predicted");
    };
    assert!((0.0..=100.0).contains(score));
    assert!((0.5..=0.99).contains(confidence));
    assert_eq!(*grade, Grade::from_score(*score));
    assert_eq!(*improvement_needed, (75.0 - score).max(0.0));
  }

  let SubjectPrediction::Predicted { score, prediction_id, .. } = result.subjects["Mathematics"]
  else {
    unreachable!();
  };

  let unknown = service.predict(student, Some(vec!["Sanskrit".into()])).await.unwrap();
  assert_eq!(unknown.subjects["Sanskrit"], SubjectPrediction::Unavailable);

  let history = service.prediction_history(student, None, None).await.unwrap();
  assert_eq!(history.len(), 3);
  assert!(history.iter().all(|h| h.accuracy.is_none()));
  let maths = service
    .prediction_history(student, Some("Mathematics".into()), Some(10))
    .await
    .unwrap();
  assert_eq!(maths.len(), 1);
  assert_eq!(maths[0].prediction.prediction_id, prediction_id);

  let backfilled = service.record_actual(prediction_id, 70.0).await.unwrap();
  assert_eq!(backfilled.prediction.actual_score, Some(70.0));
  let expected = 1.0 - (score - 70.0).abs() / 100.0;
  assert!((backfilled.accuracy.unwrap() - expected).abs() < 1e-9);

  let again = service.record_actual(prediction_id, 10.0).await.unwrap_err();
  assert!(matches!(again, Error::AlreadyRecorded(id) if id == prediction_id));
  let missing = service.record_actual(uuid::Uuid::new_v4(), 10.0).await.unwrap_err();
  assert!(matches!(missing, Error::PredictionNotFound(_)));
  let invalid = service.record_actual(prediction_id, 101.0).await.unwrap_err();
  assert!(matches!(invalid, Error::InvalidScore(_)));

  let history = service.prediction_history(student, None, None).await.unwrap();
  let filled = history.iter().find(|h| h.prediction.prediction_id == prediction_id).unwrap();
  assert_eq!(filled.accuracy, backfilled.accuracy);

  let perf = service.model_performance(Some("English".into())).await.unwrap();
  assert_eq!(perf.len(), 1);
  assert!(perf[0].is_active);

  let insights = service.subject_insights(student, "Mathematics").await.unwrap();
  assert_eq!(insights.by_exam_type.len(), 4);
  assert_eq!(insights.recent, vec![70.0, 66.0, 58.0, 62.0]);
  assert!(matches!(
    service.subject_insights(student, "History").await,
    Err(Error::NoRecords { .. })
  ));

  std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn no_model_means_unavailable_and_nothing_stored() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let student = real_student(&store).await;

  let service = PredictionService::load(store.clone(), dir.join("current.json"), clock).await;
  assert!(service.model_version().await.is_none());

  let result = service.predict(student, None).await.unwrap();
  assert_eq!(result.subjects.len(), 14);
  assert!(result.subjects.values().all(|p| *p == SubjectPrediction::Unavailable));
  assert!(service.prediction_history(student, None, None).await.unwrap().is_empty());

  let unknown = service.predict(uuid::Uuid::new_v4(), None).await.unwrap_err();
  assert!(matches!(unknown, Error::StudentNotFound(_)));
}

#[tokio::test]
async fn corrupt_artifact_is_no_model() {
  let dir = scratch_dir();
  std::fs::create_dir_all(&dir).unwrap();
  let path = dir.join("current.json");
  std::fs::write(&path, b"{\"format_version\":1,\"checksum\":\"00\",\"payload\":\"{}\"}").unwrap();

  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let service = PredictionService::load(store, path, ManualClock::new()).await;
  assert!(service.model_version().await.is_none());
  assert!(matches!(service.reload().await, Err(Error::Model(_))));

  std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn reload_swaps_in_a_new_generation() {
  let dir = scratch_dir();
  let clock = ManualClock::new();
  let (store, pipeline) = pipeline(&dir, &clock).await;
  let service =
    PredictionService::load(store.clone(), dir.join("current.json"), clock.clone()).await;
  assert!(service.reload().await.unwrap().is_none());

  let trained = pipeline.run(Trigger::Manual).await;
  assert!(trained.is_success(), "{trained:?}");
  assert_eq!(service.reload().await.unwrap(), trained.model_version);

  std::fs::remove_dir_all(dir).unwrap();
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// A job whose runs block until the test hands out a permit.
struct GatedJob {
  clock:       Arc<ManualClock>,
  needs:       bool,
  hold_checks: bool,
  checks:      AtomicUsize,
  runs:        AtomicUsize,
  gate:        Semaphore,
  check_gate:  Semaphore,
}

impl GatedJob {
  fn new(needs: bool) -> Self {
    Self {
      clock: ManualClock::new(),
      needs,
      hold_checks: false,
      checks: AtomicUsize::new(0),
      runs: AtomicUsize::new(0),
      gate: Semaphore::new(0),
      check_gate: Semaphore::new(0),
    }
  }

  /// Retrain checks also block until `check_gate` hands out a permit.
  fn holding_checks(mut self) -> Self {
    self.hold_checks = true;
    self
  }
}

impl TrainingJob for GatedJob {
  async fn should_retrain(&self) -> Result<bool> {
    self.checks.fetch_add(1, Ordering::SeqCst);
    if self.hold_checks {
      if let Ok(permit) = self.check_gate.acquire().await {
        permit.forget();
      }
    }
    Ok(self.needs)
  }

  async fn run(&self, trigger: Trigger) -> TrainingOutcome {
    self.runs.fetch_add(1, Ordering::SeqCst);
    if let Ok(permit) = self.gate.acquire().await {
      permit.forget();
    }
    let mut outcome = TrainingOutcome::started(trigger, self.clock.now());
    outcome.status = RunStatus::Success;
    outcome
  }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
  tokio::time::timeout(StdDuration::from_secs(5), async {
    while !condition() {
      tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
  })
  .await
  .expect("condition not reached in time");
}

fn scheduler(job: GatedJob) -> TrainingScheduler<GatedJob> {
  let clock = job.clock.clone();
  TrainingScheduler::new(job, clock, &ScheduleSettings::default()).unwrap()
}

/// A scheduler that looks at its slots every second.
fn ticking_scheduler(job: GatedJob) -> TrainingScheduler<GatedJob> {
  let clock = job.clock.clone();
  let schedule = ScheduleSettings { tick_seconds: 1, ..ScheduleSettings::default() };
  TrainingScheduler::new(job, clock, &schedule).unwrap()
}

#[tokio::test]
async fn start_is_idempotent() {
  let s = scheduler(GatedJob::new(false));
  s.start().await;
  s.start().await;
  assert_eq!(s.job().checks.load(Ordering::SeqCst), 1);
  assert_eq!(s.job().runs.load(Ordering::SeqCst), 0);

  let status = s.status().await;
  assert!(status.running);
  assert!(!status.training_in_progress);
  assert!(status.last_outcome.is_none());
  assert_eq!(status.pending_jobs.len(), 2);
  // The clock reads Monday 2 June 2025, 02:00.
  let daily = status.pending_jobs.iter().find(|j| j.name == "daily_retrain_check").unwrap();
  assert_eq!(daily.next_run, Utc.with_ymd_and_hms(2025, 6, 3, 2, 0, 0).unwrap());
  let weekly = status.pending_jobs.iter().find(|j| j.name == "weekly_full_retrain").unwrap();
  assert_eq!(weekly.next_run, Utc.with_ymd_and_hms(2025, 6, 8, 1, 0, 0).unwrap());

  s.stop().await;
  let status = s.status().await;
  assert!(!status.running);
  assert!(status.pending_jobs.is_empty());
}

#[tokio::test]
async fn busy_while_a_run_is_in_flight() {
  let s = scheduler(GatedJob::new(true));
  s.start().await;
  wait_for(|| s.job().runs.load(Ordering::SeqCst) == 1).await;
  assert!(s.status().await.training_in_progress);

  let TriggerResult::Busy { last } = s.trigger_now().await else {
    panic!("a run is in flight");
  };
  assert!(last.is_none());

  // Stopping does not abort the startup run.
  s.stop().await;
  s.job().gate.add_permits(1);
  tokio::time::timeout(StdDuration::from_secs(5), async {
    while s.status().await.training_in_progress {
      tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
  })
  .await
  .expect("startup run did not finish");
  assert_eq!(s.last_outcome().unwrap().trigger, Trigger::Startup);

  s.job().gate.add_permits(1);
  let TriggerResult::Completed(outcome) = s.trigger_now().await else {
    panic!("nothing should be running");
  };
  assert_eq!(outcome.trigger, Trigger::Manual);
  assert_eq!(s.job().runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn status_answers_while_the_startup_check_runs() {
  let s = scheduler(GatedJob::new(true).holding_checks());
  let starting = tokio::spawn({
    let s = s.clone();
    async move { s.start().await }
  });
  wait_for(|| s.job().checks.load(Ordering::SeqCst) == 1).await;

  let status = tokio::time::timeout(StdDuration::from_secs(1), s.status())
    .await
    .expect("status blocked behind the startup check");
  assert!(status.running);
  assert!(!status.training_in_progress);
  assert!(s.is_running().await);

  s.job().check_gate.add_permits(1);
  starting.await.unwrap();
  wait_for(|| s.job().runs.load(Ordering::SeqCst) == 1).await;
  s.stop().await;
  s.job().gate.add_permits(1);
  wait_for(|| s.last_outcome().is_some()).await;
}

#[tokio::test]
async fn slot_coming_due_during_a_run_is_skipped() {
  let s = ticking_scheduler(GatedJob::new(true));
  s.start().await;
  wait_for(|| s.job().runs.load(Ordering::SeqCst) == 1).await;

  // Tuesday 02:00: the daily slot falls due while the startup run is gated.
  s.job().clock.advance(Duration::days(1));
  tokio::time::sleep(StdDuration::from_millis(2500)).await;
  assert_eq!(s.job().runs.load(Ordering::SeqCst), 1);
  assert!(s.status().await.training_in_progress);

  s.job().gate.add_permits(1);
  wait_for(|| s.last_outcome().is_some()).await;
  assert_eq!(s.last_outcome().unwrap().trigger, Trigger::Startup);

  // The skipped slot is not replayed once the lock frees up.
  tokio::time::sleep(StdDuration::from_millis(1500)).await;
  assert_eq!(s.job().runs.load(Ordering::SeqCst), 1);
  s.stop().await;
}

#[tokio::test]
async fn due_slots_launch_daily_and_weekly_runs() {
  let s = ticking_scheduler(GatedJob::new(false));
  s.start().await;
  assert_eq!(s.job().runs.load(Ordering::SeqCst), 0);
  s.job().gate.add_permits(2);

  // Tuesday 02:00.
  s.job().clock.advance(Duration::days(1));
  wait_for(|| s.last_outcome().is_some_and(|o| o.trigger == Trigger::Daily)).await;
  assert_eq!(s.job().runs.load(Ordering::SeqCst), 1);

  // Sunday 01:00. The daily slots passed on the way are due in the same tick,
  // but the weekly run takes the lock first.
  s.job().clock.advance(Duration::days(4) + Duration::hours(23));
  wait_for(|| s.last_outcome().is_some_and(|o| o.trigger == Trigger::Weekly)).await;
  tokio::time::sleep(StdDuration::from_millis(1500)).await;
  assert_eq!(s.job().runs.load(Ordering::SeqCst), 2);
  assert_eq!(s.job().checks.load(Ordering::SeqCst), 1);

  s.stop().await;
}
