//! [`SqliteStore`]: the SQLite implementation of [`ScoreStore`].

use std::{
  collections::{BTreeSet, HashMap},
  path::Path,
};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use marksight_core::{
  curriculum::CLASSES,
  performance::{ModelPerformanceRecord, NewPerformanceRecord},
  prediction::{ActualUpdate, NewPrediction, Prediction},
  store::ScoreStore,
  student::{
    AcademicRecord, ExamType, NewAcademicRecord, NewStudent, StudentHistory,
    StudentProfile,
  },
};

use crate::{
  Error, Result,
  encode::{
    PERFORMANCE_COLUMNS, PREDICTION_COLUMNS, RawPerformance, RawPrediction,
    RawRecord, RawStudent, encode_date, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

const STUDENT_SELECT: &str = "SELECT student_id, current_class, gender, school_code, academic_year
   FROM students";

const RECORD_SELECT: &str = "SELECT record_id, student_id, subject, score, max_score,
          exam_type, exam_date, academic_year, term
   FROM academic_records";

fn student_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStudent> {
  Ok(RawStudent {
    student_id:    row.get(0)?,
    current_class: row.get(1)?,
    gender:        row.get(2)?,
    school_code:   row.get(3)?,
    academic_year: row.get(4)?,
  })
}

fn record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
  Ok(RawRecord {
    record_id:     row.get(0)?,
    student_id:    row.get(1)?,
    subject:       row.get(2)?,
    score:         row.get(3)?,
    max_score:     row.get(4)?,
    exam_type:     row.get(5)?,
    exam_date:     row.get(6)?,
    academic_year: row.get(7)?,
    term:          row.get(8)?,
  })
}

fn insert_student(
  conn: &rusqlite::Connection,
  p: &StudentProfile,
  created_at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO students (
       student_id, current_class, gender, school_code, academic_year, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![
      encode_uuid(p.student_id),
      p.current_class,
      p.gender.to_string(),
      p.school_code,
      p.academic_year,
      created_at,
    ],
  )?;
  Ok(())
}

fn insert_record(conn: &rusqlite::Connection, r: &AcademicRecord) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO academic_records (
       record_id, student_id, subject, score, max_score,
       exam_type, exam_date, academic_year, term
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    rusqlite::params![
      encode_uuid(r.record_id),
      encode_uuid(r.student_id),
      r.subject,
      r.score,
      r.max_score,
      r.exam_type.to_string(),
      encode_date(r.exam_date),
      r.academic_year,
      r.term.to_string(),
    ],
  )?;
  Ok(())
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Marksight score store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Host-side writes ──────────────────────────────────────────────────────
  //
  // Students and records are owned by the host application. These methods
  // exist so the store can be seeded; the engine itself never calls them.

  pub async fn add_student(&self, new: NewStudent) -> Result<StudentProfile> {
    if !CLASSES.contains(&new.current_class) {
      return Err(Error::InvalidClass(i64::from(new.current_class)));
    }
    let profile = StudentProfile {
      student_id:    Uuid::new_v4(),
      current_class: new.current_class,
      gender:        new.gender,
      school_code:   new.school_code,
      academic_year: new.academic_year,
    };
    let p = profile.clone();
    let at = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| Ok(insert_student(conn, &p, &at)?))
      .await?;
    Ok(profile)
  }

  pub async fn add_record(&self, new: NewAcademicRecord) -> Result<AcademicRecord> {
    let student_id = new.student_id;
    let record = AcademicRecord {
      record_id:     Uuid::new_v4(),
      student_id:    new.student_id,
      subject:       new.subject,
      score:         new.score,
      max_score:     new.max_score,
      exam_type:     new.exam_type,
      exam_date:     new.exam_date,
      academic_year: new.academic_year,
      term:          new.term,
    };
    let r = record.clone();
    let inserted = self
      .conn
      .call(move |conn| {
        let exists = conn
          .query_row(
            "SELECT 1 FROM students WHERE student_id = ?1",
            rusqlite::params![encode_uuid(r.student_id)],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if exists {
          insert_record(conn, &r)?;
        }
        Ok(exists)
      })
      .await?;
    if !inserted {
      return Err(Error::StudentNotFound(student_id));
    }
    Ok(record)
  }

  /// Import complete histories, ids included, in one transaction. Returns the
  /// number of records written.
  pub async fn import_histories(&self, histories: Vec<StudentHistory>) -> Result<usize> {
    if let Some(bad) = histories
      .iter()
      .find(|h| !CLASSES.contains(&h.profile.current_class))
    {
      return Err(Error::InvalidClass(i64::from(bad.profile.current_class)));
    }
    let at = encode_dt(Utc::now());
    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut written = 0;
        for h in &histories {
          insert_student(&tx, &h.profile, &at)?;
          for r in &h.records {
            insert_record(&tx, r)?;
            written += 1;
          }
        }
        tx.commit()?;
        Ok(written)
      })
      .await?;
    Ok(written)
  }

  pub async fn student_count(&self) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?))
      .await?;
    Ok(usize::try_from(n).unwrap_or(0))
  }

  async fn load_histories(&self, only: Option<Uuid>) -> Result<Vec<StudentHistory>> {
    let filter = only.map(encode_uuid);
    let (students, records): (Vec<RawStudent>, Vec<RawRecord>) = self
      .conn
      .call(move |conn| {
        let (student_sql, record_sql) = match filter {
          Some(_) => (
            format!("{STUDENT_SELECT} WHERE student_id = ?1"),
            format!("{RECORD_SELECT} WHERE student_id = ?1 ORDER BY exam_date, rowid"),
          ),
          None => (
            format!("{STUDENT_SELECT} ORDER BY created_at, rowid"),
            format!("{RECORD_SELECT} ORDER BY exam_date, rowid"),
          ),
        };
        let params: Vec<&dyn rusqlite::ToSql> = match &filter {
          Some(id) => vec![id as &dyn rusqlite::ToSql],
          None => Vec::new(),
        };

        let students = conn
          .prepare(&student_sql)?
          .query_map(params.as_slice(), student_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let records = conn
          .prepare(&record_sql)?
          .query_map(params.as_slice(), record_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((students, records))
      })
      .await?;

    let mut by_student: HashMap<Uuid, Vec<AcademicRecord>> = HashMap::new();
    for raw in records {
      let r = raw.into_record()?;
      by_student.entry(r.student_id).or_default().push(r);
    }
    students
      .into_iter()
      .map(|raw| {
        let profile = raw.into_profile()?;
        let records = by_student.remove(&profile.student_id).unwrap_or_default();
        Ok(StudentHistory::new(profile, records))
      })
      .collect()
  }

  async fn query_performance(
    &self,
    where_sql: &'static str,
    order_sql: &'static str,
    subject: Option<String>,
  ) -> Result<Vec<ModelPerformanceRecord>> {
    let raws: Vec<RawPerformance> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {PERFORMANCE_COLUMNS} FROM model_performance {where_sql} {order_sql}"
        );
        let params: Vec<&dyn rusqlite::ToSql> = match &subject {
          Some(s) => vec![s as &dyn rusqlite::ToSql],
          None => Vec::new(),
        };
        let rows = conn
          .prepare(&sql)?
          .query_map(params.as_slice(), RawPerformance::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawPerformance::into_record).collect()
  }
}

// ─── ScoreStore impl ─────────────────────────────────────────────────────────

impl ScoreStore for SqliteStore {
  type Error = Error;

  // ── Students & records ────────────────────────────────────────────────────

  async fn list_histories(&self) -> Result<Vec<StudentHistory>> {
    self.load_histories(None).await
  }

  async fn get_history(&self, student_id: Uuid) -> Result<Option<StudentHistory>> {
    Ok(self.load_histories(Some(student_id)).await?.into_iter().next())
  }

  async fn board_subjects(&self) -> Result<Vec<String>> {
    let board = ExamType::Board.to_string();
    let subjects = self
      .conn
      .call(move |conn| {
        let rows = conn
          .prepare(
            "SELECT DISTINCT subject FROM academic_records
             WHERE exam_type = ?1 ORDER BY subject",
          )?
          .query_map(rusqlite::params![board], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(subjects)
  }

  // ── Predictions ───────────────────────────────────────────────────────────

  async fn record_predictions(
    &self,
    predictions: Vec<NewPrediction>,
  ) -> Result<Vec<Prediction>> {
    let generated_at = Utc::now();
    let stored: Vec<Prediction> = predictions
      .into_iter()
      .map(|p| Prediction {
        prediction_id: Uuid::new_v4(),
        student_id: p.student_id,
        subject: p.subject,
        predicted_score: p.predicted_score,
        confidence: p.confidence,
        model_version: p.model_version,
        generated_at,
        actual_score: None,
      })
      .collect();

    let rows = stored.clone();
    let at = encode_dt(generated_at);
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for p in &rows {
          tx.execute(
            "INSERT INTO predictions (
               prediction_id, student_id, subject, predicted_score,
               confidence, model_version, generated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
              encode_uuid(p.prediction_id),
              encode_uuid(p.student_id),
              p.subject,
              p.predicted_score,
              p.confidence,
              p.model_version,
              at,
            ],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(stored)
  }

  async fn prediction_history(
    &self,
    student_id: Uuid,
    subject: Option<String>,
    limit: usize,
  ) -> Result<Vec<Prediction>> {
    let id = encode_uuid(student_id);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawPrediction> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {PREDICTION_COLUMNS} FROM predictions
           WHERE student_id = ?1 AND (?2 IS NULL OR subject = ?2)
           ORDER BY generated_at DESC, rowid DESC
           LIMIT ?3"
        );
        let rows = conn
          .prepare(&sql)?
          .query_map(rusqlite::params![id, subject, limit], RawPrediction::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawPrediction::into_prediction).collect()
  }

  async fn record_actual(
    &self,
    prediction_id: Uuid,
    actual_score: f64,
  ) -> Result<ActualUpdate> {
    let id = encode_uuid(prediction_id);
    let (changed, raw): (usize, Option<RawPrediction>) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE predictions SET actual_score = ?2
           WHERE prediction_id = ?1 AND actual_score IS NULL",
          rusqlite::params![id, actual_score],
        )?;
        let raw = tx
          .query_row(
            &format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE prediction_id = ?1"),
            rusqlite::params![id],
            RawPrediction::from_row,
          )
          .optional()?;
        tx.commit()?;
        Ok((changed, raw))
      })
      .await?;

    Ok(match raw {
      None => ActualUpdate::NotFound,
      Some(raw) if changed > 0 => ActualUpdate::Recorded(raw.into_prediction()?),
      Some(raw) => ActualUpdate::AlreadyRecorded(raw.into_prediction()?),
    })
  }

  // ── Model performance ─────────────────────────────────────────────────────

  async fn activate_performance(
    &self,
    records: Vec<NewPerformanceRecord>,
  ) -> Result<Vec<ModelPerformanceRecord>> {
    let mut seen = BTreeSet::new();
    for r in &records {
      if !seen.insert(r.subject.as_str()) {
        return Err(Error::DuplicateSubject(r.subject.clone()));
      }
    }

    let stored: Vec<ModelPerformanceRecord> = records
      .into_iter()
      .map(|r| r.into_active(Uuid::new_v4()))
      .collect();
    let mut rows = Vec::with_capacity(stored.len());
    for r in &stored {
      rows.push((
        encode_uuid(r.record_id),
        r.clone(),
        serde_json::to_string(&r.hyperparameters)?,
        serde_json::to_string(&r.feature_importance)?,
        encode_dt(r.trained_at),
      ));
    }

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for (id, r, hyper, importance, trained_at) in &rows {
          tx.execute(
            "UPDATE model_performance SET is_active = 0
             WHERE subject = ?1 AND is_active = 1",
            rusqlite::params![r.subject],
          )?;
          tx.execute(
            &format!(
              "INSERT INTO model_performance ({PERFORMANCE_COLUMNS})
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1)"
            ),
            rusqlite::params![
              id,
              r.model_name,
              r.model_version,
              r.subject,
              r.accuracy,
              r.mae,
              r.rmse,
              i64::try_from(r.training_samples).unwrap_or(i64::MAX),
              i64::try_from(r.validation_samples).unwrap_or(i64::MAX),
              hyper,
              importance,
              trained_at,
            ],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(stored)
  }

  async fn active_performance(
    &self,
    subject: Option<String>,
  ) -> Result<Vec<ModelPerformanceRecord>> {
    match subject {
      Some(_) => {
        self
          .query_performance(
            "WHERE is_active = 1 AND subject = ?1",
            "ORDER BY subject",
            subject,
          )
          .await
      }
      None => {
        self
          .query_performance("WHERE is_active = 1", "ORDER BY subject", None)
          .await
      }
    }
  }

  async fn latest_active_performance(&self) -> Result<Option<ModelPerformanceRecord>> {
    Ok(
      self
        .query_performance(
          "WHERE is_active = 1",
          "ORDER BY trained_at DESC, rowid DESC LIMIT 1",
          None,
        )
        .await?
        .into_iter()
        .next(),
    )
  }

  async fn performance_history(
    &self,
    subject: String,
  ) -> Result<Vec<ModelPerformanceRecord>> {
    self
      .query_performance(
        "WHERE subject = ?1",
        "ORDER BY trained_at DESC, rowid DESC",
        Some(subject),
      )
      .await
  }
}
