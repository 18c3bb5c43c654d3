//! SQL schema for the Marksight SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS students (
    student_id     TEXT PRIMARY KEY,
    current_class  INTEGER NOT NULL CHECK (current_class BETWEEN 9 AND 12),
    gender         TEXT NOT NULL,   -- 'male' | 'female' | 'other'
    school_code    TEXT,
    academic_year  TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS academic_records (
    record_id      TEXT PRIMARY KEY,
    student_id     TEXT NOT NULL REFERENCES students(student_id),
    subject        TEXT NOT NULL,
    score          REAL NOT NULL,
    max_score      REAL NOT NULL,
    exam_type      TEXT NOT NULL,   -- snake_case ExamType
    exam_date      TEXT NOT NULL,   -- YYYY-MM-DD
    academic_year  TEXT NOT NULL,
    term           TEXT NOT NULL    -- 'first_term' | 'second_term'
);

-- Append-only apart from the single actual_score backfill.
CREATE TABLE IF NOT EXISTS predictions (
    prediction_id    TEXT PRIMARY KEY,
    student_id       TEXT NOT NULL REFERENCES students(student_id),
    subject          TEXT NOT NULL,
    predicted_score  REAL NOT NULL,
    confidence       REAL NOT NULL,
    model_version    TEXT NOT NULL,
    generated_at     TEXT NOT NULL,
    actual_score     REAL
);

-- Never deleted; retired records have is_active = 0.
CREATE TABLE IF NOT EXISTS model_performance (
    record_id           TEXT PRIMARY KEY,
    model_name          TEXT NOT NULL,
    model_version       TEXT NOT NULL,
    subject             TEXT NOT NULL,
    accuracy            REAL NOT NULL,
    mae                 REAL NOT NULL,
    rmse                REAL NOT NULL,
    training_samples    INTEGER NOT NULL,
    validation_samples  INTEGER NOT NULL,
    hyperparameters     TEXT NOT NULL,   -- JSON
    feature_importance  TEXT NOT NULL,   -- JSON object name -> weight
    trained_at          TEXT NOT NULL,
    is_active           INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS records_student_idx    ON academic_records(student_id);
CREATE INDEX IF NOT EXISTS records_exam_type_idx  ON academic_records(exam_type);
CREATE INDEX IF NOT EXISTS predictions_student_idx
    ON predictions(student_id, generated_at);
CREATE INDEX IF NOT EXISTS performance_subject_idx
    ON model_performance(subject, trained_at);

-- At most one active record per subject.
CREATE UNIQUE INDEX IF NOT EXISTS performance_one_active_idx
    ON model_performance(subject) WHERE is_active = 1;

PRAGMA user_version = 1;
";
