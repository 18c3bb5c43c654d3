//! Per-subject performance summaries for a single student.

use std::collections::BTreeMap;

use marksight_core::student::{AcademicRecord, ExamType};
use marksight_ml::stats;
use serde::Serialize;
use strum::Display;

/// Slope (percentage points per exam) beyond which a trend is called.
const TREND_SLOPE: f64 = 2.0;
const MIN_TREND_RECORDS: usize = 3;
const RECENT: usize = 5;
const MAX_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Trend {
  Improving,
  Declining,
  Stable,
  InsufficientData,
}

/// Classify a chronologically ordered series by its least-squares slope.
pub fn trend(scores: &[f64]) -> Trend {
  if scores.len() < MIN_TREND_RECORDS {
    return Trend::InsufficientData;
  }
  match stats::linear_slope(scores) {
    s if s > TREND_SLOPE => Trend::Improving,
    s if s < -TREND_SLOPE => Trend::Declining,
    _ => Trend::Stable,
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamTypeSummary {
  pub average: f64,
  pub count:   usize,
  pub best:    f64,
  /// Most recent result of this type.
  pub latest:  f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectInsights {
  pub subject:         String,
  pub current_average: f64,
  pub best_score:      f64,
  pub worst_score:     f64,
  /// `1 / (1 + σ)` over every result; 1.0 is perfectly consistent.
  pub consistency:     f64,
  pub trend:           Trend,
  /// Up to five most recent percentages to two places, newest first.
  pub recent:          Vec<f64>,
  pub by_exam_type:    BTreeMap<ExamType, ExamTypeSummary>,
  pub recommendations: Vec<String>,
}

/// Summarise one subject's records. `None` when there are no records.
pub fn subject_insights(subject: &str, records: &[AcademicRecord]) -> Option<SubjectInsights> {
  let mut ordered: Vec<&AcademicRecord> =
    records.iter().filter(|r| r.subject == subject).collect();
  if ordered.is_empty() {
    return None;
  }
  ordered.sort_by_key(|r| r.exam_date);
  let scores: Vec<f64> = ordered.iter().map(|r| r.percentage()).collect();

  let average = stats::mean(&scores);
  let consistency = 1.0 / (1.0 + stats::population_variance(&scores).sqrt());
  let by_exam_type = exam_type_summaries(&ordered);

  Some(SubjectInsights {
    subject: subject.to_owned(),
    current_average: round_to(average, 2),
    best_score: round_to(scores.iter().copied().fold(f64::MIN, f64::max), 2),
    worst_score: round_to(scores.iter().copied().fold(f64::MAX, f64::min), 2),
    consistency: round_to(consistency, 3),
    trend: trend(&scores),
    recent: scores.iter().rev().take(RECENT).map(|&s| round_to(s, 2)).collect(),
    recommendations: recommendations(&scores, average, consistency, &by_exam_type),
    by_exam_type,
  })
}

fn exam_type_summaries(ordered: &[&AcademicRecord]) -> BTreeMap<ExamType, ExamTypeSummary> {
  let mut groups: BTreeMap<ExamType, Vec<f64>> = BTreeMap::new();
  for r in ordered {
    groups.entry(r.exam_type).or_default().push(r.percentage());
  }
  groups
    .into_iter()
    .map(|(exam_type, scores)| {
      let summary = ExamTypeSummary {
        average: round_to(stats::mean(&scores), 2),
        count:   scores.len(),
        best:    round_to(scores.iter().copied().fold(f64::MIN, f64::max), 2),
        latest:  round_to(scores.last().copied().unwrap_or_default(), 2),
      };
      (exam_type, summary)
    })
    .collect()
}

fn recommendations(
  scores: &[f64],
  average: f64,
  consistency: f64,
  by_exam_type: &BTreeMap<ExamType, ExamTypeSummary>,
) -> Vec<String> {
  let mut out: Vec<&str> = Vec::new();
  if average < 60.0 {
    out.push("Focus on building fundamental concepts in this subject");
    out.push("Consider additional practice sessions");
  }
  if consistency < 0.7 {
    out.push("Work on maintaining consistent performance");
    out.push("Review study methods for better retention");
  }
  if scores.len() >= MIN_TREND_RECORDS
    && trend(&scores[scores.len() - MIN_TREND_RECORDS..]) == Trend::Declining
  {
    out.push("Recent performance shows decline - review recent topics");
  }
  if let (Some(board), Some(unit)) =
    (by_exam_type.get(&ExamType::Board), by_exam_type.get(&ExamType::UnitTest))
    && board.average < unit.average - 10.0
  {
    out.push("Focus on exam strategy and time management for board exams");
  }
  out.into_iter().take(MAX_RECOMMENDATIONS).map(str::to_owned).collect()
}

fn round_to(v: f64, places: i32) -> f64 {
  let scale = 10f64.powi(places);
  (v * scale).round() / scale
}
