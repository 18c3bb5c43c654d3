//! Per-subject multi-family ensemble with accuracy-proportional blending.
//!
//! Training builds a fresh [`ModelEnsemble`] value; nothing is mutated in
//! place, so a served ensemble can be swapped wholesale for a new one.

use std::collections::BTreeMap;

use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
  Error, Result,
  boosting::BoostingParams,
  family::{Hyperparameters, ModelFamily},
  forest::ForestParams,
  metrics::RegressionMetrics,
  regressor::SubjectRegressor,
  ridge::RidgeParams,
  tuning,
};

/// Tolerance for weights summing to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
  pub families:          Vec<ModelFamily>,
  pub random_forest:     ForestParams,
  pub gradient_boosting: BoostingParams,
  pub ridge:             RidgeParams,
  /// Grid-search each family's hyperparameters before the final fit.
  pub tune:              bool,
}

impl Default for EnsembleConfig {
  fn default() -> Self {
    Self {
      families:          ModelFamily::ALL.to_vec(),
      random_forest:     ForestParams::default(),
      gradient_boosting: BoostingParams::default(),
      ridge:             RidgeParams::default(),
      tune:              false,
    }
  }
}

impl EnsembleConfig {
  pub fn hyperparameters(&self, family: ModelFamily) -> Hyperparameters {
    match family {
      ModelFamily::RandomForest => Hyperparameters::RandomForest(self.random_forest.clone()),
      ModelFamily::GradientBoosting => {
        Hyperparameters::GradientBoosting(self.gradient_boosting.clone())
      }
      ModelFamily::Ridge => Hyperparameters::Ridge(self.ridge.clone()),
    }
  }

  /// Configured families without duplicates, in configuration order.
  fn distinct_families(&self) -> Vec<ModelFamily> {
    let mut out = Vec::with_capacity(self.families.len());
    for f in &self.families {
      if !out.contains(f) {
        out.push(*f);
      }
    }
    out
  }
}

// ─── Training inputs and outputs ─────────────────────────────────────────────

/// One subject's slice of the shared feature matrix.
#[derive(Debug, Clone)]
pub struct SubjectDataset {
  pub subject:         String,
  /// Rows of the matrix used for fitting.
  pub train_rows:      Vec<usize>,
  /// Rows held out for evaluation; may be empty.
  pub validation_rows: Vec<usize>,
  /// Target per matrix row; only the rows listed above are read.
  pub targets:         Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyEvaluation {
  pub subject:  String,
  pub family:   ModelFamily,
  pub metrics:  RegressionMetrics,
  /// Whether `metrics` were measured on held-out rows.
  pub held_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyFailure {
  pub subject: String,
  pub family:  ModelFamily,
  pub reason:  String,
}

#[derive(Debug)]
pub struct EnsembleTraining {
  pub ensemble:    ModelEnsemble,
  pub evaluations: Vec<FamilyEvaluation>,
  pub failures:    Vec<FamilyFailure>,
}

// ─── The ensemble ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FamilyWeight {
  pub family: ModelFamily,
  pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectModels {
  pub regressors: Vec<SubjectRegressor>,
  pub weights:    Vec<FamilyWeight>,
}

impl SubjectModels {
  pub fn weight(&self, family: ModelFamily) -> f64 {
    self
      .weights
      .iter()
      .find(|w| w.family == family)
      .map_or(0.0, |w| w.weight)
  }

  /// Weighted blend of the member predictions. `None` when no fitted family
  /// carries positive weight.
  pub fn predict(&self, x: &[f64]) -> Result<Option<(f64, f64)>> {
    let (mut score, mut confidence, mut total) = (0.0, 0.0, 0.0);
    for r in &self.regressors {
      let w = self.weight(r.family());
      if w <= 0.0 {
        continue;
      }
      let (s, c) = r.predict(x)?;
      score += w * s;
      confidence += w * c;
      total += w;
    }
    Ok((total > 0.0).then(|| (score / total, confidence / total)))
  }

  /// Weight-averaged feature importances of the members.
  pub fn feature_importance(&self) -> BTreeMap<String, f64> {
    let mut out: BTreeMap<String, f64> = BTreeMap::new();
    let total: f64 = self
      .regressors
      .iter()
      .map(|r| self.weight(r.family()))
      .sum();
    if total <= 0.0 {
      return out;
    }
    for r in &self.regressors {
      let w = self.weight(r.family()) / total;
      for (name, v) in &r.feature_importance {
        *out.entry(name.clone()).or_default() += w * v;
      }
    }
    out
  }

  /// Hyperparameters of every member, keyed by family name.
  pub fn hyperparameters(&self) -> serde_json::Value {
    let map: serde_json::Map<_, _> = self
      .regressors
      .iter()
      .map(|r| (r.family().to_string(), r.hyperparameters.to_json()))
      .collect();
    serde_json::Value::Object(map)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEnsemble {
  pub families: Vec<ModelFamily>,
  pub subjects: BTreeMap<String, SubjectModels>,
}

impl ModelEnsemble {
  /// Fit every configured family for every subject.
  ///
  /// A family that fails for a subject is recorded in
  /// [`EnsembleTraining::failures`] and excluded from that subject's weights.
  /// A subject where every family fails is left out of the ensemble.
  pub fn train(
    config: &EnsembleConfig,
    x: ArrayView2<'_, f64>,
    feature_names: &[String],
    datasets: &[SubjectDataset],
  ) -> Result<EnsembleTraining> {
    if x.ncols() != feature_names.len() {
      return Err(Error::ShapeMismatch {
        expected: feature_names.len(),
        found:    x.ncols(),
      });
    }
    let families = config.distinct_families();
    let mut subjects = BTreeMap::new();
    let mut evaluations = Vec::new();
    let mut failures = Vec::new();

    for data in datasets {
      let train_x = x.select(Axis(0), &data.train_rows);
      let train_y: Vec<f64> = data.train_rows.iter().map(|&r| data.targets[r]).collect();
      let (eval_rows, held_out) = if data.validation_rows.is_empty() {
        (&data.train_rows, false)
      } else {
        (&data.validation_rows, true)
      };
      let eval_y: Vec<f64> = eval_rows.iter().map(|&r| data.targets[r]).collect();

      let mut regressors = Vec::new();
      let mut accuracies = Vec::new();
      for &family in &families {
        let fitted = fit_family(config, family, train_x.view(), &train_y, feature_names)
          .and_then(|r| {
            let predicted = eval_rows
              .iter()
              .map(|&row| r.predict(&x.row(row).to_vec()).map(|(s, _)| s))
              .collect::<Result<Vec<_>>>()?;
            Ok((r, predicted))
          });
        match fitted {
          Ok((r, predicted)) => {
            let metrics = RegressionMetrics::compute(&predicted, &eval_y);
            debug!(
              subject = %data.subject, %family, mae = metrics.mae,
              accuracy = metrics.accuracy, "family trained"
            );
            accuracies.push((family, metrics.accuracy));
            evaluations.push(FamilyEvaluation {
              subject: data.subject.clone(),
              family,
              metrics,
              held_out,
            });
            regressors.push(r);
          }
          Err(e) => {
            warn!(subject = %data.subject, %family, error = %e, "family failed to train");
            failures.push(FamilyFailure {
              subject: data.subject.clone(),
              family,
              reason:  e.to_string(),
            });
          }
        }
      }

      if regressors.is_empty() {
        continue;
      }
      let weights = compute_weights(&families, &accuracies);
      subjects.insert(data.subject.clone(), SubjectModels { regressors, weights });
    }

    Ok(EnsembleTraining {
      ensemble: ModelEnsemble { families, subjects },
      evaluations,
      failures,
    })
  }

  pub fn has_subject(&self, subject: &str) -> bool { self.subjects.contains_key(subject) }

  pub fn subject_names(&self) -> impl Iterator<Item = &str> {
    self.subjects.keys().map(String::as_str)
  }

  /// Blended `(score, confidence)` for one subject; `None` if the subject has
  /// no usable model.
  pub fn predict_subject(&self, subject: &str, x: &[f64]) -> Result<Option<(f64, f64)>> {
    match self.subjects.get(subject) {
      Some(models) => models.predict(x),
      None => Ok(None),
    }
  }

  /// Blended predictions for each requested subject. Subjects without a
  /// usable model are absent from the result.
  pub fn predict(
    &self,
    x: &[f64],
    subjects: &[String],
  ) -> Result<BTreeMap<String, (f64, f64)>> {
    let mut out = BTreeMap::new();
    for subject in subjects {
      if let Some(p) = self.predict_subject(subject, x)? {
        out.insert(subject.clone(), p);
      }
    }
    Ok(out)
  }
}

fn fit_family(
  config: &EnsembleConfig,
  family: ModelFamily,
  x: ArrayView2<'_, f64>,
  y: &[f64],
  feature_names: &[String],
) -> Result<SubjectRegressor> {
  let mut params = config.hyperparameters(family);
  if config.tune {
    params = tuning::tune(&params, x, y, seed_of(&params))?;
  }
  SubjectRegressor::fit(params, x, y, feature_names)
}

fn seed_of(params: &Hyperparameters) -> u64 {
  match params {
    Hyperparameters::RandomForest(p) => p.seed,
    Hyperparameters::GradientBoosting(p) => p.seed,
    Hyperparameters::Ridge(_) => 42,
  }
}

/// Blending weights for one subject.
///
/// `accuracies` holds the families that produced a result. Families with a
/// non-positive accuracy get weight zero. When no family is usable, every
/// configured family gets an equal share.
pub fn compute_weights(
  families: &[ModelFamily],
  accuracies: &[(ModelFamily, f64)],
) -> Vec<FamilyWeight> {
  let usable = |a: f64| a.is_finite() && a > 0.0;
  let total: f64 = accuracies.iter().map(|&(_, a)| a).filter(|&a| usable(a)).sum();

  if total > 0.0 {
    accuracies
      .iter()
      .map(|&(family, a)| FamilyWeight {
        family,
        weight: if usable(a) { a / total } else { 0.0 },
      })
      .collect()
  } else {
    let share = 1.0 / families.len().max(1) as f64;
    families
      .iter()
      .map(|&family| FamilyWeight { family, weight: share })
      .collect()
  }
}
