//! One fitted model for one subject: the unit the ensemble blends.

use std::collections::BTreeMap;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  boosting::GradientBoosting,
  family::{Hyperparameters, ModelFamily},
  forest::RandomForest,
  ridge::RidgeModel,
  stats::population_variance,
};

/// Confidence reported by families without a per-member spread.
pub const FIXED_CONFIDENCE: f64 = 0.85;
pub const MIN_CONFIDENCE: f64 = 0.50;
pub const MAX_CONFIDENCE: f64 = 0.99;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum FittedModel {
  RandomForest(RandomForest),
  GradientBoosting(GradientBoosting),
  Ridge(RidgeModel),
}

impl FittedModel {
  /// Fit the family named by `params`. Returns the model and its normalised
  /// feature importances, indexed like the columns of `x`.
  pub fn fit(
    params: &Hyperparameters,
    x: ArrayView2<'_, f64>,
    y: &[f64],
  ) -> Result<(Self, Vec<f64>)> {
    let family = params.family();
    if x.nrows() == 0 {
      return Err(Error::training(family, "no training rows"));
    }
    if x.nrows() != y.len() {
      return Err(Error::training(
        family,
        format!("{} rows but {} targets", x.nrows(), y.len()),
      ));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
      return Err(Error::training(family, "non-finite training input"));
    }

    Ok(match params {
      Hyperparameters::RandomForest(p) => {
        let (m, imp) = RandomForest::fit(x, y, p);
        (Self::RandomForest(m), imp)
      }
      Hyperparameters::GradientBoosting(p) => {
        let (m, imp) = GradientBoosting::fit(x, y, p);
        (Self::GradientBoosting(m), imp)
      }
      Hyperparameters::Ridge(p) => {
        let (m, imp) = RidgeModel::fit(x, y, p).ok_or_else(|| {
          Error::training(family, "normal equations are not positive definite")
        })?;
        (Self::Ridge(m), imp)
      }
    })
  }

  pub fn family(&self) -> ModelFamily {
    match self {
      Self::RandomForest(_) => ModelFamily::RandomForest,
      Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
      Self::Ridge(_) => ModelFamily::Ridge,
    }
  }

  /// Unclamped point prediction.
  pub fn score(&self, row: ArrayView1<'_, f64>) -> f64 {
    match self {
      Self::RandomForest(m) => m.predict(row),
      Self::GradientBoosting(m) => m.predict(row),
      Self::Ridge(m) => m.predict(row),
    }
  }

  /// Raw `(score, confidence)` before clamping.
  fn raw_predict(&self, row: ArrayView1<'_, f64>) -> (f64, f64) {
    match self {
      Self::RandomForest(m) => {
        let per_tree = m.tree_predictions(row);
        let score = crate::stats::mean(&per_tree);
        let confidence = 1.0 / (1.0 + population_variance(&per_tree) / 100.0);
        (score, confidence)
      }
      Self::GradientBoosting(_) | Self::Ridge(_) => (self.score(row), FIXED_CONFIDENCE),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRegressor {
  pub hyperparameters:    Hyperparameters,
  pub model:              FittedModel,
  pub n_features:         usize,
  /// Normalised importances keyed by feature name; zero entries omitted.
  pub feature_importance: BTreeMap<String, f64>,
}

impl SubjectRegressor {
  pub fn fit(
    params: Hyperparameters,
    x: ArrayView2<'_, f64>,
    y: &[f64],
    feature_names: &[String],
  ) -> Result<Self> {
    if x.ncols() != feature_names.len() {
      return Err(Error::ShapeMismatch {
        expected: feature_names.len(),
        found:    x.ncols(),
      });
    }
    let (model, importance) = FittedModel::fit(&params, x, y)?;
    let feature_importance = feature_names
      .iter()
      .zip(importance)
      .filter(|(_, v)| *v > 0.0)
      .map(|(name, v)| (name.clone(), v))
      .collect();
    Ok(Self {
      hyperparameters: params,
      model,
      n_features: x.ncols(),
      feature_importance,
    })
  }

  pub fn family(&self) -> ModelFamily { self.model.family() }

  /// `(score, confidence)` with the score clamped to `[0, 100]` and the
  /// confidence to `[0.50, 0.99]`.
  pub fn predict(&self, x: &[f64]) -> Result<(f64, f64)> {
    if x.len() != self.n_features {
      return Err(Error::ShapeMismatch { expected: self.n_features, found: x.len() });
    }
    let (score, confidence) = self.model.raw_predict(ArrayView1::from(x));
    let score = if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 };
    let confidence = if confidence.is_finite() {
      confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    } else {
      MIN_CONFIDENCE
    };
    Ok((score, confidence))
  }
}
