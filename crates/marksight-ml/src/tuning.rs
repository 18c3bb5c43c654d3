//! Deterministic grid search over a small per-family hyperparameter grid.

use ndarray::{ArrayView2, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{
  Result,
  boosting::BoostingParams,
  family::Hyperparameters,
  forest::ForestParams,
  metrics::RegressionMetrics,
  regressor::FittedModel,
  ridge::RidgeParams,
};

/// Below this many rows there is no meaningful hold-out; the base
/// parameters are returned unchanged.
pub const MIN_TUNING_ROWS: usize = 10;

const HOLDOUT_FRACTION: f64 = 0.2;

/// The grid searched for `base`'s family. Fields not on the grid keep the
/// values from `base`.
pub fn grid(base: &Hyperparameters) -> Vec<Hyperparameters> {
  match base {
    Hyperparameters::RandomForest(p) => [50, 100]
      .into_iter()
      .flat_map(|n_trees| {
        [6, 10].into_iter().map(move |max_depth| {
          Hyperparameters::RandomForest(ForestParams { n_trees, max_depth, ..p.clone() })
        })
      })
      .collect(),
    Hyperparameters::GradientBoosting(p) => [0.05, 0.1]
      .into_iter()
      .flat_map(|learning_rate| {
        [3, 6].into_iter().map(move |max_depth| {
          Hyperparameters::GradientBoosting(BoostingParams {
            learning_rate,
            max_depth,
            ..p.clone()
          })
        })
      })
      .collect(),
    Hyperparameters::Ridge(_) => [0.1, 1.0, 10.0]
      .into_iter()
      .map(|alpha| Hyperparameters::Ridge(RidgeParams { alpha }))
      .collect(),
  }
}

/// Pick the grid point with the lowest hold-out MAE on a seeded 80/20 split
/// of `x`. Ties keep the earlier grid point.
pub fn tune(
  base: &Hyperparameters,
  x: ArrayView2<'_, f64>,
  y: &[f64],
  seed: u64,
) -> Result<Hyperparameters> {
  let n = x.nrows();
  if n < MIN_TUNING_ROWS {
    return Ok(base.clone());
  }

  let mut order: Vec<usize> = (0..n).collect();
  order.shuffle(&mut StdRng::seed_from_u64(seed));
  let holdout = ((n as f64 * HOLDOUT_FRACTION).round() as usize).clamp(1, n - 1);
  let (val_rows, fit_rows) = order.split_at(holdout);

  let fit_x = x.select(Axis(0), fit_rows);
  let fit_y: Vec<f64> = fit_rows.iter().map(|&r| y[r]).collect();
  let val_y: Vec<f64> = val_rows.iter().map(|&r| y[r]).collect();

  let mut best: Option<(f64, Hyperparameters)> = None;
  for candidate in grid(base) {
    let (model, _) = FittedModel::fit(&candidate, fit_x.view(), &fit_y)?;
    let predicted: Vec<f64> = val_rows
      .iter()
      .map(|&r| model.score(x.row(r)).clamp(0.0, 100.0))
      .collect();
    let mae = RegressionMetrics::compute(&predicted, &val_y).mae;
    if best.as_ref().is_none_or(|(b, _)| mae < *b) {
      best = Some((mae, candidate));
    }
  }
  Ok(best.map(|(_, hp)| hp).unwrap_or_else(|| base.clone()))
}
