//! Ridge regression on standardised features, fitted with `linfa-elasticnet`
//! at an L1 ratio of zero.

use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgeParams {
  /// Penalty on the squared coefficients, against the summed (not averaged)
  /// squared error.
  pub alpha: f64,
}

impl Default for RidgeParams {
  fn default() -> Self { Self { alpha: 1.0 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeModel {
  intercept: f64,
  means:     Vec<f64>,
  scales:    Vec<f64>,
  /// Coefficients in standardised units; zero for constant columns.
  weights:   Vec<f64>,
}

impl RidgeModel {
  /// Returns `None` for an empty training set or when the solver rejects the
  /// problem (a negative `alpha`, non-finite inputs).
  pub fn fit(
    x: ArrayView2<'_, f64>,
    y: &[f64],
    params: &RidgeParams,
  ) -> Option<(Self, Vec<f64>)> {
    let (n, p) = x.dim();
    if n == 0 || y.len() != n {
      return None;
    }
    let means: Vec<f64> = x.mean_axis(Axis(0))?.to_vec();
    let scales: Vec<f64> = x
      .axis_iter(Axis(1))
      .zip(&means)
      .map(|(col, m)| {
        let var = col.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n as f64;
        if var > 1e-12 { var.sqrt() } else { 0.0 }
      })
      .collect();

    // Constant columns carry no signal and stay out of the solve.
    let active: Vec<usize> = (0..p).filter(|&j| scales[j] > 0.0).collect();
    let targets = Array1::from(y.to_vec());
    let mut weights = vec![0.0; p];
    let intercept = if active.is_empty() {
      crate::stats::mean(y)
    } else {
      let z = Array2::from_shape_fn((n, active.len()), |(i, k)| {
        let j = active[k];
        (x[[i, j]] - means[j]) / scales[j]
      });
      let fitted = ElasticNet::params()
        .penalty(params.alpha / n as f64)
        .l1_ratio(0.0)
        .tolerance(1e-10)
        .max_iterations(10_000)
        .fit(&Dataset::new(z, targets))
        .ok()?;
      for (k, &j) in active.iter().enumerate() {
        weights[j] = fitted.hyperplane()[k];
      }
      fitted.intercept()
    };
    if !intercept.is_finite() || weights.iter().any(|w| !w.is_finite()) {
      return None;
    }

    let mut importance: Vec<f64> = weights.iter().map(|w| w.abs()).collect();
    crate::tree::normalise(&mut importance);
    Some((Self { intercept, means, scales, weights }, importance))
  }

  pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
    self.intercept
      + self
        .weights
        .iter()
        .enumerate()
        .filter(|&(j, _)| self.scales[j] > 0.0)
        .map(|(j, w)| w * (row[j] - self.means[j]) / self.scales[j])
        .sum::<f64>()
  }
}
