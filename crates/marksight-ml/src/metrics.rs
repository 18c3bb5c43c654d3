//! Regression error metrics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
  pub mae:      f64,
  pub rmse:     f64,
  /// `1 − mae / 100`; negative when the mean error exceeds 100 points.
  pub accuracy: f64,
  pub samples:  usize,
}

impl RegressionMetrics {
  /// Metrics of `predicted` against `actual`, paired by position. Empty input
  /// yields zero error over zero samples.
  pub fn compute(predicted: &[f64], actual: &[f64]) -> Self {
    let n = predicted.len().min(actual.len());
    if n == 0 {
      return Self { mae: 0.0, rmse: 0.0, accuracy: 1.0, samples: 0 };
    }
    let (abs, sq) = predicted
      .iter()
      .zip(actual)
      .fold((0.0, 0.0), |(a, s), (p, y)| {
        let e = p - y;
        (a + e.abs(), s + e * e)
      });
    let mae = abs / n as f64;
    Self {
      mae,
      rmse: (sq / n as f64).sqrt(),
      accuracy: accuracy_from_mae(mae),
      samples: n,
    }
  }
}

pub fn accuracy_from_mae(mae: f64) -> f64 { 1.0 - mae / 100.0 }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn metrics_of_known_errors() {
    let m = RegressionMetrics::compute(&[50.0, 60.0, 70.0], &[52.0, 56.0, 70.0]);
    assert!((m.mae - 2.0).abs() < 1e-12);
    assert!((m.rmse - (20.0f64 / 3.0).sqrt()).abs() < 1e-12);
    assert!((m.accuracy - 0.98).abs() < 1e-12);
    assert_eq!(m.samples, 3);
  }

  #[test]
  fn accuracy_can_go_negative() {
    assert!(accuracy_from_mae(150.0) < 0.0);
  }
}
