//! Small numeric helpers shared by feature extraction and the regressors.
//!
//! All functions are total: degenerate inputs yield `None` or `0.0` instead
//! of NaN.

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};

pub fn mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

/// Sample standard deviation (n − 1 denominator). `None` below two samples.
pub fn sample_std(xs: &[f64]) -> Option<f64> {
  if xs.len() < 2 {
    return None;
  }
  let m = mean(xs);
  let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
  Some((ss / (xs.len() - 1) as f64).sqrt())
}

/// Population variance (n denominator); zero for an empty slice.
pub fn population_variance(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    return 0.0;
  }
  let m = mean(xs);
  xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64
}

/// Least-squares slope of `ys` against their index `0, 1, …, n-1`.
pub fn linear_slope(ys: &[f64]) -> f64 {
  let n = ys.len();
  if n < 2 {
    return 0.0;
  }
  let x_mean = (n - 1) as f64 / 2.0;
  let y_mean = mean(ys);
  let (mut num, mut den) = (0.0, 0.0);
  for (i, y) in ys.iter().enumerate() {
    let dx = i as f64 - x_mean;
    num += dx * (y - y_mean);
    den += dx * dx;
  }
  if den > 0.0 { num / den } else { 0.0 }
}

/// Least-squares quadratic `a·x² + b·x + c` of `ys` against their index,
/// fitted with `linfa-linear` over an `[x², x]` design. Returns `[a, b, c]`;
/// needs at least three points.
pub fn quadratic_fit(ys: &[f64]) -> Option<[f64; 3]> {
  if ys.len() < 3 || ys.iter().any(|y| !y.is_finite()) {
    return None;
  }
  let design = Array2::from_shape_fn((ys.len(), 2), |(i, j)| {
    let x = i as f64;
    if j == 0 { x * x } else { x }
  });
  let fitted = LinearRegression::new()
    .fit(&Dataset::new(design, Array1::from(ys.to_vec())))
    .ok()?;
  let coef = [fitted.params()[0], fitted.params()[1], fitted.intercept()];
  coef.iter().all(|c| c.is_finite()).then_some(coef)
}

/// Pearson correlation; 0 with fewer than two pairs or zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
  let n = xs.len().min(ys.len());
  if n < 2 {
    return 0.0;
  }
  let (xs, ys) = (&xs[..n], &ys[..n]);
  let (mx, my) = (mean(xs), mean(ys));
  let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
  for (x, y) in xs.iter().zip(ys) {
    sxy += (x - mx) * (y - my);
    sxx += (x - mx) * (x - mx);
    syy += (y - my) * (y - my);
  }
  let den = (sxx * syy).sqrt();
  if den > 0.0 && den.is_finite() { sxy / den } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: f64, b: f64) -> bool { (a - b).abs() < 1e-9 }

  #[test]
  fn std_needs_two_samples() {
    assert_eq!(sample_std(&[5.0]), None);
    assert!(close(sample_std(&[2.0, 4.0]).unwrap(), 2f64.sqrt()));
  }

  #[test]
  fn slope_of_a_line() {
    assert!(close(linear_slope(&[1.0, 3.0, 5.0, 7.0]), 2.0));
    assert_eq!(linear_slope(&[4.0]), 0.0);
  }

  #[test]
  fn quadratic_recovers_coefficients() {
    let ys: Vec<f64> = (0..6)
      .map(|x| {
        let x = f64::from(x);
        0.5 * x * x - 2.0 * x + 3.0
      })
      .collect();
    let [a, b, c] = quadratic_fit(&ys).unwrap();
    assert!((a - 0.5).abs() < 1e-6);
    assert!((b + 2.0).abs() < 1e-6);
    assert!((c - 3.0).abs() < 1e-6);
  }

  #[test]
  fn pearson_degenerate_inputs_are_zero() {
    assert_eq!(pearson(&[1.0], &[2.0]), 0.0);
    assert_eq!(pearson(&[1.0, 1.0, 1.0], &[2.0, 3.0, 4.0]), 0.0);
    assert!(close(pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 1.0));
    assert!(close(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), -1.0));
  }

  #[test]
  fn quadratic_through_three_points_is_exact() {
    let [a, b, c] = quadratic_fit(&[70.0, 60.0, 70.0]).unwrap();
    assert!((a - 10.0).abs() < 1e-6);
    assert!((b + 20.0).abs() < 1e-6);
    assert!((c - 70.0).abs() < 1e-6);
  }

  #[test]
  fn quadratic_needs_three_finite_points() {
    assert_eq!(quadratic_fit(&[1.0, 2.0]), None);
    assert_eq!(quadratic_fit(&[1.0, f64::NAN, 3.0]), None);
  }
}
