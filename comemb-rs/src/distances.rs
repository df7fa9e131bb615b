use ndarray::ArrayView1;
use ndarray::ArrayView2;

/// Dot product of two embedding rows.
/// OPTIMIZATION: iterator form so the loop auto-vectorizes
#[inline(always)]
pub fn dot(x: &[f32], y: &[f32]) -> f32 {
  x.iter().zip(y.iter()).map(|(a, b)| a * b).sum()
}

/// Write `x - mean` into `diff`, widening to f64.
#[inline]
pub fn centered(x: &[f32], mean: &ArrayView1<f64>, diff: &mut [f64]) {
  for ((d, &xi), &mi) in diff.iter_mut().zip(x.iter()).zip(mean.iter()) {
    *d = xi as f64 - mi;
  }
}

/// Squared Mahalanobis distance `diffᵀ P diff` for a precision matrix `P`.
#[inline]
pub fn mahalanobis_sq(diff: &[f64], precision: &ArrayView2<f64>) -> f64 {
  let mut total = 0.0;
  for (a, row) in precision.outer_iter().enumerate() {
    let projected: f64 = row.iter().zip(diff.iter()).map(|(p, d)| p * d).sum();
    total += diff[a] * projected;
  }
  total
}
