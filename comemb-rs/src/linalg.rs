//! Dense factorizations of the d × d covariance matrices, on top of
//! `nalgebra`'s Cholesky decomposition.

use nalgebra::Cholesky;
use nalgebra::DMatrix;
use nalgebra::Dyn;
use ndarray::Array2;
use ndarray::ArrayView2;

/// Cholesky factorization `A = L Lᵀ` of a symmetric positive definite
/// matrix.
pub struct SpdFactor {
  chol: Cholesky<f64, Dyn>,
}

impl SpdFactor {
  /// Returns `None` when `a` is not positive definite or holds non-finite
  /// values.
  pub fn new(a: &ArrayView2<f64>) -> Option<Self> {
    // nalgebra only rejects non-positive pivots, NaN slips through.
    if a.iter().any(|v| !v.is_finite()) {
      return None;
    }
    let (rows, cols) = a.dim();
    let matrix = DMatrix::from_fn(rows, cols, |i, j| a[(i, j)]);
    Cholesky::new(matrix).map(|chol| Self { chol })
  }

  /// `A⁻¹`, exactly symmetric.
  pub fn inverse(&self) -> Array2<f64> {
    let inv = self.chol.inverse();
    let inv = Array2::from_shape_fn(inv.shape(), |(i, j)| inv[(i, j)]);
    symmetrize(&inv.view())
  }

  /// `log |A|`.
  pub fn log_det(&self) -> f64 {
    // Only the diagonal of the factor is read, so the unzeroed upper
    // triangle is fine.
    2.0 * self.chol.l_dirty().diagonal().iter().map(|v| v.ln()).sum::<f64>()
  }
}

/// `(A + Aᵀ) / 2`, exactly symmetric since float addition commutes.
pub fn symmetrize(a: &ArrayView2<f64>) -> Array2<f64> {
  (a + &a.t()) / 2.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn inverse_of_spd_matrix() {
    let a = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
    let inv = SpdFactor::new(&a.view()).unwrap().inverse();
    let eye = a.dot(&inv);
    for i in 0..3 {
      for j in 0..3 {
        let expected = if i == j { 1.0 } else { 0.0 };
        assert!((eye[(i, j)] - expected).abs() < 1e-10);
      }
    }
    assert_eq!(inv, inv.t());
  }

  #[test]
  fn log_det_matches_determinant() {
    let a = array![[2.0, 0.0], [0.0, 8.0]];
    let factor = SpdFactor::new(&a.view()).unwrap();
    assert!((factor.log_det() - 16.0f64.ln()).abs() < 1e-12);

    // det = 4·5 - 2·2
    let b = array![[4.0, 2.0], [2.0, 5.0]];
    let factor = SpdFactor::new(&b.view()).unwrap();
    assert!((factor.log_det() - 16.0f64.ln()).abs() < 1e-12);
  }

  #[test]
  fn rejects_indefinite_and_non_finite() {
    assert!(SpdFactor::new(&array![[1.0, 2.0], [2.0, 1.0]].view()).is_none());
    assert!(SpdFactor::new(&array![[0.0, 0.0], [0.0, 1.0]].view()).is_none());
    assert!(SpdFactor::new(&array![[f64::NAN, 0.0], [0.0, 1.0]].view()).is_none());
    assert!(SpdFactor::new(&array![[1.0, 0.0], [0.0, f64::INFINITY]].view()).is_none());
  }
}
