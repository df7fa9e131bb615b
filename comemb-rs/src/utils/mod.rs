pub mod clip;
pub mod seed;

use crate::error::Error;
use crate::error::Result;
use ndarray::ArrayView2;

/// Fail with a numerical-instability error instead of letting NaN or Inf
/// flow into the next phase.
pub fn ensure_finite(matrix: &ArrayView2<f32>, stage: &'static str) -> Result<()> {
  match matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
    None => Ok(()),
    Some(((row, col), v)) => Err(Error::NumericalInstability {
      stage,
      detail: format!("embedding entry ({row}, {col}) is {v}"),
    }),
  }
}
