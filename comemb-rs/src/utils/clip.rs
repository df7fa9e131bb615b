/// Dot products beyond this magnitude saturate the sigmoid.
pub const MAX_EXP: f32 = 6.0;

/*
  Standard clamping of a value into a fixed range (in this case -MAX_EXP to
  MAX_EXP), so the logistic gradient never saturates to exactly 0 or 1.

  Parameters
  ----------
  val: float
      The value to be clamped.

  Returns
  -------
  The clamped value, now fixed to be in the range -MAX_EXP to MAX_EXP.
*/
#[inline(always)]
pub fn clip(val: f32) -> f32 {
  // OPTIMIZATION: fast path for the common case (no clipping needed)
  if val > -MAX_EXP && val < MAX_EXP {
    val
  } else if val <= -MAX_EXP {
    -MAX_EXP
  } else {
    MAX_EXP
  }
}

#[inline(always)]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-clip(x)).exp())
}

/// `ln σ(x)` without overflow for large |x|.
#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
  if x >= 0.0 {
    -(-x).exp().ln_1p()
  } else {
    x - x.exp().ln_1p()
  }
}
