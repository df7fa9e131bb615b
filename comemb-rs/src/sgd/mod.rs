pub mod row_arena;
pub mod skip_gram;

/// Linearly decayed learning rate with a floor.
///
/// `processed` may exceed `total` when the corpus size was only estimated;
/// the rate then stays at the floor.
#[inline]
pub fn decayed_learning_rate(initial: f32, processed: usize, total: usize, floor_ratio: f32) -> f32 {
  let progress = processed as f32 / (total as f32 + 1.0);
  (initial * (1.0 - progress)).max(initial * floor_ratio)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn learning_rate_decays_to_floor() {
    assert_eq!(decayed_learning_rate(0.1, 0, 100, 0.0001), 0.1);
    let mid = decayed_learning_rate(0.1, 50, 100, 0.0001);
    assert!(mid < 0.1 && mid > 0.04);
    let floor = 0.1 * 0.0001;
    assert!(decayed_learning_rate(0.1, 100, 100, 0.0001) > floor);
    // Estimated totals may be exceeded.
    assert_eq!(decayed_learning_rate(0.1, 10_000, 100, 0.0001), floor);
  }
}
