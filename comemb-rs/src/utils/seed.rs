/// Mix a base seed with call/epoch/chunk coordinates into an independent
/// stream seed (splitmix64 finalizer).
pub fn derive_seed(base: u64, parts: &[u64]) -> u64 {
  parts.iter().fold(mix(base), |acc, &p| mix(acc ^ mix(p)))
}

#[inline]
fn mix(mut z: u64) -> u64 {
  z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
  z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
  z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coordinates_change_the_seed() {
    assert_eq!(derive_seed(1, &[2, 3]), derive_seed(1, &[2, 3]));
    assert_ne!(derive_seed(1, &[2, 3]), derive_seed(1, &[3, 2]));
    assert_ne!(derive_seed(1, &[0]), derive_seed(2, &[0]));
  }
}
