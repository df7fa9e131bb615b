//! Node vocabulary and the unigram negative-sampling table.

use crate::error::Error;
use crate::error::Result;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

/// Exponent applied to occurrence counts when building the sampling table.
pub const NEGATIVE_POWER: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VocabEntry {
  /// Row of this node in both embedding matrices.
  pub index: usize,
  /// Occurrence count (degree or walk frequency).
  pub count: u64,
  /// Probability of keeping an occurrence of this node in a walk.
  pub keep_probability: f32,
}

/// Mapping from node id to embedding row, count and down-sampling
/// probability. Rows are ordered by descending count, ties by node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
  entries: HashMap<u32, VocabEntry>,
  labels: Vec<u32>,
  total_count: u64,
  down_sample: f64,
}

impl Vocabulary {
  /// Build the vocabulary from occurrence counts, pruning nodes whose count
  /// is below `min_count`, and precompute keep-probabilities.
  pub fn build(
    counts: impl IntoIterator<Item = (u32, u64)>,
    min_count: u64,
    down_sample: f64,
  ) -> Result<Self> {
    let mut retained: Vec<(u32, u64)> = counts
      .into_iter()
      .filter(|&(_, count)| count >= min_count)
      .collect();
    if retained.is_empty() {
      return Err(Error::EmptyVocabulary { min_count });
    }
    retained.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let total_count: u64 = retained.iter().map(|&(_, c)| c).sum();
    let threshold = down_sample * total_count as f64;

    let mut entries = HashMap::with_capacity(retained.len());
    let mut labels = Vec::with_capacity(retained.len());
    for (index, &(label, count)) in retained.iter().enumerate() {
      let keep_probability = if threshold > 0.0 && count > 0 {
        let c = count as f64;
        (((c / threshold).sqrt() + 1.0) * threshold / c).min(1.0) as f32
      } else {
        1.0
      };
      entries.insert(
        label,
        VocabEntry {
          index,
          count,
          keep_probability,
        },
      );
      labels.push(label);
    }

    Ok(Self {
      entries,
      labels,
      total_count,
      down_sample,
    })
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, node: u32) -> Option<&VocabEntry> {
    self.entries.get(&node)
  }

  /// Embedding row of `node`, or `None` if it was pruned or never seen.
  pub fn index(&self, node: u32) -> Option<usize> {
    self.entries.get(&node).map(|e| e.index)
  }

  /// Node id stored at embedding row `index`.
  pub fn label(&self, index: usize) -> u32 {
    self.labels[index]
  }

  /// Node ids in row order.
  pub fn labels(&self) -> &[u32] {
    &self.labels
  }

  pub fn count(&self, index: usize) -> u64 {
    self.entries[&self.labels[index]].count
  }

  pub fn total_count(&self) -> u64 {
    self.total_count
  }

  pub fn down_sample(&self) -> f64 {
    self.down_sample
  }

  pub fn keep_probability(&self, index: usize) -> f32 {
    self.entries[&self.labels[index]].keep_probability
  }

  /// Draw whether one occurrence of the node at `index` survives
  /// down-sampling.
  pub fn keep<R: Rng>(&self, index: usize, rng: &mut R) -> bool {
    let p = self.keep_probability(index);
    p >= 1.0 || rng.random::<f32>() < p
  }
}

/// Precomputed table for O(1) draws from the count^0.75 distribution.
///
/// Every node with a positive count owns at least one slot; the remaining
/// slots are distributed proportionally. Nodes with a zero count never
/// appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativeTable {
  table: Vec<u32>,
}

impl NegativeTable {
  pub fn build(vocab: &Vocabulary, table_size: usize) -> Result<Self> {
    let candidates: Vec<(usize, f64)> = (0..vocab.len())
      .filter(|&index| vocab.count(index) > 0)
      .map(|index| (index, (vocab.count(index) as f64).powf(NEGATIVE_POWER)))
      .collect();

    if candidates.is_empty() {
      return Err(Error::Config {
        field: "vocabulary_counts",
        reason: "no node has a positive count".to_string(),
      });
    }
    if candidates.len() > table_size {
      return Err(Error::Config {
        field: "table_size",
        reason: format!(
          "{} nodes with positive count do not fit into {} slots",
          candidates.len(),
          table_size
        ),
      });
    }

    let spare = table_size - candidates.len();
    let total: f64 = candidates.iter().map(|&(_, w)| w).sum();

    let mut table = Vec::with_capacity(table_size);
    let mut cumulative = 0.0;
    let mut assigned_spare = 0usize;
    for (i, &(index, weight)) in candidates.iter().enumerate() {
      cumulative += weight;
      let spare_end = if i + 1 == candidates.len() {
        spare
      } else {
        ((cumulative / total) * spare as f64).round() as usize
      }
      .clamp(assigned_spare, spare);
      let slots = 1 + spare_end - assigned_spare;
      assigned_spare = spare_end;
      table.extend(std::iter::repeat_n(index as u32, slots));
    }

    debug_assert_eq!(table.len(), table_size);
    Ok(Self { table })
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  /// Draw one embedding row.
  #[inline]
  pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
    self.table[rng.random_range(0..self.table.len())] as usize
  }

  pub fn slots(&self) -> &[u32] {
    &self.table
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  #[test]
  fn pruned_node_is_never_sampled() {
    let a = 0u32;
    let b = 1u32;
    let vocab = Vocabulary::build([(a, 10), (b, 1)], 2, 0.0).unwrap();

    assert_eq!(vocab.len(), 1);
    assert!(vocab.index(b).is_none());
    let a_index = vocab.index(a).unwrap();

    let table = NegativeTable::build(&vocab, 1000).unwrap();
    assert_eq!(table.len(), 1000);
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10_000 {
      assert_eq!(table.sample(&mut rng), a_index);
    }
  }

  #[test]
  fn everything_pruned_is_an_error() {
    let err = Vocabulary::build([(1, 1), (2, 1)], 5, 0.0).unwrap_err();
    assert!(matches!(err, Error::EmptyVocabulary { min_count: 5 }));
  }

  #[test]
  fn rows_ordered_by_count() {
    let vocab = Vocabulary::build([(5, 1), (3, 9), (4, 9)], 0, 0.0).unwrap();
    assert_eq!(vocab.labels(), &[3, 4, 5]);
    assert_eq!(vocab.total_count(), 19);
  }

  #[test]
  fn zero_count_nodes_stay_out_of_table() {
    let vocab = Vocabulary::build([(0, 0), (1, 4), (2, 0)], 0, 0.0).unwrap();
    assert_eq!(vocab.len(), 3);
    let table = NegativeTable::build(&vocab, 64).unwrap();
    let one = vocab.index(1).unwrap() as u32;
    assert!(table.slots().iter().all(|&slot| slot == one));
  }

  #[test]
  fn table_too_small_is_rejected() {
    let vocab = Vocabulary::build((0..10).map(|n| (n, 1)), 0, 0.0).unwrap();
    assert!(NegativeTable::build(&vocab, 5).is_err());
  }

  #[test]
  fn frequent_node_is_down_sampled() {
    // One hub dominating the corpus next to many rare nodes.
    let counts = std::iter::once((0u32, 100_000u64)).chain((1..=100).map(|n| (n, 10)));
    let sample = 0.001;
    let vocab = Vocabulary::build(counts, 0, sample).unwrap();

    let hub = vocab.index(0).unwrap();
    let total = vocab.total_count() as f64;
    let threshold = sample * total;
    let c = 100_000.0;
    let expected = ((c / threshold).sqrt() + 1.0) * threshold / c;
    assert!(expected < 1.0);
    assert!((vocab.keep_probability(hub) as f64 - expected).abs() < 1e-6);

    let mut rng = StdRng::seed_from_u64(11);
    let draws = 200_000;
    let kept = (0..draws).filter(|_| vocab.keep(hub, &mut rng)).count();
    let observed = kept as f64 / draws as f64;
    assert!(
      (observed - expected).abs() < 0.01,
      "observed keep rate {observed}, expected {expected}"
    );

    let rare = vocab.index(1).unwrap();
    assert_eq!(vocab.keep_probability(rare), 1.0);
  }

  proptest! {
    #[test]
    fn table_has_exact_size_and_covers_positive_counts(
      counts in proptest::collection::vec(0u64..50, 1..40),
      extra in 0usize..500,
    ) {
      let positive = counts.iter().filter(|&&c| c > 0).count();
      prop_assume!(positive > 0);
      let vocab = Vocabulary::build(
        counts.iter().enumerate().map(|(n, &c)| (n as u32, c)),
        0,
        0.0,
      ).unwrap();
      let size = positive + extra;
      let table = NegativeTable::build(&vocab, size).unwrap();

      prop_assert_eq!(table.len(), size);
      for &slot in table.slots() {
        prop_assert!(vocab.count(slot as usize) > 0);
      }
      for index in 0..vocab.len() {
        if vocab.count(index) > 0 {
          prop_assert!(table.slots().contains(&(index as u32)));
        }
      }
    }
  }
}
