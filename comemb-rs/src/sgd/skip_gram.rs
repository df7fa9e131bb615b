use crate::community::Communities;
use crate::distances::dot;
use crate::sgd::row_arena::RowArena;
use crate::utils::clip::log_sigmoid;
use crate::utils::clip::sigmoid;
use crate::vocab::NegativeTable;
use ndarray::ArrayView2;
use rand::Rng;
use typed_builder::TypedBuilder;

/// Community pull applied to the center's node embedding on every update.
#[derive(Clone, Copy)]
pub struct Regularizer<'s> {
  pub communities: &'s Communities,
  pub lambda: f32,
}

/// Per-worker buffers, allocated once per chunk of work.
pub struct Scratch {
  center: Vec<f32>,
  neu1e: Vec<f32>,
  penalty: Vec<f32>,
  diff: Vec<f64>,
}

impl Scratch {
  pub fn new(dim: usize) -> Self {
    Self {
      center: vec![0.0; dim],
      neu1e: vec![0.0; dim],
      penalty: vec![0.0; dim],
      diff: vec![0.0; dim],
    }
  }
}

/*
  One skip-gram-with-negative-sampling update for a (center, target) pair.

  The center's node embedding plays the input vector, the target and the
  drawn negatives play output vectors in the context embedding matrix:

      g      = (label - σ(center · out)) * alpha * objective_weight
      neu1e += g * out
      out   += g * center

  After all output vectors are updated the center receives neu1e, minus the
  scaled community gradient when a regularizer is present.

  Parameters
  ----------
  node_rows: arena over the node embedding matrix

  context_rows: arena over the context embedding matrix

  negatives: unigram^0.75 table to draw negatives from

  negative: int
      Negative samples per positive pair. Draws equal to the target are
      skipped.

  objective_weight: float (optional, default 1.0)
      Weight of this objective (λ1 for the context objective).

  regularizer: optional community pull with its effective λ2
*/
#[derive(TypedBuilder)]
pub struct SkipGramStep<'s, 'a> {
  node_rows: &'s RowArena<'a>,
  context_rows: &'s RowArena<'a>,
  negatives: &'s NegativeTable,
  negative: usize,
  #[builder(default = 1.0)]
  objective_weight: f32,
  #[builder(default)]
  regularizer: Option<Regularizer<'s>>,
}

impl SkipGramStep<'_, '_> {
  pub fn train_pair<R: Rng>(
    &self,
    center: usize,
    target: usize,
    alpha: f32,
    rng: &mut R,
    scratch: &mut Scratch,
  ) {
    self.node_rows.read(center, &mut scratch.center);
    scratch.neu1e.fill(0.0);

    let rate = alpha * self.objective_weight;
    if rate != 0.0 {
      self.update_output(target, 1.0, rate, scratch);
      for _ in 0..self.negative {
        let sample = self.negatives.sample(rng);
        if sample == target {
          continue;
        }
        self.update_output(sample, 0.0, rate, scratch);
      }
    }

    let mut pull = 0.0;
    if let Some(reg) = self.regularizer {
      if reg.lambda != 0.0
        && reg
          .communities
          .gradient(center, &scratch.center, &mut scratch.penalty, &mut scratch.diff)
      {
        pull = alpha * reg.lambda;
      }
    }

    let Scratch { neu1e, penalty, .. } = scratch;
    self.node_rows.update(center, |row| {
      if pull != 0.0 {
        for ((v, &e), &p) in row.iter_mut().zip(neu1e.iter()).zip(penalty.iter()) {
          *v += e - pull * p;
        }
      } else {
        for (v, &e) in row.iter_mut().zip(neu1e.iter()) {
          *v += e;
        }
      }
    });
  }

  #[inline]
  fn update_output(&self, output: usize, label: f32, rate: f32, scratch: &mut Scratch) {
    let Scratch { center, neu1e, .. } = scratch;
    self.context_rows.update(output, |row| {
      let f: f32 = row.iter().zip(center.iter()).map(|(a, b)| a * b).sum();
      let g = (label - sigmoid(f)) * rate;
      for ((v, &c), e) in row.iter_mut().zip(center.iter()).zip(neu1e.iter_mut()) {
        *e += g * *v;
        *v += g * c;
      }
    });
  }
}

/// Negative log-likelihood of one (center, target) pair and `negative`
/// draws, read-only.
pub fn pair_loss<R: Rng>(
  node_embedding: &ArrayView2<f32>,
  context_embedding: &ArrayView2<f32>,
  negatives: &NegativeTable,
  negative: usize,
  center: usize,
  target: usize,
  rng: &mut R,
) -> f64 {
  let c = node_embedding.row(center).to_vec();
  let score = |output: usize| -> f64 {
    let o = context_embedding.row(output).to_vec();
    dot(&c, &o) as f64
  };

  let mut loss = -log_sigmoid(score(target));
  for _ in 0..negative {
    let sample = negatives.sample(rng);
    if sample == target {
      continue;
    }
    loss -= log_sigmoid(-score(sample));
  }
  loss
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::vocab::Vocabulary;
  use ndarray::Array2;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn setup() -> (Array2<f32>, Array2<f32>, NegativeTable) {
    let vocab = Vocabulary::build((0..4).map(|n| (n, 1)), 0, 0.0).unwrap();
    let table = NegativeTable::build(&vocab, 16).unwrap();
    let node = Array2::from_shape_fn((4, 3), |(i, j)| 0.05 * (i as f32 - j as f32));
    let context = Array2::from_shape_fn((4, 3), |(i, j)| 0.03 * (j as f32 + i as f32));
    (node, context, table)
  }

  #[test]
  fn positive_pair_moves_vectors_together() {
    let (mut node, mut context, table) = setup();
    let before = dot(&node.row(1).to_vec(), &context.row(2).to_vec());
    {
      let node_rows = RowArena::new(&mut node);
      let context_rows = RowArena::new(&mut context);
      let step = SkipGramStep::builder()
        .node_rows(&node_rows)
        .context_rows(&context_rows)
        .negatives(&table)
        .negative(0)
        .build();
      let mut scratch = Scratch::new(3);
      let mut rng = StdRng::seed_from_u64(1);
      for _ in 0..20 {
        step.train_pair(1, 2, 0.5, &mut rng, &mut scratch);
      }
    }
    let after = dot(&node.row(1).to_vec(), &context.row(2).to_vec());
    assert!(after > before);
  }

  #[test]
  fn zero_weight_leaves_matrices_untouched() {
    let (mut node, mut context, table) = setup();
    let (node0, context0) = (node.clone(), context.clone());
    {
      let node_rows = RowArena::new(&mut node);
      let context_rows = RowArena::new(&mut context);
      let step = SkipGramStep::builder()
        .node_rows(&node_rows)
        .context_rows(&context_rows)
        .negatives(&table)
        .negative(3)
        .objective_weight(0.0)
        .build();
      let mut scratch = Scratch::new(3);
      let mut rng = StdRng::seed_from_u64(2);
      step.train_pair(0, 1, 0.5, &mut rng, &mut scratch);
    }
    assert_eq!(node, node0);
    assert_eq!(context, context0);
  }

  #[test]
  fn pair_loss_is_deterministic_for_a_fixed_seed() {
    let (node, context, table) = setup();
    let a = pair_loss(&node.view(), &context.view(), &table, 5, 0, 3, &mut StdRng::seed_from_u64(9));
    let b = pair_loss(&node.view(), &context.view(), &table, 5, 0, 3, &mut StdRng::seed_from_u64(9));
    assert_eq!(a, b);
    assert!(a > 0.0);
  }
}
