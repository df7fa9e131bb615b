//! Walk-based skip-gram.

use crate::config::ComEmbConfig;
use crate::error::Result;
use crate::model::Model;
use crate::sgd::decayed_learning_rate;
use crate::sgd::row_arena::RowArena;
use crate::sgd::skip_gram::pair_loss;
use crate::sgd::skip_gram::Regularizer;
use crate::sgd::skip_gram::Scratch;
use crate::sgd::skip_gram::SkipGramStep;
use crate::utils::ensure_finite;
use crate::utils::seed::derive_seed;
use crate::vocab::Vocabulary;
use crate::walks::WalkCorpus;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;
use tracing::info;

/// Walks read from the corpus before a parallel batch is dispatched.
const WALK_BATCH: usize = 512;
const LOSS_STREAM: u64 = 0x6374_7874;

/// Trains node embeddings of walk centers against the context embeddings
/// of the nodes around them in the walk.
pub struct ContextTrainer {
  window_size: usize,
  negative: usize,
  learning_rate: f32,
  min_learning_rate_ratio: f32,
  seed: u64,
  calls: AtomicU64,
  pool: ThreadPool,
}

/// Map a walk to embedding rows, dropping unknown nodes and, when enabled,
/// down-sampled occurrences.
fn resolve_walk<R: Rng>(vocab: &Vocabulary, walk: &[u32], rng: &mut R) -> Vec<usize> {
  walk
    .iter()
    .filter_map(|&node| vocab.index(node))
    .filter(|&index| vocab.keep(index, rng))
    .collect()
}

/// Visit every (center, context) pair of a resolved walk, full window on
/// both sides.
fn for_each_pair(rows: &[usize], window: usize, mut f: impl FnMut(usize, usize)) {
  for (i, &center) in rows.iter().enumerate() {
    let lo = i.saturating_sub(window);
    let hi = (i + window + 1).min(rows.len());
    for (j, &context) in rows.iter().enumerate().take(hi).skip(lo) {
      if j != i {
        f(center, context);
      }
    }
  }
}

impl ContextTrainer {
  pub fn new(
    workers: usize,
    window_size: usize,
    negative: usize,
    learning_rate: f32,
    min_learning_rate_ratio: f32,
    seed: u64,
  ) -> Result<Self> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    Ok(Self {
      window_size,
      negative,
      learning_rate,
      min_learning_rate_ratio,
      seed,
      calls: AtomicU64::new(0),
      pool,
    })
  }

  pub fn from_config(config: &ComEmbConfig) -> Result<Self> {
    Self::new(
      config.training.num_workers,
      config.skip_gram.window_size,
      config.skip_gram.negative,
      config.skip_gram.context_learning_rate,
      config.skip_gram.min_learning_rate_ratio,
      derive_seed(config.training.seed, &[2]),
    )
  }

  pub fn window_size(&self) -> usize {
    self.window_size
  }

  /// One pass over `corpus`.
  ///
  /// `total_words` is the expected number of walk positions and only
  /// schedules the learning-rate decay; a corpus that turns out longer
  /// keeps training at the floor rate. `lambda_1` weights the context
  /// objective, `lambda_2` the community pull (already scaled for one pair
  /// update).
  pub fn train(
    &self,
    model: &mut Model,
    corpus: &dyn WalkCorpus,
    total_words: usize,
    lambda_1: f32,
    lambda_2: f32,
  ) -> Result<()> {
    let call = self.calls.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    info!(
      total_words,
      window = self.window_size,
      lambda_1,
      lambda_2,
      "training context embedding"
    );

    let processed = AtomicUsize::new(0);
    let mut walks_seen = 0usize;
    {
      let parts = model.embedding_parts_mut();
      let vocab = parts.vocab;
      let dim = parts.node_embedding.ncols();
      let regularizer = (lambda_2 != 0.0 && parts.communities.is_fitted()).then_some(Regularizer {
        communities: parts.communities,
        lambda: lambda_2,
      });
      let node_rows = RowArena::new(parts.node_embedding);
      let context_rows = RowArena::new(parts.context_embedding);
      let step = SkipGramStep::builder()
        .node_rows(&node_rows)
        .context_rows(&context_rows)
        .negatives(parts.negatives)
        .negative(self.negative)
        .objective_weight(lambda_1)
        .regularizer(regularizer)
        .build();

      let mut walks = corpus.walks()?;
      let mut batch: Vec<Vec<u32>> = Vec::with_capacity(WALK_BATCH);
      for batch_no in 0u64.. {
        batch.clear();
        for walk in walks.by_ref().take(WALK_BATCH) {
          batch.push(walk?);
        }
        if batch.is_empty() {
          break;
        }
        walks_seen += batch.len();

        self.pool.install(|| {
          batch.par_iter().enumerate().for_each(|(slot, walk)| {
            let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, &[call, batch_no, slot as u64]));
            let done = processed.fetch_add(walk.len(), Ordering::Relaxed);
            let alpha = decayed_learning_rate(
              self.learning_rate,
              done,
              total_words,
              self.min_learning_rate_ratio,
            );
            let rows = resolve_walk(vocab, walk, &mut rng);
            let mut scratch = Scratch::new(dim);
            for_each_pair(&rows, self.window_size, |center, context| {
              step.train_pair(center, context, alpha, &mut rng, &mut scratch);
            });
          });
        });
      }
    }

    let words = processed.into_inner();
    if words != total_words {
      debug!(words, total_words, "corpus length differs from estimate");
    }
    ensure_finite(&model.node_embedding(), "context embedding training")?;
    ensure_finite(&model.context_embedding(), "context embedding training")?;
    info!(
      duration_ms = started.elapsed().as_millis(),
      walks = walks_seen,
      words,
      "context embedding complete"
    );
    Ok(())
  }

  /// Weighted skip-gram negative log-likelihood over one pass of `corpus`
  /// plus `lambda_2` times the community regularizer. Negatives and
  /// down-sampling draws come from a fixed stream; the model is not
  /// modified.
  pub fn loss(&self, model: &Model, corpus: &dyn WalkCorpus, lambda_1: f32, lambda_2: f32) -> Result<f64> {
    let node = model.node_embedding();
    let context = model.context_embedding();
    let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, &[LOSS_STREAM]));
    let mut pair_rng = StdRng::seed_from_u64(derive_seed(self.seed, &[LOSS_STREAM, 1]));

    let mut loss = 0.0;
    for walk in corpus.walks()? {
      let rows = resolve_walk(model.vocab(), &walk?, &mut rng);
      for_each_pair(&rows, self.window_size, |center, target| {
        loss += pair_loss(
          &node,
          &context,
          model.negatives(),
          self.negative,
          center,
          target,
          &mut pair_rng,
        );
      });
    }
    loss *= lambda_1 as f64;
    if lambda_2 != 0.0 {
      loss += lambda_2 as f64 * model.communities().regularization_loss(&node);
    }
    Ok(loss)
  }
}
