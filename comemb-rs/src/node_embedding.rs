//! Structural skip-gram over graph edges.

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
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;
use tracing::info;

/// Edges handed to one worker at a time.
const EDGE_CHUNK: usize = 1024;
const LOSS_STREAM: u64 = 0x6E6F_6465;

/// Trains node embeddings so that the endpoints of every edge score high
/// against each other, with an optional pull toward the fitted communities.
pub struct NodeTrainer {
  negative: usize,
  learning_rate: f32,
  min_learning_rate_ratio: f32,
  seed: u64,
  calls: AtomicU64,
  pool: ThreadPool,
}

impl NodeTrainer {
  pub fn new(
    workers: usize,
    negative: usize,
    learning_rate: f32,
    min_learning_rate_ratio: f32,
    seed: u64,
  ) -> Result<Self> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    Ok(Self {
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
      config.skip_gram.negative,
      config.skip_gram.node_learning_rate,
      config.skip_gram.min_learning_rate_ratio,
      derive_seed(config.training.seed, &[1]),
    )
  }

  /// Map edge endpoints to embedding rows, dropping edges that touch a
  /// pruned or unknown node.
  fn resolve(model: &Model, edges: &[(u32, u32)]) -> Vec<(usize, usize)> {
    let vocab = model.vocab();
    edges
      .iter()
      .filter_map(|&(u, v)| Some((vocab.index(u)?, vocab.index(v)?)))
      .collect()
  }

  /// Run `iter` epochs over `edges`, each in a fresh random order, with
  /// community weight `lambda_2` (already scaled for one edge update).
  ///
  /// Every `(u, v)` moves the node embedding of `u` and the context
  /// embedding of `v`; pass both directions of an undirected edge (see
  /// [`Graph::arcs`](crate::graph::Graph::arcs)) to train both endpoints.
  ///
  /// With `lambda_2 == 0` the community parameters are not read.
  pub fn train(&self, model: &mut Model, edges: &[(u32, u32)], iter: usize, lambda_2: f32) -> Result<()> {
    let call = self.calls.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let resolved = Self::resolve(model, edges);
    let skipped = edges.len() - resolved.len();
    if skipped > 0 {
      debug!(skipped, "edges touching pruned nodes skipped");
    }
    if resolved.is_empty() || iter == 0 {
      debug!(edges = resolved.len(), iter, "nothing to train");
      return Ok(());
    }

    info!(
      edges = resolved.len(),
      iter, lambda_2, "training node embedding"
    );

    let total = iter * resolved.len();
    let processed = AtomicUsize::new(0);
    let parts = model.embedding_parts_mut();
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
      .regularizer(regularizer)
      .build();

    let mut order = resolved;
    for epoch in 0..iter {
      let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, &[call, epoch as u64]));
      order.shuffle(&mut rng);

      self.pool.install(|| {
        order
          .par_chunks(EDGE_CHUNK)
          .enumerate()
          .for_each(|(chunk_no, chunk)| {
            let mut rng = StdRng::seed_from_u64(derive_seed(
              self.seed,
              &[call, epoch as u64, chunk_no as u64 + 1],
            ));
            let mut scratch = Scratch::new(dim);
            for &(u, v) in chunk {
              let done = processed.fetch_add(1, Ordering::Relaxed);
              let alpha = decayed_learning_rate(self.learning_rate, done, total, self.min_learning_rate_ratio);
              step.train_pair(u, v, alpha, &mut rng, &mut scratch);
            }
          });
      });
    }
    drop(step);
    drop(node_rows);
    drop(context_rows);

    ensure_finite(&model.node_embedding(), "node embedding training")?;
    ensure_finite(&model.context_embedding(), "node embedding training")?;
    info!(
      duration_ms = started.elapsed().as_millis(),
      updates = total,
      "node embedding complete"
    );
    Ok(())
  }

  /// Skip-gram negative log-likelihood over `edges` plus `lambda_2` times
  /// the community regularizer. Negatives come from a fixed stream, so the
  /// value only changes when the model does.
  pub fn loss(&self, model: &Model, edges: &[(u32, u32)], lambda_2: f32) -> f64 {
    let node = model.node_embedding();
    let context = model.context_embedding();
    let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, &[LOSS_STREAM]));

    let mut loss = 0.0;
    for (u, v) in Self::resolve(model, edges) {
      loss += pair_loss(&node, &context, model.negatives(), self.negative, u, v, &mut rng);
    }
    if lambda_2 != 0.0 {
      loss += lambda_2 as f64 * model.communities().regularization_loss(&node);
    }
    loss
  }
}
