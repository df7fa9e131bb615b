use crate::community::Communities;
use crate::config::ComEmbConfig;
use crate::error::Error;
use crate::error::Result;
use crate::vocab::NegativeTable;
use crate::vocab::Vocabulary;
use ndarray::Array2;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::info;
use typed_builder::TypedBuilder;

/// Shared state of the joint optimization.
///
/// Owns the vocabulary, the negative-sampling table, both embedding matrices
/// (num_nodes × representation_size, row `i` belongs to vocabulary row `i`)
/// and the community parameters. It is mutated in place by the three trainers
/// and saved or loaded only as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
  vocab: Vocabulary,
  negatives: NegativeTable,
  node_embedding: Array2<f32>,
  context_embedding: Array2<f32>,
  communities: Communities,
  representation_size: usize,
  rounds_completed: usize,
}

/// Disjoint borrows handed to the skip-gram trainers.
pub(crate) struct EmbeddingParts<'m> {
  pub vocab: &'m Vocabulary,
  pub negatives: &'m NegativeTable,
  pub communities: &'m Communities,
  pub node_embedding: &'m mut Array2<f32>,
  pub context_embedding: &'m mut Array2<f32>,
}

/*
  Construct a model from vocabulary counts.

  Parameters
  ----------
  counts: map of node id -> occurrence count
      Degrees, or walk frequencies when down-sampling.

  representation_size: int
      Dimensionality of both embedding matrices.

  k: int
      Number of mixture components.

  min_count: int (optional, default 0)
      Nodes with a smaller count are pruned.

  table_size: int (optional, default 1_000_000)
      Slots in the negative-sampling table.

  down_sample: float (optional, default 0.0)
      Down-sampling threshold; 0 disables.

  reg_covar: float (optional, default 1e-5)
      Diagonal loading of the covariance matrices.

  seed: int (optional, default 42)
      Seed for the uniform embedding initialization.
*/
#[derive(TypedBuilder)]
pub struct InitModel<'a> {
  counts: &'a HashMap<u32, u64>,
  representation_size: usize,
  k: usize,
  #[builder(default = 0)]
  min_count: u64,
  #[builder(default = 1_000_000)]
  table_size: usize,
  #[builder(default = 0.0)]
  down_sample: f64,
  #[builder(default = 0.00001)]
  reg_covar: f64,
  #[builder(default = 42)]
  seed: u64,
}

impl InitModel<'_> {
  pub fn exec(self) -> Result<Model> {
    let Self {
      counts,
      representation_size,
      k,
      min_count,
      table_size,
      down_sample,
      reg_covar,
      seed,
    } = self;

    if representation_size == 0 {
      return Err(Error::Config {
        field: "representation_size",
        reason: "must be >= 1".to_string(),
      });
    }
    if k == 0 {
      return Err(Error::Config {
        field: "k",
        reason: "must be >= 1".to_string(),
      });
    }

    let started = Instant::now();
    let vocab = Vocabulary::build(
      counts.iter().map(|(&node, &count)| (node, count)),
      min_count,
      down_sample,
    )?;
    let negatives = NegativeTable::build(&vocab, table_size)?;

    let n = vocab.len();
    let bound = 0.5 / representation_size as f32;
    let mut rng = StdRng::seed_from_u64(seed);
    let node_embedding = Array2::from_shape_fn((n, representation_size), |_| {
      rng.random_range(-bound..bound)
    });
    let context_embedding = Array2::from_shape_fn((n, representation_size), |_| {
      rng.random_range(-bound..bound)
    });

    info!(
      duration_ms = started.elapsed().as_millis(),
      nodes = n,
      pruned = counts.len() - n,
      representation_size,
      k,
      "model initialized"
    );

    Ok(Model {
      vocab,
      negatives,
      node_embedding,
      context_embedding,
      communities: Communities::new(k, representation_size, reg_covar),
      representation_size,
      rounds_completed: 0,
    })
  }
}

impl Model {
  /// Construct from a validated configuration and vocabulary counts.
  pub fn from_config(config: &ComEmbConfig, counts: &HashMap<u32, u64>) -> Result<Self> {
    InitModel::builder()
      .counts(counts)
      .representation_size(config.skip_gram.representation_size)
      .k(config.community.k)
      .min_count(config.skip_gram.min_count)
      .table_size(config.skip_gram.table_size)
      .down_sample(config.skip_gram.down_sample)
      .reg_covar(config.community.reg_covar)
      .seed(config.training.seed)
      .build()
      .exec()
  }

  pub fn num_nodes(&self) -> usize {
    self.vocab.len()
  }

  pub fn representation_size(&self) -> usize {
    self.representation_size
  }

  /// Number of communities.
  pub fn k(&self) -> usize {
    self.communities.k()
  }

  pub fn vocab(&self) -> &Vocabulary {
    &self.vocab
  }

  pub fn negatives(&self) -> &NegativeTable {
    &self.negatives
  }

  pub fn node_embedding(&self) -> ArrayView2<'_, f32> {
    self.node_embedding.view()
  }

  pub fn context_embedding(&self) -> ArrayView2<'_, f32> {
    self.context_embedding.view()
  }

  pub fn communities(&self) -> &Communities {
    &self.communities
  }

  /// Alternating rounds completed so far.
  pub fn rounds_completed(&self) -> usize {
    self.rounds_completed
  }

  /// Record one finished community → node → context round.
  pub fn mark_round_complete(&mut self) {
    self.rounds_completed += 1;
  }

  pub(crate) fn embedding_parts_mut(&mut self) -> EmbeddingParts<'_> {
    EmbeddingParts {
      vocab: &self.vocab,
      negatives: &self.negatives,
      communities: &self.communities,
      node_embedding: &mut self.node_embedding,
      context_embedding: &mut self.context_embedding,
    }
  }

  pub(crate) fn community_parts_mut(&mut self) -> (&Array2<f32>, &mut Communities) {
    (&self.node_embedding, &mut self.communities)
  }

  /// Embedding of one node id, if it survived pruning.
  pub fn embedding_of(&self, node: u32) -> Option<ndarray::ArrayView1<'_, f32>> {
    self
      .vocab
      .index(node)
      .map(|index| self.node_embedding.row(index))
  }

  /// Write the whole aggregate as a bincode checkpoint.
  pub fn save(&self, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }
    let started = Instant::now();
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, self)?;
    writer.flush()?;
    info!(
      duration_ms = started.elapsed().as_millis(),
      path = %path.display(),
      "checkpoint saved"
    );
    Ok(())
  }

  /// Read a checkpoint, rejecting it when its dimensionality is not
  /// `representation_size`.
  pub fn load(path: &Path, representation_size: usize) -> Result<Self> {
    let reader = BufReader::new(File::open(path)?);
    let model: Model = bincode::deserialize_from(reader)?;

    if model.representation_size != representation_size {
      return Err(Error::DimensionMismatch {
        expected: representation_size,
        found: model.representation_size,
      });
    }
    let n = model.vocab.len();
    for matrix in [&model.node_embedding, &model.context_embedding] {
      if matrix.dim() != (n, representation_size) {
        return Err(Error::DimensionMismatch {
          expected: representation_size,
          found: matrix.ncols(),
        });
      }
    }
    info!(
      path = %path.display(),
      nodes = n,
      rounds_completed = model.rounds_completed,
      "checkpoint loaded"
    );
    Ok(model)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ring_counts() -> HashMap<u32, u64> {
    (0..4).map(|n| (n, 2)).collect()
  }

  fn small_model(size: usize) -> Model {
    InitModel::builder()
      .counts(&ring_counts())
      .representation_size(size)
      .k(2)
      .table_size(100)
      .build()
      .exec()
      .unwrap()
  }

  #[test]
  fn embeddings_start_in_small_uniform_range() {
    let model = small_model(8);
    let bound = 0.5 / 8.0;
    assert_eq!(model.node_embedding().dim(), (4, 8));
    assert_eq!(model.context_embedding().dim(), (4, 8));
    assert!(model.node_embedding().iter().all(|v| v.abs() <= bound));
    assert!(model.context_embedding().iter().all(|v| v.abs() <= bound));
    assert_ne!(model.node_embedding(), model.context_embedding());
  }

  #[test]
  fn checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("ring.bin");
    let model = small_model(3);
    model.save(&path).unwrap();

    let loaded = Model::load(&path, 3).unwrap();
    assert_eq!(loaded, model);
    assert_eq!(loaded.node_embedding(), model.node_embedding());
    assert_eq!(loaded.communities(), model.communities());
  }

  #[test]
  fn load_rejects_other_dimensionality() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring.bin");
    small_model(3).save(&path).unwrap();

    let err = Model::load(&path, 4).unwrap_err();
    assert!(matches!(
      err,
      Error::DimensionMismatch {
        expected: 4,
        found: 3
      }
    ));
  }

  #[test]
  fn embedding_lookup_by_node_id() {
    let model = small_model(2);
    assert!(model.embedding_of(3).is_some());
    assert!(model.embedding_of(99).is_none());
  }
}
