use crate::error::Error;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;
use std::path::PathBuf;

/// Configuration for random-walk sampling.
///
/// These parameters control how the walk corpus consumed by the context
/// trainer is generated, and how large the corpus is assumed to be when
/// scheduling learning-rate decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkParams {
  /// Number of walks started from every node.
  ///
  /// Default: 10
  pub number_walks: usize,

  /// Number of nodes in each walk.
  ///
  /// Default: 80
  pub walk_length: usize,

  /// Probability of restarting at the start node on every step.
  ///
  /// Must be in range [0.0, 1.0).
  ///
  /// Default: 0.0
  pub alpha: f64,

  /// Seed for walk sampling.
  ///
  /// Default: 9999999999
  pub seed: u64,
}

impl Default for WalkParams {
  fn default() -> Self {
    Self {
      number_walks: 10,
      walk_length: 80,
      alpha: 0.0,
      seed: 9_999_999_999,
    }
  }
}

/// Configuration shared by both skip-gram objectives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipGramParams {
  /// Dimensionality of node and context embeddings.
  ///
  /// Must be >= 1.
  ///
  /// Default: 128
  pub representation_size: usize,

  /// Number of positions on each side of a walk center that count as context.
  ///
  /// Must be >= 1.
  ///
  /// Default: 10
  pub window_size: usize,

  /// Number of negative samples drawn per positive pair.
  ///
  /// Default: 5
  pub negative: usize,

  /// Initial learning rate of the structural (edge) objective.
  ///
  /// Default: 0.1
  pub node_learning_rate: f32,

  /// Initial learning rate of the walk context objective.
  ///
  /// Default: 0.025
  pub context_learning_rate: f32,

  /// Floor of the decayed learning rate, as a fraction of the initial rate.
  ///
  /// Default: 0.0001
  pub min_learning_rate_ratio: f32,

  /// Number of slots in the negative-sampling table.
  ///
  /// Default: 1_000_000
  pub table_size: usize,

  /// Nodes with fewer occurrences are pruned from the vocabulary.
  ///
  /// Default: 0
  pub min_count: u64,

  /// Down-sampling threshold for frequent nodes in walks. 0 disables.
  ///
  /// Default: 0.0
  pub down_sample: f64,
}

impl Default for SkipGramParams {
  fn default() -> Self {
    Self {
      representation_size: 128,
      window_size: 10,
      negative: 5,
      node_learning_rate: 0.1,
      context_learning_rate: 0.025,
      min_learning_rate_ratio: 0.0001,
      table_size: 1_000_000,
      min_count: 0,
      down_sample: 0.0,
    }
  }
}

/// How the community regularization weight is distributed over the
/// individual gradient updates of each trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegularizationScaling {
  /// λ2 / k per edge for the node trainer and λ2 / (k * window_size) per
  /// (center, context) pair for the context trainer, so every occurrence of a
  /// center receives a comparable total pull.
  Normalized,
  /// λ2 applied unchanged on every update.
  Raw,
}

impl RegularizationScaling {
  /// Effective weight for one edge update of the node trainer.
  pub fn node_weight(self, lambda_2: f32, k: usize) -> f32 {
    match self {
      Self::Normalized => lambda_2 / k as f32,
      Self::Raw => lambda_2,
    }
  }

  /// Effective weight for one pair update of the context trainer.
  pub fn context_weight(self, lambda_2: f32, k: usize, window_size: usize) -> f32 {
    match self {
      Self::Normalized => lambda_2 / (k * window_size) as f32,
      Self::Raw => lambda_2,
    }
  }
}

/// Configuration of the Gaussian mixture over node embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityParams {
  /// Number of mixture components (communities).
  ///
  /// Must be >= 1.
  ///
  /// Default: 2
  pub k: usize,

  /// Diagonal loading added to every covariance matrix.
  ///
  /// Must be > 0.
  ///
  /// Default: 0.00001
  pub reg_covar: f64,

  /// Number of EM sweeps per community training call.
  ///
  /// Default: 1
  pub em_sweeps: usize,

  /// Distribution of λ2 over individual updates.
  ///
  /// Default: Normalized
  pub regularization_scaling: RegularizationScaling,
}

impl Default for CommunityParams {
  fn default() -> Self {
    Self {
      k: 2,
      reg_covar: 0.00001,
      em_sweeps: 1,
      regularization_scaling: RegularizationScaling::Normalized,
    }
  }
}

/// Configuration of the alternating optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
  /// Number of worker threads per trainer.
  ///
  /// Default: available parallelism
  pub num_workers: usize,

  /// Number of community → node → context rounds.
  ///
  /// Default: 5
  pub num_iter: usize,

  /// Weight of the context objective (λ1).
  ///
  /// Default: 1.0
  pub lambda_1: f32,

  /// Weight of the community regularization (λ2).
  ///
  /// Default: 0.0005
  pub lambda_2: f32,

  /// Run pretraining. When false, the warm-start checkpoint must exist.
  ///
  /// Default: true
  pub pretraining: bool,

  /// Sample fresh walks instead of reading previously written walk files.
  ///
  /// Default: true
  pub sample_walks: bool,

  /// Save a checkpoint after every round.
  ///
  /// Default: true
  pub checkpoint_every_round: bool,

  /// Compute and log the losses of all three objectives after every round.
  ///
  /// Default: false
  pub report_loss: bool,

  /// Seed for embedding initialization and stochastic updates.
  ///
  /// Default: 42
  pub seed: u64,
}

impl Default for TrainingParams {
  fn default() -> Self {
    Self {
      num_workers: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
      num_iter: 5,
      lambda_1: 1.0,
      lambda_2: 0.0005,
      pretraining: true,
      sample_walks: true,
      checkpoint_every_round: true,
      report_loss: false,
      seed: 42,
    }
  }
}

/// Where checkpoints, walks and exported embeddings are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
  /// Directory for all artifacts.
  ///
  /// Default: "data"
  pub output_dir: PathBuf,

  /// Base name for checkpoints and exports.
  ///
  /// Default: "graph"
  pub output_name: String,
}

impl Default for OutputParams {
  fn default() -> Self {
    Self {
      output_dir: PathBuf::from("data"),
      output_name: "graph".to_string(),
    }
  }
}

/// Complete configuration.
///
/// Groups all parameters of the joint optimization into one structure passed
/// to the orchestrator at construction. All groups have defaults and can be
/// customized individually.
///
/// # Example
///
/// ```ignore
/// use comemb_rs::config::{ComEmbConfig, SkipGramParams};
///
/// let config = ComEmbConfig {
///     skip_gram: SkipGramParams {
///         representation_size: 2,
///         window_size: 3,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// config.validate()?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComEmbConfig {
  pub walks: WalkParams,
  pub skip_gram: SkipGramParams,
  pub community: CommunityParams,
  pub training: TrainingParams,
  pub output: OutputParams,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> Error {
  Error::Config {
    field,
    reason: reason.into(),
  }
}

impl ComEmbConfig {
  /// Check every parameter before any work starts.
  pub fn validate(&self) -> Result<()> {
    let walks = &self.walks;
    if walks.number_walks == 0 {
      return Err(invalid("number_walks", "must be >= 1"));
    }
    if walks.walk_length < 2 {
      return Err(invalid("walk_length", "must be >= 2"));
    }
    if !(0.0..1.0).contains(&walks.alpha) {
      return Err(invalid(
        "alpha",
        format!("must be in [0, 1), got {}", walks.alpha),
      ));
    }

    let sg = &self.skip_gram;
    if sg.representation_size == 0 {
      return Err(invalid("representation_size", "must be >= 1"));
    }
    if sg.window_size == 0 {
      return Err(invalid("window_size", "must be >= 1"));
    }
    if sg.node_learning_rate.is_nan() || sg.node_learning_rate <= 0.0 {
      return Err(invalid(
        "node_learning_rate",
        format!("must be positive, got {}", sg.node_learning_rate),
      ));
    }
    if sg.context_learning_rate.is_nan() || sg.context_learning_rate <= 0.0 {
      return Err(invalid(
        "context_learning_rate",
        format!("must be positive, got {}", sg.context_learning_rate),
      ));
    }
    if !(0.0..=1.0).contains(&sg.min_learning_rate_ratio) {
      return Err(invalid(
        "min_learning_rate_ratio",
        format!("must be in [0, 1], got {}", sg.min_learning_rate_ratio),
      ));
    }
    if sg.table_size == 0 {
      return Err(invalid("table_size", "must be >= 1"));
    }
    if sg.down_sample.is_nan() || sg.down_sample < 0.0 {
      return Err(invalid(
        "down_sample",
        format!("cannot be negative, got {}", sg.down_sample),
      ));
    }

    let community = &self.community;
    if community.k == 0 {
      return Err(invalid("k", "must be >= 1"));
    }
    if community.reg_covar.is_nan() || community.reg_covar <= 0.0 {
      return Err(invalid(
        "reg_covar",
        format!("must be positive, got {}", community.reg_covar),
      ));
    }
    if community.em_sweeps == 0 {
      return Err(invalid("em_sweeps", "must be >= 1"));
    }

    let training = &self.training;
    if training.num_workers == 0 {
      return Err(invalid("num_workers", "must be >= 1"));
    }
    if training.lambda_1.is_nan() || training.lambda_1 < 0.0 {
      return Err(invalid(
        "lambda_1",
        format!("cannot be negative, got {}", training.lambda_1),
      ));
    }
    if training.lambda_2.is_nan() || training.lambda_2 < 0.0 {
      return Err(invalid(
        "lambda_2",
        format!("cannot be negative, got {}", training.lambda_2),
      ));
    }

    if self.output.output_name.is_empty() {
      return Err(invalid("output_name", "cannot be empty"));
    }

    Ok(())
  }

  /// Total number of walk positions, used to size the node trainer's epochs
  /// and to schedule the context trainer's learning rate.
  pub fn context_total_path(&self, num_nodes: usize) -> usize {
    num_nodes * self.walks.number_walks * self.walks.walk_length
  }
}
