//! Error types for community embedding training.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for model construction, training and persistence.
#[derive(Error, Debug)]
pub enum Error {
  /// A configuration parameter is missing or out of range.
  #[error("invalid configuration for `{field}`: {reason}")]
  Config { field: &'static str, reason: String },

  /// The adjacency list could not be parsed.
  #[error("malformed adjacency list at line {line}: {reason}")]
  GraphFormat { line: usize, reason: String },

  /// A walk file contains a token that is not a node id.
  #[error("malformed walk file {} at line {line}", path.display())]
  WalkFormat { path: PathBuf, line: usize },

  /// No walk files exist for the given base path.
  #[error("no walk files found for base path {}", base.display())]
  MissingWalks { base: PathBuf },

  /// Every node was pruned from the vocabulary.
  #[error("vocabulary is empty after pruning with min_count {min_count}")]
  EmptyVocabulary { min_count: u64 },

  /// Non-finite values or a covariance matrix that is not positive definite.
  #[error("numerical instability during {stage}: {detail}")]
  NumericalInstability { stage: &'static str, detail: String },

  /// The warm-start checkpoint is required but absent.
  #[error("warm-start checkpoint not found at {}", path.display())]
  MissingCheckpoint { path: PathBuf },

  /// A checkpoint was written with a different representation size.
  #[error("checkpoint has representation size {found} but configuration expects {expected}")]
  DimensionMismatch { expected: usize, found: usize },

  /// A checkpoint was written with a different number of communities.
  #[error("checkpoint has {found} communities but configuration expects {expected}")]
  CommunityMismatch { expected: usize, found: usize },

  /// IO error.
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// Checkpoint encoding or decoding failed.
  #[error("serialization error: {0}")]
  Serialization(#[from] bincode::Error),

  /// The worker pool could not be created.
  #[error("failed to build worker pool: {0}")]
  ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for community embedding operations.
pub type Result<T> = std::result::Result<T, Error>;
