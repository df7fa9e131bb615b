//! The alternating joint optimization.
//!
//! ```text
//! Init ─▶ Pretrain ─▶ Iterate{0} ─▶ Iterate{1} ─▶ ... ─▶ Iterate{num_iter} ─▶ Done
//! ```
//!
//! `Pretrain` either trains the warm-start embeddings without community
//! regularization and checkpoints them, or loads that checkpoint. Every
//! `Iterate` round runs the community, node and context trainers strictly in
//! that order; the last transition persists the final model.

use crate::community::CommunityTrainer;
use crate::config::ComEmbConfig;
use crate::context_embedding::ContextTrainer;
use crate::error::Error;
use crate::error::Result;
use crate::export::save_communities;
use crate::export::save_embedding;
use crate::graph::Graph;
use crate::model::Model;
use crate::node_embedding::NodeTrainer;
use crate::utils::seed::derive_seed;
use crate::walks::count_walk_occurrences;
use crate::walks::write_walks_to_disk;
use crate::walks::FileWalkCorpus;
use crate::walks::WalkCorpus;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Init,
  Pretrain,
  Iterate { round: usize },
  Done,
}

/// Drives the three trainers over one shared [`Model`].
///
/// The orchestrator owns the model for its whole lifetime, so no two
/// trainers can ever run on it at the same time.
pub struct Orchestrator<'g, C: WalkCorpus> {
  config: ComEmbConfig,
  /// (source, target) pairs for the node trainer, both directions for
  /// undirected graphs.
  arcs: Vec<(u32, u32)>,
  num_nodes: usize,
  num_edges: usize,
  corpus: C,
  model: Model,
  node_trainer: NodeTrainer,
  context_trainer: ContextTrainer,
  community_trainer: CommunityTrainer,
  stage: Stage,
  graph: &'g Graph,
}

impl<'g> Orchestrator<'g, FileWalkCorpus> {
  /// Sample walks to `<output_dir>/<output_name>.walks.<worker>` (or reuse
  /// existing walk files when `sample_walks` is off) and build the
  /// vocabulary from walk occurrences when down-sampling, from node degrees
  /// otherwise.
  pub fn from_graph(config: ComEmbConfig, graph: &'g Graph) -> Result<Self> {
    config.validate()?;
    let base = config
      .output
      .output_dir
      .join(format!("{}.walks", config.output.output_name));

    let corpus = if config.training.sample_walks {
      write_walks_to_disk(
        graph,
        &base,
        config.walks.number_walks,
        config.walks.walk_length,
        config.walks.alpha,
        config.walks.seed,
        config.training.num_workers,
      )?
    } else {
      FileWalkCorpus::discover(&base)?
    };

    let counts = if config.skip_gram.down_sample > 0.0 {
      count_walk_occurrences(corpus.files(), config.training.num_workers)?
    } else {
      graph.degree_counts()
    };
    Self::new(config, graph, corpus, &counts)
  }
}

impl<'g, C: WalkCorpus> Orchestrator<'g, C> {
  /// Validate the configuration and construct the model and trainers.
  pub fn new(config: ComEmbConfig, graph: &'g Graph, corpus: C, counts: &HashMap<u32, u64>) -> Result<Self> {
    config.validate()?;
    let model = Model::from_config(&config, counts)?;
    let node_trainer = NodeTrainer::from_config(&config)?;
    let context_trainer = ContextTrainer::from_config(&config)?;
    let community_trainer = CommunityTrainer::new(
      config.training.num_workers,
      config.community.em_sweeps,
      derive_seed(config.training.seed, &[3]),
    )?;
    let arcs = graph.arcs();
    if arcs.is_empty() {
      warn!("graph has no edges, node trainer will not update anything");
    }

    info!(
      nodes = graph.num_nodes(),
      edges = graph.num_edges(),
      vocabulary = model.num_nodes(),
      k = config.community.k,
      workers = config.training.num_workers,
      "orchestrator initialized"
    );
    Ok(Self {
      num_nodes: graph.num_nodes(),
      num_edges: graph.num_edges(),
      config,
      arcs,
      corpus,
      model,
      node_trainer,
      context_trainer,
      community_trainer,
      stage: Stage::Init,
      graph,
    })
  }

  pub fn stage(&self) -> Stage {
    self.stage
  }

  pub fn model(&self) -> &Model {
    &self.model
  }

  pub fn config(&self) -> &ComEmbConfig {
    &self.config
  }

  pub fn graph(&self) -> &'g Graph {
    self.graph
  }

  pub fn into_model(self) -> Model {
    self.model
  }

  /// `<output_dir>/<name>_comEmb_init`
  pub fn init_checkpoint_path(&self) -> PathBuf {
    let output = &self.config.output;
    output
      .output_dir
      .join(format!("{}_comEmb_init", output.output_name))
  }

  /// `<output_dir>/<name>_comEmb_l1-<λ1>_l2-<λ2>_ds-<ds>_it-<round>`
  pub fn round_checkpoint_path(&self, round: usize) -> PathBuf {
    let output = &self.config.output;
    let training = &self.config.training;
    output.output_dir.join(format!(
      "{}_comEmb_l1-{}_l2-{}_ds-{}_it-{}",
      output.output_name,
      training.lambda_1,
      training.lambda_2,
      self.config.skip_gram.down_sample,
      round
    ))
  }

  /// Walk positions the context trainer schedules its decay over.
  fn context_total(&self) -> usize {
    self.config.context_total_path(self.num_nodes)
  }

  /// Node trainer epochs per call: walk positions per graph edge, at least
  /// one. An epoch visits every edge from both endpoints when undirected.
  fn node_iterations(&self) -> usize {
    if self.num_edges == 0 {
      return 0;
    }
    (self.context_total() / self.num_edges).max(1)
  }

  /// Perform the work of the current stage and advance. Returns the new
  /// stage; stepping in `Done` does nothing.
  pub fn step(&mut self) -> Result<Stage> {
    let next = match self.stage {
      Stage::Init => Stage::Pretrain,
      Stage::Pretrain => {
        self.pretrain()?;
        Stage::Iterate { round: 0 }
      }
      Stage::Iterate { round } if round < self.config.training.num_iter => {
        self.iterate(round)?;
        Stage::Iterate { round: round + 1 }
      }
      Stage::Iterate { .. } => {
        self.finish()?;
        Stage::Done
      }
      Stage::Done => return Ok(Stage::Done),
    };
    info!(from = ?self.stage, to = ?next, "stage transition");
    self.stage = next;
    Ok(next)
  }

  /// Step until `Done` and hand back the trained model.
  pub fn run(mut self) -> Result<Model> {
    let started = Instant::now();
    while self.step()? != Stage::Done {}
    info!(
      duration_ms = started.elapsed().as_millis(),
      rounds = self.model.rounds_completed(),
      "joint optimization complete"
    );
    Ok(self.model)
  }

  fn pretrain(&mut self) -> Result<()> {
    let path = self.init_checkpoint_path();
    if !self.config.training.pretraining {
      if !path.is_file() {
        return Err(Error::MissingCheckpoint { path });
      }
      let model = Model::load(&path, self.config.skip_gram.representation_size)?;
      if model.k() != self.config.community.k {
        return Err(Error::CommunityMismatch {
          expected: self.config.community.k,
          found: model.k(),
        });
      }
      info!(path = %path.display(), "warm start from pretrained model");
      self.model = model;
      return Ok(());
    }

    let started = Instant::now();
    let node_iter = self.node_iterations();
    let context_total = self.context_total();
    self
      .node_trainer
      .train(&mut self.model, &self.arcs, node_iter, 0.0)?;
    self
      .context_trainer
      .train(&mut self.model, &self.corpus, context_total, 1.0, 0.0)?;
    info!(
      duration_ms = started.elapsed().as_millis(),
      "pretraining complete"
    );

    self.model.save(&path)?;
    save_embedding(&with_suffix(&path, "emb"), &self.model)?;
    Ok(())
  }

  fn iterate(&mut self, round: usize) -> Result<()> {
    let started = Instant::now();
    let training = &self.config.training;
    let scaling = self.config.community.regularization_scaling;
    let k = self.config.community.k;
    let lambda_1 = training.lambda_1;
    let node_lambda_2 = scaling.node_weight(training.lambda_2, k);
    let context_lambda_2 = scaling.context_weight(training.lambda_2, k, self.context_trainer.window_size());
    info!(
      round,
      lambda_1,
      node_lambda_2,
      context_lambda_2,
      "round started"
    );

    self.community_trainer.train(&mut self.model)?;
    let node_iter = self.node_iterations();
    let context_total = self.context_total();
    self
      .node_trainer
      .train(&mut self.model, &self.arcs, node_iter, node_lambda_2)?;
    self.context_trainer.train(
      &mut self.model,
      &self.corpus,
      context_total,
      lambda_1,
      context_lambda_2,
    )?;
    self.model.mark_round_complete();

    if self.config.training.report_loss {
      let community = self.community_trainer.loss(&self.model)?;
      let node = self
        .node_trainer
        .loss(&self.model, &self.arcs, node_lambda_2);
      let context = self
        .context_trainer
        .loss(&self.model, &self.corpus, lambda_1, context_lambda_2)?;
      info!(round, community, node, context, "round losses");
    }
    if self.config.training.checkpoint_every_round {
      self.model.save(&self.round_checkpoint_path(round))?;
    }
    info!(
      round,
      duration_ms = started.elapsed().as_millis(),
      "round complete"
    );
    Ok(())
  }

  fn finish(&mut self) -> Result<()> {
    let rounds = self.model.rounds_completed();
    let path = self.round_checkpoint_path(rounds);
    self.model.save(&path)?;
    save_embedding(&with_suffix(&path, "emb"), &self.model)?;
    save_communities(&with_suffix(&path, "communities"), &self.model)?;
    Ok(())
  }
}

/// `<path>.<suffix>`, keeping any dots already in the file name.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.as_os_str().to_owned();
  name.push(".");
  name.push(suffix);
  PathBuf::from(name)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(dir: &Path) -> ComEmbConfig {
    let mut config = ComEmbConfig::default();
    config.output.output_dir = dir.to_path_buf();
    config.output.output_name = "ring".to_string();
    config.training.num_workers = 2;
    config.training.num_iter = 2;
    config.skip_gram.representation_size = 2;
    config.skip_gram.window_size = 2;
    config.skip_gram.negative = 1;
    config.skip_gram.table_size = 100;
    config.walks.number_walks = 2;
    config.walks.walk_length = 5;
    config.community.reg_covar = 0.001;
    config
  }

  #[test]
  fn checkpoint_names() {
    let dir = tempfile::tempdir().unwrap();
    let graph = Graph::from_edges(&[(0, 1), (1, 2)], &[], true);
    let mut config = config(dir.path());
    config.training.lambda_2 = 0.5;
    let orchestrator = Orchestrator::from_graph(config, &graph).unwrap();
    assert_eq!(
      orchestrator.init_checkpoint_path(),
      dir.path().join("ring_comEmb_init")
    );
    assert_eq!(
      orchestrator.round_checkpoint_path(3),
      dir.path().join("ring_comEmb_l1-1_l2-0.5_ds-0_it-3")
    );
  }

  #[test]
  fn stages_advance_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let graph = Graph::from_edges(&[(0, 1), (1, 2), (2, 3), (3, 0)], &[], true);
    let mut orchestrator = Orchestrator::from_graph(config(dir.path()), &graph).unwrap();
    assert_eq!(orchestrator.stage(), Stage::Init);

    let mut seen = vec![orchestrator.stage()];
    while orchestrator.stage() != Stage::Done {
      seen.push(orchestrator.step().unwrap());
    }
    assert_eq!(
      seen,
      vec![
        Stage::Init,
        Stage::Pretrain,
        Stage::Iterate { round: 0 },
        Stage::Iterate { round: 1 },
        Stage::Iterate { round: 2 },
        Stage::Done,
      ]
    );
    assert_eq!(orchestrator.step().unwrap(), Stage::Done);
    assert_eq!(orchestrator.model().rounds_completed(), 2);
    assert!(orchestrator.model().communities().is_fitted());
    assert!(orchestrator.init_checkpoint_path().is_file());
    assert!(orchestrator.round_checkpoint_path(0).is_file());
    assert!(orchestrator.round_checkpoint_path(2).is_file());
  }

  #[test]
  fn node_iterations_follow_context_length() {
    let dir = tempfile::tempdir().unwrap();
    let graph = Graph::from_edges(&[(0, 1), (1, 2), (2, 3), (3, 0)], &[], true);
    let orchestrator = Orchestrator::from_graph(config(dir.path()), &graph).unwrap();
    // 4 nodes * 2 walks * 5 steps over 4 edges.
    assert_eq!(orchestrator.node_iterations(), 10);
    assert_eq!(orchestrator.arcs.len(), 8);
  }
}
