//! Joint node, context and community embeddings for graphs.
//!
//! Three coupled representations are learned over one graph:
//!
//! - **node embeddings**, a skip-gram with negative sampling over edges,
//! - **context embeddings**, a skip-gram with negative sampling over random
//!   walks,
//! - **communities**, a Gaussian mixture over the node embedding space whose
//!   fitted parameters pull every node toward its communities during the
//!   embedding updates.
//!
//! The three are optimized in alternating rounds by the [`Orchestrator`].
//!
//! # Example
//!
//! ```ignore
//! use comemb_rs::{ComEmbConfig, Graph, Orchestrator};
//!
//! let graph = Graph::load_adjacency_list("karate.adjlist".as_ref(), true)?;
//! let mut config = ComEmbConfig::default();
//! config.skip_gram.representation_size = 2;
//! config.community.k = 2;
//!
//! let model = Orchestrator::from_graph(config, &graph)?.run()?;
//! let embedding = model.node_embedding();
//! let communities = model.communities().assignments();
//! ```
//!
//! # Features
//!
//! - **Parallel SGD**: every trainer runs on its own rayon pool; embedding
//!   rows are updated under per-row locks so no row is ever torn
//! - **Restartable walk corpus**: walks are streamed from disk on every pass
//! - **Checkpoints**: the whole model round-trips through bincode
//! - **Seeded**: all randomness derives from configured seeds
//!
//! # Public API
//!
//! * [`Orchestrator`] - Alternating optimization state machine
//! * [`Model`] - Shared embeddings, vocabulary and communities
//! * [`NodeTrainer`], [`ContextTrainer`], [`CommunityTrainer`] - The learners
//! * [`ComEmbConfig`] - Configuration parameters
//! * [`Graph`] - Adjacency-list graph
//! * [`WalkCorpus`] - Restartable walk source

// Public modules
pub mod community;
pub mod config;
pub mod context_embedding;
pub mod error;
pub mod export;
pub mod graph;
pub mod model;
pub mod node_embedding;
pub mod orchestrator;
pub mod vocab;
pub mod walks;

// Public re-exports (primary API)
pub use community::Communities;
pub use community::CommunityTrainer;
pub use config::ComEmbConfig;
pub use config::CommunityParams;
pub use config::OutputParams;
pub use config::RegularizationScaling;
pub use config::SkipGramParams;
pub use config::TrainingParams;
pub use config::WalkParams;
pub use context_embedding::ContextTrainer;
pub use error::Error;
pub use error::Result;
pub use graph::Graph;
pub use model::InitModel;
pub use model::Model;
pub use node_embedding::NodeTrainer;
pub use orchestrator::Orchestrator;
pub use orchestrator::Stage;
pub use walks::FileWalkCorpus;
pub use walks::MemoryWalkCorpus;
pub use walks::WalkCorpus;

// Internal modules (not exposed)
mod distances;
mod linalg;
mod sgd;
mod utils;
