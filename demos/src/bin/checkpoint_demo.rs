/// Demonstration of checkpoint/resume with the individual trainers.
///
/// This example shows how to:
/// 1. Build a model from node degrees
/// 2. Pretrain node and context embeddings
/// 3. Run alternating rounds with checkpoints
/// 4. Resume training from a checkpoint
use comemb_rs::walks::random_walk;
use comemb_rs::CommunityTrainer;
use comemb_rs::ContextTrainer;
use comemb_rs::Graph;
use comemb_rs::InitModel;
use comemb_rs::MemoryWalkCorpus;
use comemb_rs::Model;
use comemb_rs::NodeTrainer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;

const WORKERS: usize = 2;
const DIM: usize = 4;
const K: usize = 2;
const WINDOW: usize = 3;
const LAMBDA_2: f32 = 0.05;

struct Trainers {
  node: NodeTrainer,
  context: ContextTrainer,
  community: CommunityTrainer,
}

/// Two 6-cliques joined by a single bridge.
fn barbell() -> Graph {
  let mut edges = Vec::new();
  for offset in [0u32, 6] {
    for u in 0..6 {
      for v in (u + 1)..6 {
        edges.push((offset + u, offset + v));
      }
    }
  }
  edges.push((5, 6));
  Graph::from_edges(&edges, &[], true)
}

fn round(
  trainers: &Trainers,
  model: &mut Model,
  edges: &[(u32, u32)],
  walks: &MemoryWalkCorpus,
  total_words: usize,
) -> comemb_rs::Result<()> {
  trainers.community.train(model)?;
  trainers.node.train(model, edges, 5, LAMBDA_2 / K as f32)?;
  trainers
    .context
    .train(model, walks, total_words, 1.0, LAMBDA_2 / (K * WINDOW) as f32)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();

  println!("ComEmb Checkpoint/Resume Demo");
  println!();

  let graph = barbell();
  let edges = graph.arcs();
  let mut rng = StdRng::seed_from_u64(7);
  let walks = MemoryWalkCorpus(
    (0..10)
      .flat_map(|_| graph.nodes().to_vec())
      .map(|node| random_walk(&graph, node, 10, 0.0, &mut rng))
      .collect(),
  );
  let total_words: usize = walks.0.iter().map(Vec::len).sum();
  println!(
    "Graph: {} nodes, {} edges, {} walks",
    graph.num_nodes(),
    edges.len(),
    walks.0.len()
  );

  let trainers = Trainers {
    node: NodeTrainer::new(WORKERS, 5, 0.1, 0.0001, 1)?,
    context: ContextTrainer::new(WORKERS, WINDOW, 5, 0.025, 0.0001, 2)?,
    community: CommunityTrainer::new(WORKERS, 1, 3)?,
  };

  // Phase 1: pretraining without community regularization
  println!();
  println!("=== Phase 1: Pretraining ===");
  let counts = graph.degree_counts();
  let mut model = InitModel::builder()
    .counts(&counts)
    .representation_size(DIM)
    .k(K)
    .table_size(10_000)
    .reg_covar(0.001)
    .build()
    .exec()?;
  trainers.node.train(&mut model, &edges, 20, 0.0)?;
  trainers.context.train(&mut model, &walks, total_words, 1.0, 0.0)?;
  println!(
    "  node loss {:.3}, context loss {:.3}",
    trainers.node.loss(&model, &edges, 0.0),
    trainers.context.loss(&model, &walks, 1.0, 0.0)?
  );

  // Phase 2: alternating rounds with checkpoints
  println!();
  println!("=== Phase 2: Alternating rounds with checkpoints ===");
  let total_rounds = 6;
  let checkpoint_interval = 2;
  while model.rounds_completed() < total_rounds {
    round(&trainers, &mut model, &edges, &walks, total_words)?;
    model.mark_round_complete();
    println!(
      "  Round {}/{} - community NLL {:.3}",
      model.rounds_completed(),
      total_rounds,
      trainers.community.loss(&model)?
    );

    if model.rounds_completed() % checkpoint_interval == 0 {
      let bytes = bincode::serialize(&model)?;
      let filename = format!("comemb_checkpoint_{:03}.bin", model.rounds_completed());
      fs::write(&filename, &bytes)?;
      println!("    Checkpoint saved: {} ({} bytes)", filename, bytes.len());
    }
  }
  println!("  Assignments: {:?}", model.communities().assignments());

  // Resume from the middle
  println!();
  println!("=== Resuming from round 4 ===");
  let bytes = fs::read("comemb_checkpoint_004.bin")?;
  let mut resumed: Model = bincode::deserialize(&bytes)?;
  println!(
    "Checkpoint loaded at round {}/{}",
    resumed.rounds_completed(),
    total_rounds
  );
  while resumed.rounds_completed() < total_rounds {
    round(&trainers, &mut resumed, &edges, &walks, total_words)?;
    resumed.mark_round_complete();
    println!("  Round {}/{}", resumed.rounds_completed(), total_rounds);
  }
  println!("  Assignments: {:?}", resumed.communities().assignments());

  // The same model through the file API, which also checks dimensionality.
  model.save("comemb_final.bin".as_ref())?;
  let reloaded = Model::load("comemb_final.bin".as_ref(), DIM)?;
  println!();
  println!(
    "Final model reloaded: {} nodes x {} dims",
    reloaded.num_nodes(),
    reloaded.representation_size()
  );

  println!();
  println!("=== Cleanup ===");
  for i in (checkpoint_interval..=total_rounds).step_by(checkpoint_interval) {
    let filename = format!("comemb_checkpoint_{:03}.bin", i);
    if fs::remove_file(&filename).is_ok() {
      println!("Removed {}", filename);
    }
  }
  fs::remove_file("comemb_final.bin")?;
  println!("Cleanup complete!");

  Ok(())
}
