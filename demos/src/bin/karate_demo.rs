use clap::Parser;
use comemb_rs::ComEmbConfig;
use comemb_rs::Graph;
use comemb_rs::Orchestrator;
use comemb_rs::RegularizationScaling;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Instant;
use tracing::Level;

/// Zachary's karate club as an adjacency list (node, then neighbours).
const KARATE: &str = "\
# Zachary karate club, 34 members, 78 friendships
0 1 2 3 4 5 6 7 8 10 11 12 13 17 19 21 31
1 2 3 7 13 17 19 21 30
2 3 7 8 9 13 27 28 32
3 7 12 13
4 6 10
5 6 10 16
6 16
8 30 32 33
9 33
13 33
14 32 33
15 32 33
18 32 33
19 33
20 32 33
22 32 33
23 25 27 29 32 33
24 25 27 31
25 31
26 29 33
27 33
28 31 33
29 32 33
30 32 33
31 32 33
32 33
";

#[derive(Parser)]
#[command(name = "Karate ComEmb Demo")]
struct Args {
  /// Adjacency list to embed (default: built-in karate club)
  #[arg(short, long)]
  input: Option<PathBuf>,

  /// Treat the adjacency list as directed
  #[arg(long)]
  directed: bool,

  /// Directory for walks, checkpoints and exported embeddings
  #[arg(short, long, default_value = "data")]
  output_dir: PathBuf,

  /// Prefix of every artifact
  #[arg(short, long, default_value = "karate")]
  name: String,

  /// Embedding dimensionality
  #[arg(short, long, default_value = "2")]
  dim: usize,

  /// Number of communities
  #[arg(short, long, default_value = "2")]
  k: usize,

  #[arg(long, default_value = "10")]
  number_walks: usize,

  #[arg(long, default_value = "20")]
  walk_length: usize,

  #[arg(long, default_value = "3")]
  window: usize,

  #[arg(long, default_value = "5")]
  negative: usize,

  /// Alternating rounds
  #[arg(long, default_value = "10")]
  iterations: usize,

  #[arg(long, default_value = "1.0")]
  lambda_1: f32,

  #[arg(long, default_value = "0.1")]
  lambda_2: f32,

  /// Down-sampling threshold (0 disables)
  #[arg(long, default_value = "0.0")]
  down_sample: f64,

  /// Apply λ2 unchanged instead of normalizing by k and the window
  #[arg(long)]
  raw_regularization: bool,

  /// Worker threads per trainer (default: available parallelism)
  #[arg(short, long)]
  workers: Option<usize>,

  /// Load `<name>_comEmb_init` instead of pretraining
  #[arg(long)]
  skip_pretraining: bool,

  /// Reuse walk files from a previous run
  #[arg(long)]
  reuse_walks: bool,

  #[arg(long, default_value = "42")]
  seed: u64,

  /// Log debug output
  #[arg(short, long)]
  verbose: bool,
}

impl Args {
  fn config(&self) -> ComEmbConfig {
    let mut config = ComEmbConfig::default();
    config.walks.number_walks = self.number_walks;
    config.walks.walk_length = self.walk_length;
    config.walks.seed = self.seed;
    config.skip_gram.representation_size = self.dim;
    config.skip_gram.window_size = self.window;
    config.skip_gram.negative = self.negative;
    config.skip_gram.down_sample = self.down_sample;
    config.skip_gram.table_size = 100_000;
    config.community.k = self.k;
    if self.raw_regularization {
      config.community.regularization_scaling = RegularizationScaling::Raw;
    }
    if let Some(workers) = self.workers {
      config.training.num_workers = workers;
    }
    config.training.num_iter = self.iterations;
    config.training.lambda_1 = self.lambda_1;
    config.training.lambda_2 = self.lambda_2;
    config.training.pretraining = !self.skip_pretraining;
    config.training.sample_walks = !self.reuse_walks;
    config.training.report_loss = true;
    config.training.seed = self.seed;
    config.output.output_dir = self.output_dir.clone();
    config.output.output_name = self.name.clone();
    config
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let args = Args::parse();
  let level = if args.verbose { Level::DEBUG } else { Level::INFO };
  tracing_subscriber::fmt().with_max_level(level).init();

  println!("Community Embedding Demo");
  println!("========================");

  let undirected = !args.directed;
  let graph = match &args.input {
    Some(path) => Graph::load_adjacency_list(path, undirected)?,
    None => Graph::from_adjacency_list(Cursor::new(KARATE), undirected)?,
  };
  println!(
    "Graph: {} nodes, {} edges",
    graph.num_nodes(),
    graph.num_edges()
  );

  let config = args.config();
  let start = Instant::now();
  let model = Orchestrator::from_graph(config, &graph)?.run()?;
  println!("Training completed in {:.2}s", start.elapsed().as_secs_f64());

  let assignments = model.communities().assignments();
  let mut members = vec![Vec::new(); model.k()];
  for (label, &community) in model.vocab().labels().iter().zip(assignments.iter()) {
    members[community].push(*label);
  }
  println!();
  for (community, nodes) in members.iter_mut().enumerate() {
    nodes.sort_unstable();
    println!(
      "Community {} (weight {:.3}): {:?}",
      community,
      model.communities().weights()[community],
      nodes
    );
  }

  println!();
  println!("Node embeddings:");
  let mut labels = model.vocab().labels().to_vec();
  labels.sort_unstable();
  for label in labels {
    if let Some(row) = model.embedding_of(label) {
      let values: Vec<String> = row.iter().map(|v| format!("{v:+.4}")).collect();
      println!("  {:>3}: [{}]", label, values.join(", "));
    }
  }

  println!();
  println!("Artifacts written to {}", args.output_dir.display());
  Ok(())
}
