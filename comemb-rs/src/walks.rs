//! Random-walk generation, persistence and the restartable walk corpus.
//!
//! Walks are written as one space separated line per walk into per-worker
//! files `<base>.0`, `<base>.1`, ... and read back lazily, file by file, on
//! every pass of the context trainer.

use crate::error::Error;
use crate::error::Result;
use crate::graph::Graph;
use crate::utils::seed::derive_seed;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Lines;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;
use tracing::info;

pub type WalkIter<'c> = Box<dyn Iterator<Item = Result<Vec<u32>>> + 'c>;

/// A sequence of walks that can be traversed any number of times.
///
/// Every call to [`WalkCorpus::walks`] starts an independent pass from the
/// beginning.
pub trait WalkCorpus: Sync {
  fn walks(&self) -> Result<WalkIter<'_>>;
}

/// Walks held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryWalkCorpus(pub Vec<Vec<u32>>);

impl WalkCorpus for MemoryWalkCorpus {
  fn walks(&self) -> Result<WalkIter<'_>> {
    Ok(Box::new(self.0.iter().cloned().map(Ok)))
  }
}

/// Walks persisted across several files, re-read on every pass.
///
/// Files are visited in the given order and lines within a file in file
/// order.
#[derive(Debug, Clone)]
pub struct FileWalkCorpus {
  files: Vec<PathBuf>,
}

impl FileWalkCorpus {
  pub fn new(files: Vec<PathBuf>) -> Self {
    Self { files }
  }

  /// Collect `<base>.0`, `<base>.1`, ... up to the first missing index.
  pub fn discover(base: &Path) -> Result<Self> {
    let files: Vec<PathBuf> = (0..)
      .map(|i| worker_file(base, i))
      .take_while(|path| path.is_file())
      .collect();
    if files.is_empty() {
      return Err(Error::MissingWalks {
        base: base.to_path_buf(),
      });
    }
    debug!(base = %base.display(), files = files.len(), "walk files discovered");
    Ok(Self { files })
  }

  pub fn files(&self) -> &[PathBuf] {
    &self.files
  }
}

impl WalkCorpus for FileWalkCorpus {
  fn walks(&self) -> Result<WalkIter<'_>> {
    Ok(Box::new(FileWalks {
      pending: self.files.iter(),
      current: None,
    }))
  }
}

struct OpenFile {
  path: PathBuf,
  lines: Lines<BufReader<File>>,
  line: usize,
}

struct FileWalks<'c> {
  pending: std::slice::Iter<'c, PathBuf>,
  current: Option<OpenFile>,
}

impl Iterator for FileWalks<'_> {
  type Item = Result<Vec<u32>>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let Some(open) = self.current.as_mut() else {
        let path = self.pending.next()?;
        match File::open(path) {
          Ok(file) => {
            self.current = Some(OpenFile {
              path: path.clone(),
              lines: BufReader::new(file).lines(),
              line: 0,
            })
          }
          Err(err) => return Some(Err(err.into())),
        }
        continue;
      };

      match open.lines.next() {
        None => self.current = None,
        Some(Err(err)) => return Some(Err(err.into())),
        Some(Ok(text)) => {
          open.line += 1;
          if text.trim().is_empty() {
            continue;
          }
          return Some(parse_walk(&text, &open.path, open.line));
        }
      }
    }
  }
}

fn parse_walk(text: &str, path: &Path, line: usize) -> Result<Vec<u32>> {
  text
    .split_whitespace()
    .map(|token| {
      token.parse::<u32>().map_err(|_| Error::WalkFormat {
        path: path.to_path_buf(),
        line,
      })
    })
    .collect()
}

/// `<base>.<index>`
pub fn worker_file(base: &Path, index: usize) -> PathBuf {
  let mut name = base.as_os_str().to_owned();
  name.push(format!(".{index}"));
  PathBuf::from(name)
}

/// One uniform random walk of at most `length` nodes from `start`. With
/// probability `alpha` a step jumps back to `start`; a node without
/// neighbours ends the walk early.
pub fn random_walk<R: Rng>(graph: &Graph, start: u32, length: usize, alpha: f64, rng: &mut R) -> Vec<u32> {
  let mut walk = Vec::with_capacity(length);
  let Some(start_pos) = graph.position(start) else {
    return walk;
  };
  walk.push(start);
  let mut pos = start_pos;
  while walk.len() < length {
    let neighbours = graph.neighbor_positions(pos);
    if neighbours.is_empty() {
      break;
    }
    pos = if alpha > 0.0 && rng.random::<f64>() < alpha {
      start_pos
    } else {
      neighbours[rng.random_range(0..neighbours.len())]
    };
    walk.push(graph.label(pos));
  }
  walk
}

/*
  Sample `number_walks` walks from every node and persist them.

  The walk rounds are split across `num_workers` files `<base>.<worker>`,
  each written by its own worker with its own seeded generator. Every round
  visits all nodes in a fresh random order.

  Parameters
  ----------
  graph: graph to walk on

  base: path prefix of the walk files; parent directories are created

  number_walks: int
      Walks started from each node.

  walk_length: int
      Maximum nodes per walk.

  alpha: float
      Restart probability.

  seed: int
      Base seed; worker w uses a stream derived from (seed, w).

  num_workers: int
      Number of files and threads.

  Returns the corpus over the written files.
*/
pub fn write_walks_to_disk(
  graph: &Graph,
  base: &Path,
  number_walks: usize,
  walk_length: usize,
  alpha: f64,
  seed: u64,
  num_workers: usize,
) -> Result<FileWalkCorpus> {
  let started = Instant::now();
  if let Some(parent) = base.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent)?;
    }
  }
  let workers = num_workers.max(1);
  let files: Vec<PathBuf> = (0..workers).map(|w| worker_file(base, w)).collect();

  let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
  pool.install(|| {
    files
      .par_iter()
      .enumerate()
      .map(|(worker, path)| -> Result<()> {
        let mut rng = StdRng::seed_from_u64(derive_seed(seed, &[worker as u64]));
        let mut writer = BufWriter::new(File::create(path)?);
        let mut order = graph.nodes().to_vec();
        for _ in (worker..number_walks).step_by(workers) {
          order.shuffle(&mut rng);
          for &node in &order {
            let walk = random_walk(graph, node, walk_length, alpha, &mut rng);
            let line: Vec<String> = walk.iter().map(u32::to_string).collect();
            writeln!(writer, "{}", line.join(" "))?;
          }
        }
        writer.flush()?;
        Ok(())
      })
      .collect::<Result<()>>()
  })?;

  info!(
    duration_ms = started.elapsed().as_millis(),
    walks = number_walks * graph.num_nodes(),
    files = files.len(),
    base = %base.display(),
    "walks written"
  );
  Ok(FileWalkCorpus::new(files))
}

/// Occurrences of every node id across the walk files, counted in
/// parallel (one file per task).
pub fn count_walk_occurrences(files: &[PathBuf], num_workers: usize) -> Result<HashMap<u32, u64>> {
  let started = Instant::now();
  let counts: DashMap<u32, u64> = DashMap::new();
  let pool = rayon::ThreadPoolBuilder::new()
    .num_threads(num_workers.max(1))
    .build()?;

  pool.install(|| {
    files.par_iter().try_for_each(|path| -> Result<()> {
      let mut local: HashMap<u32, u64> = HashMap::new();
      let corpus = FileWalkCorpus::new(vec![path.clone()]);
      for walk in corpus.walks()? {
        for node in walk? {
          *local.entry(node).or_default() += 1;
        }
      }
      for (node, count) in local {
        *counts.entry(node).or_default() += count;
      }
      Ok(())
    })
  })?;

  let counts: HashMap<u32, u64> = counts.into_iter().collect();
  debug!(
    duration_ms = started.elapsed().as_millis(),
    distinct = counts.len(),
    "walk occurrences counted"
  );
  Ok(counts)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ring() -> Graph {
    Graph::from_edges(&[(0, 1), (1, 2), (2, 3), (3, 0)], &[], true)
  }

  fn collect(corpus: &dyn WalkCorpus) -> Vec<Vec<u32>> {
    corpus
      .walks()
      .unwrap()
      .collect::<Result<Vec<_>>>()
      .unwrap()
  }

  #[test]
  fn walks_follow_edges() {
    let graph = ring();
    let mut rng = StdRng::seed_from_u64(3);
    let walk = random_walk(&graph, 0, 20, 0.0, &mut rng);
    assert_eq!(walk.len(), 20);
    assert_eq!(walk[0], 0);
    for pair in walk.windows(2) {
      assert!(graph.neighbors(pair[0]).contains(&pair[1]));
    }
  }

  #[test]
  fn isolated_node_walk_stops() {
    let graph = Graph::from_edges(&[(0, 1)], &[7], true);
    let mut rng = StdRng::seed_from_u64(3);
    assert_eq!(random_walk(&graph, 7, 10, 0.0, &mut rng), vec![7]);
  }

  #[test]
  fn file_corpus_is_restartable() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("ring.walks");
    let graph = ring();
    let corpus = write_walks_to_disk(&graph, &base, 5, 6, 0.0, 1, 2).unwrap();
    assert_eq!(corpus.files().len(), 2);

    let first = collect(&corpus);
    let second = collect(&corpus);
    assert_eq!(first.len(), 5 * 4);
    assert_eq!(first, second);
    assert!(first.iter().all(|walk| walk.len() == 6));

    let discovered = FileWalkCorpus::discover(&base).unwrap();
    assert_eq!(discovered.files(), corpus.files());
  }

  #[test]
  fn walk_generation_is_seeded() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ring();
    let a = write_walks_to_disk(&graph, &dir.path().join("a"), 3, 5, 0.0, 9, 2).unwrap();
    let b = write_walks_to_disk(&graph, &dir.path().join("b"), 3, 5, 0.0, 9, 2).unwrap();
    assert_eq!(collect(&a), collect(&b));
  }

  #[test]
  fn discover_without_files_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = FileWalkCorpus::discover(&dir.path().join("none")).unwrap_err();
    assert!(matches!(err, Error::MissingWalks { .. }));
  }

  #[test]
  fn bad_token_reports_file_and_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.0");
    std::fs::write(&path, "1 2 3\n\n4 x 5\n").unwrap();
    let corpus = FileWalkCorpus::new(vec![path.clone()]);
    let results: Vec<_> = corpus.walks().unwrap().collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap(), &vec![1, 2, 3]);
    match &results[1] {
      Err(Error::WalkFormat { path: p, line }) => {
        assert_eq!(p, &path);
        assert_eq!(*line, 3);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn occurrences_are_counted_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("w.0");
    let b = dir.path().join("w.1");
    std::fs::write(&a, "1 2 1\n3\n").unwrap();
    std::fs::write(&b, "1 3\n").unwrap();
    let counts = count_walk_occurrences(&[a, b], 2).unwrap();
    assert_eq!(counts[&1], 3);
    assert_eq!(counts[&2], 1);
    assert_eq!(counts[&3], 2);
    assert_eq!(counts.len(), 3);
  }

  #[test]
  fn memory_corpus_yields_its_walks() {
    let corpus = MemoryWalkCorpus(vec![vec![1, 2], vec![3]]);
    assert_eq!(collect(&corpus), vec![vec![1, 2], vec![3]]);
    assert_eq!(collect(&corpus).len(), 2);
  }
}
