//! Plain-text exports for inspection by other tools.

use crate::error::Result;
use crate::model::Model;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use tracing::info;

fn create(path: &Path) -> Result<BufWriter<File>> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent)?;
    }
  }
  Ok(BufWriter::new(File::create(path)?))
}

/// Write the node embeddings in word2vec text format: a `<n> <dim>` header,
/// then `<node_id> <v0> <v1> ...` per node in row order.
pub fn save_embedding(path: &Path, model: &Model) -> Result<()> {
  let mut writer = create(path)?;
  let embedding = model.node_embedding();
  writeln!(writer, "{} {}", embedding.nrows(), embedding.ncols())?;
  for (label, row) in model.vocab().labels().iter().zip(embedding.outer_iter()) {
    write!(writer, "{label}")?;
    for v in row.iter() {
      write!(writer, " {v}")?;
    }
    writeln!(writer)?;
  }
  writer.flush()?;
  info!(path = %path.display(), nodes = embedding.nrows(), "embedding exported");
  Ok(())
}

/// Write `<node_id> <community>` per node, the community being the one with
/// the largest responsibility. Nothing is written before the first fit.
pub fn save_communities(path: &Path, model: &Model) -> Result<()> {
  let assignments = model.communities().assignments();
  let mut writer = create(path)?;
  for (label, community) in model.vocab().labels().iter().zip(assignments.iter()) {
    writeln!(writer, "{label} {community}")?;
  }
  writer.flush()?;
  info!(path = %path.display(), nodes = assignments.len(), "communities exported");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::community::CommunityTrainer;
  use crate::model::InitModel;
  use std::collections::HashMap;

  fn model() -> Model {
    let counts: HashMap<u32, u64> = [(7, 3), (9, 1)].into_iter().collect();
    InitModel::builder()
      .counts(&counts)
      .representation_size(3)
      .k(1)
      .table_size(10)
      .build()
      .exec()
      .unwrap()
  }

  #[test]
  fn embedding_file_has_header_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("emb.txt");
    let model = model();
    save_embedding(&path, &model).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "2 3");
    assert_eq!(lines.len(), 3);
    let first: Vec<&str> = lines[1].split(' ').collect();
    assert_eq!(first[0], "7");
    assert_eq!(first.len(), 4);
    let parsed: f32 = first[1].parse().unwrap();
    assert_eq!(parsed, model.node_embedding()[(0, 0)]);
  }

  #[test]
  fn community_file_lists_assignments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("communities.txt");
    let mut model = model();
    CommunityTrainer::new(1, 1, 0).unwrap().train(&mut model).unwrap();
    save_communities(&path, &model).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, "7 0\n9 0\n");
  }
}
