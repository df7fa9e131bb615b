use crate::error::Error;
use crate::error::Result;
use sprs::CsMat;
use sprs::TriMat;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Immutable graph over integer-labeled nodes.
///
/// Labels are mapped to dense positions `0..num_nodes` in ascending label
/// order. The adjacency is stored as a CSR matrix whose entries are edge
/// weights; undirected graphs store both directions.
#[derive(Debug, Clone)]
pub struct Graph {
  adjacency: CsMat<f32>,
  labels: Vec<u32>,
  positions: HashMap<u32, usize>,
  directed: bool,
}

impl Graph {
  /// Build a graph from unweighted edges given as node labels.
  ///
  /// Duplicate edges are collapsed. `extra_nodes` adds isolated nodes that
  /// appear in no edge.
  pub fn from_edges(edges: &[(u32, u32)], extra_nodes: &[u32], undirected: bool) -> Self {
    let mut unique = BTreeSet::new();
    for &(u, v) in edges {
      if undirected && v < u {
        unique.insert((v, u));
      } else {
        unique.insert((u, v));
      }
    }

    let mut labels: Vec<u32> = unique
      .iter()
      .flat_map(|&(u, v)| [u, v])
      .chain(extra_nodes.iter().copied())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();
    labels.shrink_to_fit();
    let positions: HashMap<u32, usize> = labels
      .iter()
      .enumerate()
      .map(|(pos, &label)| (label, pos))
      .collect();

    let n = labels.len();
    let mut tri = TriMat::new((n, n));
    for &(u, v) in &unique {
      let (pu, pv) = (positions[&u], positions[&v]);
      tri.add_triplet(pu, pv, 1.0);
      if undirected && pu != pv {
        tri.add_triplet(pv, pu, 1.0);
      }
    }

    Self {
      adjacency: tri.to_csr::<usize>(),
      labels,
      positions,
      directed: !undirected,
    }
  }

  /// Parse an adjacency list: one line per node, the node id followed by its
  /// neighbours, whitespace separated. Blank lines and `#` comments are
  /// skipped.
  pub fn from_adjacency_list<R: BufRead>(reader: R, undirected: bool) -> Result<Self> {
    let mut edges = Vec::new();
    let mut nodes = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
      let line = line?;
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      let mut tokens = line.split_whitespace().map(|tok| {
        tok.parse::<u32>().map_err(|_| Error::GraphFormat {
          line: line_no + 1,
          reason: format!("`{tok}` is not a node id"),
        })
      });
      let Some(node) = tokens.next() else {
        continue;
      };
      let node = node?;
      nodes.push(node);
      for neighbour in tokens {
        edges.push((node, neighbour?));
      }
    }

    Ok(Self::from_edges(&edges, &nodes, undirected))
  }

  /// Load an adjacency-list file.
  pub fn load_adjacency_list(path: &Path, undirected: bool) -> Result<Self> {
    let file = File::open(path)?;
    let graph = Self::from_adjacency_list(BufReader::new(file), undirected)?;
    info!(
      path = %path.display(),
      nodes = graph.num_nodes(),
      edges = graph.num_edges(),
      "graph loaded"
    );
    Ok(graph)
  }

  pub fn num_nodes(&self) -> usize {
    self.labels.len()
  }

  /// Number of edges; each undirected edge counts once.
  pub fn num_edges(&self) -> usize {
    if self.directed {
      self.adjacency.nnz()
    } else {
      let self_loops = (0..self.num_nodes())
        .filter(|&pos| self.neighbor_positions(pos).contains(&pos))
        .count();
      (self.adjacency.nnz() + self_loops) / 2
    }
  }

  pub fn is_directed(&self) -> bool {
    self.directed
  }

  /// Node labels in ascending order.
  pub fn nodes(&self) -> &[u32] {
    &self.labels
  }

  pub fn contains(&self, node: u32) -> bool {
    self.positions.contains_key(&node)
  }

  pub(crate) fn position(&self, node: u32) -> Option<usize> {
    self.positions.get(&node).copied()
  }

  pub(crate) fn label(&self, position: usize) -> u32 {
    self.labels[position]
  }

  pub(crate) fn neighbor_positions(&self, position: usize) -> &[usize] {
    let range = self.adjacency.indptr().outer_inds_sz(position);
    &self.adjacency.indices()[range]
  }

  /// Out-neighbours of `node` (all neighbours when undirected).
  pub fn neighbors(&self, node: u32) -> Vec<u32> {
    self
      .position(node)
      .map(|pos| {
        self
          .neighbor_positions(pos)
          .iter()
          .map(|&p| self.labels[p])
          .collect()
      })
      .unwrap_or_default()
  }

  /// Number of incident edge endpoints of `node`. A self-loop counts
  /// twice, as in networkx.
  pub fn degree(&self, node: u32) -> usize {
    self
      .position(node)
      .map(|pos| self.degrees()[pos])
      .unwrap_or(0)
  }

  fn degrees(&self) -> Vec<usize> {
    let n = self.num_nodes();
    let mut degrees: Vec<usize> = (0..n)
      .map(|p| {
        let neighbours = self.neighbor_positions(p);
        // An undirected self-loop is stored once but has two endpoints.
        neighbours.len() + usize::from(!self.directed && neighbours.contains(&p))
      })
      .collect();
    if self.directed {
      for &target in self.adjacency.indices() {
        degrees[target] += 1;
      }
    }
    degrees
  }

  /// Degree of every node keyed by label, used as vocabulary counts when
  /// walks are not down-sampled.
  pub fn degree_counts(&self) -> HashMap<u32, u64> {
    self
      .degrees()
      .into_iter()
      .enumerate()
      .map(|(pos, d)| (self.labels[pos], d as u64))
      .collect()
  }

  /// Every stored adjacency entry as a (source, target) label pair.
  /// Undirected edges appear in both directions, self-loops once.
  pub fn arcs(&self) -> Vec<(u32, u32)> {
    let mut arcs = Vec::with_capacity(self.adjacency.nnz());
    for (row, vec) in self.adjacency.outer_iterator().enumerate() {
      for &col in vec.indices() {
        arcs.push((self.labels[row], self.labels[col]));
      }
    }
    arcs
  }

  /// All edges as label pairs. Undirected edges are listed once with the
  /// smaller label first.
  pub fn edges(&self) -> Vec<(u32, u32)> {
    let mut edges = Vec::with_capacity(self.num_edges());
    for (row, vec) in self.adjacency.outer_iterator().enumerate() {
      for &col in vec.indices() {
        if self.directed || col >= row {
          edges.push((self.labels[row], self.labels[col]));
        }
      }
    }
    edges
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn parses_adjacency_list() {
    let text = "# karate excerpt\n1 2 3\n2 1\n\n3 1 4\n4\n";
    let graph = Graph::from_adjacency_list(Cursor::new(text), true).unwrap();

    assert_eq!(graph.nodes(), &[1, 2, 3, 4]);
    assert_eq!(graph.num_edges(), 3);
    assert_eq!(graph.edges(), vec![(1, 2), (1, 3), (3, 4)]);
    assert_eq!(graph.degree(1), 2);
    assert_eq!(graph.degree(4), 1);
    let mut neighbours = graph.neighbors(3);
    neighbours.sort();
    assert_eq!(neighbours, vec![1, 4]);
  }

  #[test]
  fn rejects_non_numeric_tokens() {
    let err = Graph::from_adjacency_list(Cursor::new("1 2\n2 x\n"), true).unwrap_err();
    assert!(matches!(err, Error::GraphFormat { line: 2, .. }));
  }

  #[test]
  fn directed_degree_counts_both_directions() {
    let graph = Graph::from_edges(&[(0, 1), (1, 2), (2, 0), (0, 2)], &[], false);
    assert_eq!(graph.num_edges(), 4);
    assert_eq!(graph.degree(0), 3);
    assert_eq!(graph.degree(1), 2);
    assert_eq!(graph.edges().len(), 4);
  }

  #[test]
  fn isolated_nodes_are_kept() {
    let graph = Graph::from_edges(&[(0, 1)], &[7], true);
    assert_eq!(graph.num_nodes(), 3);
    assert_eq!(graph.degree(7), 0);
    assert!(graph.neighbors(7).is_empty());
    assert_eq!(graph.degree_counts()[&7], 0);
  }

  #[test]
  fn undirected_self_loop_counts_twice() {
    let graph = Graph::from_edges(&[(0, 0), (0, 1)], &[], true);
    assert_eq!(graph.num_edges(), 2);
    assert_eq!(graph.degree(0), 3);
    assert_eq!(graph.degree(1), 1);
    assert_eq!(graph.degree_counts()[&0], 3);

    let directed = Graph::from_edges(&[(0, 0), (0, 1)], &[], false);
    assert_eq!(directed.degree(0), 3);
  }

  #[test]
  fn arcs_list_undirected_edges_both_ways() {
    let graph = Graph::from_edges(&[(0, 1), (1, 2), (2, 3), (3, 0)], &[], true);
    let mut arcs = graph.arcs();
    arcs.sort();
    assert_eq!(
      arcs,
      vec![
        (0, 1),
        (0, 3),
        (1, 0),
        (1, 2),
        (2, 1),
        (2, 3),
        (3, 0),
        (3, 2),
      ]
    );
    assert_eq!(graph.edges().len(), 4);

    let directed = Graph::from_edges(&[(0, 1), (1, 2)], &[], false);
    assert_eq!(directed.arcs(), directed.edges());
  }
}
