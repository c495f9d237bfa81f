//! Call graph engine: cycle detection, reachability and impact radius over
//! finalized functions.
//!
//! A [`CallGraph`] is an immutable snapshot built from the store's edge table.
//! Every traversal visits nodes and neighbours in ascending id order, so all
//! results are deterministic regardless of insertion order.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use petgraph::{Direction, graphmap::DiGraphMap};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, entity::EntityId};

// ─── Edges ───────────────────────────────────────────────────────────────────

/// A caller → callee relation as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
  pub caller:           EntityId,
  pub callee:           EntityId,
  /// How many times this exact call site was recorded.
  pub occurrence_count: u32,
  pub site_file_id:     Option<EntityId>,
  pub site_line:        Option<u32>,
}

/// Input to [`crate::store::GraphStore::add_edge`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCallEdge {
  pub caller:       EntityId,
  pub callee:       EntityId,
  pub site_file_id: Option<EntityId>,
  pub site_line:    Option<u32>,
}

impl NewCallEdge {
  pub fn new(caller: EntityId, callee: EntityId) -> Self {
    Self { caller, callee, site_file_id: None, site_line: None }
  }

  pub fn at(mut self, file: EntityId, line: u32) -> Self {
    self.site_file_id = Some(file);
    self.site_line = Some(line);
    self
  }
}

// ─── Cancellation ────────────────────────────────────────────────────────────

/// Cooperative cancellation for long traversals.
///
/// Checked between node visits. A cancelled traversal fails with
/// [`Error::Cancelled`]; partial results are dropped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self { Self::default() }

  pub fn cancel(&self) { self.0.store(true, Ordering::Relaxed) }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }

  pub fn check(&self) -> Result<()> {
    if self.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// One call cycle, rotated to start at its smallest id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cycle(pub Vec<EntityId>);

impl Cycle {
  fn from_path(path: &[EntityId]) -> Self {
    let start = path
      .iter()
      .enumerate()
      .min_by_key(|(_, id)| **id)
      .map(|(i, _)| i)
      .unwrap_or(0);
    let mut nodes = path.to_vec();
    nodes.rotate_left(start);
    Self(nodes)
  }

  pub fn nodes(&self) -> &[EntityId] { &self.0 }

  pub fn contains(&self, id: EntityId) -> bool { self.0.contains(&id) }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Reachability from a caller-curated set of entry points.
///
/// Unknown entry points do not fail the query; they are listed in `missing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reachability {
  pub found:       Vec<EntityId>,
  pub missing:     Vec<EntityId>,
  pub reachable:   Vec<EntityId>,
  pub unreachable: Vec<EntityId>,
}

/// Transitive callers of `target`, keyed by hop distance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactRadius {
  pub target:   EntityId,
  pub affected: BTreeMap<EntityId, u32>,
}

impl ImpactRadius {
  pub fn distance(&self, id: EntityId) -> Option<u32> { self.affected.get(&id).copied() }

  pub fn max_distance(&self) -> u32 { self.affected.values().copied().max().unwrap_or(0) }

  /// Affected ids grouped by distance, nearest first.
  pub fn by_distance(&self) -> BTreeMap<u32, Vec<EntityId>> {
    let mut rings: BTreeMap<u32, Vec<EntityId>> = BTreeMap::new();
    for (id, d) in &self.affected {
      rings.entry(*d).or_default().push(*id);
    }
    rings
  }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImpactOptions {
  /// Report the target itself at distance 0.
  #[serde(default)]
  pub include_target: bool,
}

// ─── Graph ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CallGraph {
  /// Edge weight: total occurrences across all call sites.
  graph: DiGraphMap<EntityId, u32>,
}

impl CallGraph {
  /// Build a graph over `functions`. Edges with an endpoint outside that set
  /// (reserved, deleted or non-function entities) are ignored.
  pub fn build<'a>(
    functions: impl IntoIterator<Item = EntityId>,
    edges: impl IntoIterator<Item = &'a CallEdge>,
  ) -> Self {
    let mut nodes: Vec<EntityId> = functions.into_iter().collect();
    nodes.sort_unstable();
    nodes.dedup();

    let mut graph = DiGraphMap::with_capacity(nodes.len(), 0);
    for id in nodes {
      graph.add_node(id);
    }
    for edge in edges {
      if !graph.contains_node(edge.caller) || !graph.contains_node(edge.callee) {
        continue;
      }
      if let Some(weight) = graph.edge_weight_mut(edge.caller, edge.callee) {
        *weight += edge.occurrence_count;
      } else {
        graph.add_edge(edge.caller, edge.callee, edge.occurrence_count);
      }
    }
    Self { graph }
  }

  pub fn contains(&self, id: EntityId) -> bool { self.graph.contains_node(id) }

  pub fn node_count(&self) -> usize { self.graph.node_count() }

  pub fn edge_count(&self) -> usize { self.graph.edge_count() }

  /// Direct callees with their total occurrence counts.
  pub fn callees(&self, id: EntityId) -> Vec<(EntityId, u32)> {
    self.neighbours_weighted(id, Direction::Outgoing)
  }

  /// Direct callers with their total occurrence counts.
  pub fn callers(&self, id: EntityId) -> Vec<(EntityId, u32)> {
    self.neighbours_weighted(id, Direction::Incoming)
  }

  fn neighbours_weighted(&self, id: EntityId, dir: Direction) -> Vec<(EntityId, u32)> {
    if !self.contains(id) {
      return Vec::new();
    }
    let mut out: Vec<(EntityId, u32)> = self
      .graph
      .neighbors_directed(id, dir)
      .map(|n| {
        let (a, b) = match dir {
          Direction::Outgoing => (id, n),
          Direction::Incoming => (n, id),
        };
        (n, self.graph.edge_weight(a, b).copied().unwrap_or(0))
      })
      .collect();
    out.sort_unstable();
    out
  }

  fn sorted_neighbours(&self, id: EntityId, dir: Direction) -> Vec<EntityId> {
    let mut out: Vec<EntityId> = self.graph.neighbors_directed(id, dir).collect();
    out.sort_unstable();
    out
  }

  fn sorted_nodes(&self) -> Vec<EntityId> {
    let mut nodes: Vec<EntityId> = self.graph.nodes().collect();
    nodes.sort_unstable();
    nodes
  }

  // ── Cycles ────────────────────────────────────────────────────────────

  /// Every cycle closed by a back edge during a depth-first search started
  /// from each unvisited node in ascending id order.
  ///
  /// Cycles are deduplicated by their minimal rotation and returned ordered by
  /// smallest member, then lexicographically. Self-calls are one-node cycles.
  pub fn cycles(&self, cancel: &CancelToken) -> Result<Vec<Cycle>> {
    let mut found: BTreeSet<Cycle> = BTreeSet::new();
    let mut visited: HashSet<EntityId> = HashSet::new();

    for root in self.sorted_nodes() {
      if visited.contains(&root) {
        continue;
      }
      cancel.check()?;
      visited.insert(root);

      // Explicit stack of (node, sorted successors, next successor index).
      let mut path: Vec<EntityId> = vec![root];
      let mut on_path: HashMap<EntityId, usize> = HashMap::from([(root, 0)]);
      let mut frames: Vec<(Vec<EntityId>, usize)> =
        vec![(self.sorted_neighbours(root, Direction::Outgoing), 0)];

      while let Some((succ, next)) = frames.last_mut() {
        let Some(&target) = succ.get(*next) else {
          frames.pop();
          if let Some(done) = path.pop() {
            on_path.remove(&done);
          }
          continue;
        };
        *next += 1;

        if let Some(&pos) = on_path.get(&target) {
          found.insert(Cycle::from_path(&path[pos..]));
        } else if visited.insert(target) {
          cancel.check()?;
          on_path.insert(target, path.len());
          path.push(target);
          frames.push((self.sorted_neighbours(target, Direction::Outgoing), 0));
        }
      }
    }

    Ok(found.into_iter().collect())
  }

  // ── Reachability ──────────────────────────────────────────────────────

  /// Forward reachability from `entry_points`. With no usable entry points
  /// every function is unreachable; guarding against that is the caller's
  /// business.
  pub fn reachability(
    &self,
    entry_points: &[EntityId],
    cancel: &CancelToken,
  ) -> Result<Reachability> {
    let requested: BTreeSet<EntityId> = entry_points.iter().copied().collect();
    let (found, missing): (Vec<EntityId>, Vec<EntityId>) =
      requested.into_iter().partition(|id| self.contains(*id));

    let mut seen: BTreeSet<EntityId> = found.iter().copied().collect();
    let mut queue: VecDeque<EntityId> = found.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
      cancel.check()?;
      for next in self.sorted_neighbours(node, Direction::Outgoing) {
        if seen.insert(next) {
          queue.push_back(next);
        }
      }
    }

    let unreachable = self
      .sorted_nodes()
      .into_iter()
      .filter(|id| !seen.contains(id))
      .collect();

    Ok(Reachability {
      found,
      missing,
      reachable: seen.into_iter().collect(),
      unreachable,
    })
  }

  // ── Impact radius ─────────────────────────────────────────────────────

  /// Breadth-first walk over reverse edges (callee → caller) from `target`.
  pub fn impact_radius(
    &self,
    target: EntityId,
    options: ImpactOptions,
    cancel: &CancelToken,
  ) -> Result<ImpactRadius> {
    if !self.contains(target) {
      return Err(Error::NotFound(target));
    }

    let mut distances: BTreeMap<EntityId, u32> = BTreeMap::from([(target, 0)]);
    let mut queue: VecDeque<EntityId> = VecDeque::from([target]);
    while let Some(node) = queue.pop_front() {
      cancel.check()?;
      let d = distances[&node];
      for caller in self.sorted_neighbours(node, Direction::Incoming) {
        if let std::collections::btree_map::Entry::Vacant(slot) = distances.entry(caller) {
          slot.insert(d + 1);
          queue.push_back(caller);
        }
      }
    }

    if !options.include_target {
      distances.remove(&target);
    }
    Ok(ImpactRadius { target, affected: distances })
  }
}
