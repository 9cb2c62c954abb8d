//! Dependency graph for a resolved closure.
//!
//! Packages are stored once in a petgraph arena, with an edge from each
//! dependency to its dependent. The graph answers:
//! - the deterministic dependencies-first build order
//! - direct dependencies and dependents of a package, for the scheduler

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::recipe::Spec;

#[derive(Debug, Error)]
pub enum GraphError {
  /// The requirement graph is not a DAG.
  #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  /// A requirement names a package absent from the closure.
  #[error("{package} requires {dependency}, which is not in the closure")]
  UnknownDependency { package: String, dependency: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
  InProgress,
  Done,
}

/// A DAG of package names built from a closure of specs.
#[derive(Debug, Clone)]
pub struct BuildGraph {
  graph: DiGraph<String, ()>,
  nodes: BTreeMap<String, NodeIndex>,
}

impl BuildGraph {
  /// Build the graph from resolved specs.
  ///
  /// # Errors
  ///
  /// Returns `UnknownDependency` if any requirement is not a key of `specs`.
  /// Cycles are reported by [`BuildGraph::order`].
  pub fn from_specs(specs: &BTreeMap<String, Spec>) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = BTreeMap::new();

    for name in specs.keys() {
      let idx = graph.add_node(name.clone());
      nodes.insert(name.clone(), idx);
    }

    for (name, spec) in specs {
      let dependent = nodes[name];
      let deps: BTreeSet<&String> = spec.requires.iter().collect();
      for dep in deps {
        let Some(&dep_idx) = nodes.get(dep) else {
          return Err(GraphError::UnknownDependency {
            package: name.clone(),
            dependency: dep.clone(),
          });
        };
        graph.add_edge(dep_idx, dependent, ());
      }
    }

    Ok(Self { graph, nodes })
  }

  /// Packages in dependencies-first order.
  ///
  /// Depth-first post-order over requirement edges, visiting names
  /// lexicographically at every branch, so identical closures always give
  /// identical orders.
  pub fn order(&self) -> Result<Vec<String>, GraphError> {
    let mut marks: HashMap<NodeIndex, Mark> = HashMap::with_capacity(self.nodes.len());
    let mut order = Vec::with_capacity(self.nodes.len());

    for &root in self.nodes.values() {
      if marks.contains_key(&root) {
        continue;
      }

      // (node, its sorted dependencies, next dependency to visit)
      let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = vec![(root, self.sorted_deps(root), 0)];
      marks.insert(root, Mark::InProgress);

      while let Some((node, deps, next)) = stack.last_mut() {
        if let Some(&dep) = deps.get(*next) {
          *next += 1;
          match marks.get(&dep) {
            Some(Mark::Done) => {}
            Some(Mark::InProgress) => return Err(self.cycle_error(&stack, dep)),
            None => {
              marks.insert(dep, Mark::InProgress);
              let dep_deps = self.sorted_deps(dep);
              stack.push((dep, dep_deps, 0));
            }
          }
        } else {
          let node = *node;
          marks.insert(node, Mark::Done);
          order.push(self.graph[node].clone());
          stack.pop();
        }
      }
    }

    Ok(order)
  }

  fn sorted_deps(&self, idx: NodeIndex) -> Vec<NodeIndex> {
    let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
    deps.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
    deps.dedup();
    deps
  }

  fn cycle_error(&self, stack: &[(NodeIndex, Vec<NodeIndex>, usize)], back_to: NodeIndex) -> GraphError {
    let start = stack.iter().position(|(n, _, _)| *n == back_to).unwrap_or(0);
    let mut cycle: Vec<String> = stack[start..].iter().map(|(n, _, _)| self.graph[*n].clone()).collect();
    cycle.push(self.graph[back_to].clone());
    GraphError::CyclicDependency { cycle }
  }

  /// Direct dependencies of `name`, sorted.
  pub fn dependencies(&self, name: &str) -> Vec<String> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Direct dependents of `name`, sorted.
  pub fn dependents(&self, name: &str) -> Vec<String> {
    self.neighbors(name, Direction::Outgoing)
  }

  fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    let names: BTreeSet<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    names.into_iter().collect()
  }

  /// Every package that depends on `name`, directly or not.
  pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut pending = self.dependents(name);
    while let Some(next) = pending.pop() {
      if found.insert(next.clone()) {
        pending.extend(self.dependents(&next));
      }
    }
    found
  }
}

/// Order a closure dependencies-first.
pub fn topological_order(specs: &BTreeMap<String, Spec>) -> Result<Vec<String>, GraphError> {
  BuildGraph::from_specs(specs)?.order()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{spec, specs};

  fn position(order: &[String], name: &str) -> usize {
    order.iter().position(|n| n == name).unwrap()
  }

  #[test]
  fn empty_closure() {
    let order = topological_order(&BTreeMap::new()).unwrap();
    assert!(order.is_empty());
  }

  #[test]
  fn example_chain_orders_a_b_c() {
    let closure = specs(vec![spec("A", &[]), spec("B", &["A"]), spec("C", &["A", "B"])]);
    assert_eq!(topological_order(&closure).unwrap(), vec!["A", "B", "C"]);
  }

  #[test]
  fn dependencies_always_come_first() {
    let closure = specs(vec![
      spec("zlib", &[]),
      spec("GCC", &[]),
      spec("ROOT", &["zlib", "GCC", "Python"]),
      spec("Python", &["zlib", "GCC"]),
      spec("O2", &["ROOT", "Python", "boost"]),
      spec("boost", &["GCC"]),
    ]);

    let order = topological_order(&closure).unwrap();
    assert_eq!(order.len(), closure.len());
    for (name, s) in &closure {
      for dep in &s.requires {
        assert!(position(&order, dep) < position(&order, name), "{} before {}", dep, name);
      }
    }
  }

  #[test]
  fn order_is_lexicographic_post_order() {
    let closure = specs(vec![
      spec("d", &["c", "b"]),
      spec("c", &["a"]),
      spec("b", &["a"]),
      spec("a", &[]),
      spec("e", &[]),
    ]);
    assert_eq!(topological_order(&closure).unwrap(), vec!["a", "b", "c", "d", "e"]);
  }

  #[test]
  fn order_is_independent_of_requirement_order() {
    let one = specs(vec![spec("a", &[]), spec("b", &[]), spec("c", &["a", "b"])]);
    let two = specs(vec![spec("a", &[]), spec("b", &[]), spec("c", &["b", "a"])]);
    assert_eq!(topological_order(&one).unwrap(), topological_order(&two).unwrap());
  }

  #[test]
  fn cycle_is_reported_with_path() {
    let closure = specs(vec![spec("A", &["B"]), spec("B", &["C"]), spec("C", &["A"])]);
    let err = topological_order(&closure).unwrap_err();
    match err {
      GraphError::CyclicDependency { cycle } => {
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
      }
      other => panic!("unexpected error: {}", other),
    }
  }

  #[test]
  fn self_loop_is_a_cycle() {
    let closure = specs(vec![spec("A", &["A"])]);
    let err = topological_order(&closure).unwrap_err();
    assert!(matches!(err, GraphError::CyclicDependency { .. }));
  }

  #[test]
  fn unknown_dependency_is_reported() {
    let closure = specs(vec![spec("A", &["ghost"])]);
    let err = BuildGraph::from_specs(&closure).unwrap_err();
    assert!(matches!(err, GraphError::UnknownDependency { .. }));
  }

  #[test]
  fn deep_chain_does_not_overflow() {
    let mut all = vec![spec("p0", &[])];
    for i in 1..5000 {
      let prev = format!("p{}", i - 1);
      all.push(spec(&format!("p{}", i), &[prev.as_str()]));
    }
    let closure = specs(all);
    let order = topological_order(&closure).unwrap();
    assert_eq!(order.len(), 5000);
    assert_eq!(order[0], "p0");
    assert_eq!(order[4999], "p4999");
  }

  #[test]
  fn dependency_queries() {
    let closure = specs(vec![spec("A", &[]), spec("B", &["A"]), spec("C", &["A", "B"]), spec("D", &["C"])]);
    let graph = BuildGraph::from_specs(&closure).unwrap();

    assert_eq!(graph.dependencies("C"), vec!["A", "B"]);
    assert_eq!(graph.dependents("A"), vec!["B", "C"]);
    assert!(graph.dependencies("A").is_empty());
    assert!(graph.dependencies("nope").is_empty());

    let downstream: Vec<_> = graph.transitive_dependents("A").into_iter().collect();
    assert_eq!(downstream, vec!["B", "C", "D"]);
  }
}
