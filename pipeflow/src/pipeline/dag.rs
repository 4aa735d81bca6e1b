//! Cycle detection and topological ordering of the dependency graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use super::builder::PipelineSkeleton;
use crate::errors::CycleDetectedError;

/// Checks the graph for cycles.
///
/// Traverses depth-first in declaration order, so the reported node is
/// stable from run to run.
///
/// # Errors
///
/// Returns a [`CycleDetectedError`] naming the node at which the first
/// back-edge was found.
pub fn detect_cycle(skeleton: &PipelineSkeleton) -> Result<(), CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in skeleton.nodes() {
        if !visited.contains(node.name.as_str()) {
            if let Some(cycle) =
                dfs_cycle(skeleton, &node.name, &mut visited, &mut rec_stack, &mut path)
            {
                return Err(CycleDetectedError::new(cycle));
            }
        }
    }

    Ok(())
}

fn dfs_cycle<'a>(
    skeleton: &'a PipelineSkeleton,
    name: &'a str,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(name);
    rec_stack.insert(name);
    path.push(name);

    if let Some(pos) = skeleton.position(name) {
        for dep in &skeleton.nodes()[pos].dependencies {
            let dep = dep.as_str();
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(skeleton, dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(name);
    None
}

/// Orders nodes so that every node follows its dependencies.
///
/// Kahn's algorithm; among nodes that are ready at the same time the one
/// declared first goes first. Returns declaration indices. Nodes on a cycle
/// are omitted, so callers must run [`detect_cycle`] first.
#[must_use]
pub fn topological_order(skeleton: &PipelineSkeleton) -> Vec<usize> {
    let nodes = skeleton.nodes();
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.dependencies {
            if let Some(d) = skeleton.position(dep) {
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &child in &dependents[i] {
            in_degree[child] = in_degree[child].saturating_sub(1);
            if in_degree[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }
    order
}
