//! Ancestor and descendant traversal.

use std::collections::{HashSet, VecDeque};

use crate::errors::PipelineError;
use crate::pipeline::Pipeline;

/// A node reached during a lineage traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageEntry {
    /// The node's name.
    pub name: String,
    /// Shortest distance from the traced node; direct neighbours are 1.
    pub depth: usize,
}

impl LineageEntry {
    /// Returns true if the node is only reachable through another node.
    #[must_use]
    pub fn is_transitive(&self) -> bool {
        self.depth >= 2
    }
}

/// The ancestors and descendants of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lineage {
    /// The traced node.
    pub node: String,
    /// Nodes the traced node depends on, nearest first.
    pub ancestors: Vec<LineageEntry>,
    /// Nodes depending on the traced node, nearest first.
    pub descendants: Vec<LineageEntry>,
}

#[derive(Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Computes the lineage of `name` in `pipeline`.
///
/// # Errors
///
/// Returns a `KeyError` if the node does not exist.
pub fn lineage_of(pipeline: &Pipeline, name: &str) -> Result<Lineage, PipelineError> {
    if pipeline.node(name).is_none() {
        return Err(PipelineError::MissingNode(name.to_string()));
    }
    Ok(Lineage {
        node: name.to_string(),
        ancestors: traverse(pipeline, name, Direction::Up),
        descendants: traverse(pipeline, name, Direction::Down),
    })
}

fn neighbours(pipeline: &Pipeline, name: &str, direction: Direction) -> Vec<String> {
    match direction {
        Direction::Up => pipeline
            .node(name)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default(),
        Direction::Down => pipeline.dependents(name),
    }
}

fn traverse(pipeline: &Pipeline, start: &str, direction: Direction) -> Vec<LineageEntry> {
    let mut seen: HashSet<String> = HashSet::from([start.to_string()]);
    let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start.to_string(), 0)]);
    let mut found = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        for next in neighbours(pipeline, &current, direction) {
            if seen.insert(next.clone()) {
                found.push(LineageEntry {
                    name: next.clone(),
                    depth: depth + 1,
                });
                queue.push_back((next, depth + 1));
            }
        }
    }
    found
}
