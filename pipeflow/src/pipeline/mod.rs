//! Pipeline construction and execution.
//!
//! This module provides:
//! - The dependency graph builder
//! - Cycle detection and deterministic topological ordering
//! - The sequential, fail-fast executor with fingerprint-based reuse
//! - The immutable [`Pipeline`] value

mod builder;
mod dag;
mod executor;
mod fingerprint;
mod node;


pub use builder::{PipelineBuilder, PipelineSkeleton};
pub use dag::{detect_cycle, topological_order};
pub use executor::{
    evaluate_block, pipeline_run, ExecutionObserver, Executor, RunReport, TracingObserver,
};
pub use fingerprint::value_digest;
pub use node::{NodeResult, PipelineNode};

use std::collections::HashMap;
use std::fmt;

use crate::errors::PipelineError;
use crate::value::Value;

/// A fully evaluated pipeline.
///
/// Nodes keep their declaration order. A pipeline is never mutated after
/// construction; re-running produces a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    nodes: Vec<PipelineNode>,
    index: HashMap<String, usize>,
}

impl Pipeline {
    pub(crate) fn from_nodes(nodes: Vec<PipelineNode>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        Self { nodes, index }
    }

    /// Returns the nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    /// Returns the node names in declaration order.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    /// Returns the dependency map in declaration order.
    #[must_use]
    pub fn dependency_map(&self) -> Vec<(String, Vec<String>)> {
        self.nodes
            .iter()
            .map(|n| (n.name.clone(), n.dependencies.clone()))
            .collect()
    }

    /// Returns the names of nodes that depend directly on `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.depends_on(name))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&PipelineNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Returns the declaration index of a node.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the computed value of a node.
    ///
    /// # Errors
    ///
    /// Returns a `KeyError` if the node does not exist, or the node's
    /// failure if it did not resolve.
    pub fn value(&self, name: &str) -> Result<&Value, PipelineError> {
        let node = self
            .node(name)
            .ok_or_else(|| PipelineError::MissingNode(name.to_string()))?;
        match &node.result {
            NodeResult::Value(v) => Ok(v),
            NodeResult::Failed(err) => Err(PipelineError::NodeFailed {
                node: name.to_string(),
                source: err.clone(),
            }),
            NodeResult::Unresolved => Err(PipelineError::Value(format!(
                "Pipeline node '{name}' has not been evaluated"
            ))),
        }
    }

    /// Returns true if any node carries a failure.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.nodes.iter().any(|n| n.result.is_failed())
    }

    /// Returns the names of failed nodes.
    #[must_use]
    pub fn failed_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.result.is_failed())
            .map(|n| n.name.clone())
            .collect()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the pipeline has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipeline(nodes: [{}])", self.node_names().join(", "))
    }
}
