//! Dependency graph builder.
//!
//! Nodes may be declared in any order. Each node's dependencies are the
//! other node names its body references freely, as reported by the
//! evaluator; references to names outside the block are left to the
//! enclosing environment.

use std::collections::{BTreeSet, HashMap};

use super::node::PipelineNode;
use crate::errors::{ContractErrorInfo, PipelineError, PipelineValidationError};
use crate::evaluator::{Evaluator, NodeBody};

/// The unevaluated graph produced by [`PipelineBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSkeleton {
    nodes: Vec<PipelineNode>,
    index: HashMap<String, usize>,
}

impl PipelineSkeleton {
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

    /// Returns the declaration index of a node.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the dependency map in declaration order.
    #[must_use]
    pub fn dependency_map(&self) -> Vec<(String, Vec<String>)> {
        self.nodes
            .iter()
            .map(|n| (n.name.clone(), n.dependencies.clone()))
            .collect()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if there are no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn into_nodes(self) -> Vec<PipelineNode> {
        self.nodes
    }
}

/// Builder collecting `(name, body)` declarations of a pipeline block.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    declarations: Vec<(String, NodeBody)>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a node.
    #[must_use]
    pub fn node(mut self, name: impl Into<String>, body: impl Into<NodeBody>) -> Self {
        self.add_node(name, body);
        self
    }

    /// Declares a node in place.
    pub fn add_node(&mut self, name: impl Into<String>, body: impl Into<NodeBody>) {
        self.declarations.push((name.into(), body.into()));
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.declarations.len()
    }

    /// Resolves dependencies and assembles the graph.
    ///
    /// Cycles are not checked here; the executor rejects them before any
    /// evaluation starts.
    ///
    /// # Errors
    ///
    /// Returns a `ValueError` for an empty block, an invalid node name or a
    /// duplicate node name.
    pub fn build(self, evaluator: &dyn Evaluator) -> Result<PipelineSkeleton, PipelineError> {
        if self.declarations.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no nodes")
                .with_error_info(
                    ContractErrorInfo::new("PIPELINE-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Declare at least one node inside the pipeline block."),
                )
                .into());
        }

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (i, (name, _)) in self.declarations.iter().enumerate() {
            validate_name(name)?;
            if positions.insert(name.as_str(), i).is_some() {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate node name '{name}' in pipeline"
                ))
                .with_nodes(vec![name.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "PIPELINE-DUPLICATE",
                        format!("Node '{name}' is declared more than once"),
                    )
                    .with_fix_hint("Rename one of the declarations."),
                )
                .into());
            }
        }

        let candidates: BTreeSet<String> = positions.keys().map(|k| (*k).to_string()).collect();

        let nodes = self
            .declarations
            .iter()
            .map(|(name, body)| {
                let mut refs: Vec<String> = evaluator
                    .free_references(body, &candidates)
                    .into_iter()
                    .filter(|r| r != name && positions.contains_key(r.as_str()))
                    .collect();
                refs.sort_by_key(|r| positions[r.as_str()]);
                PipelineNode::new(name.clone(), body.clone(), refs)
            })
            .collect();

        Ok(PipelineSkeleton::from_nodes(nodes))
    }
}

fn validate_name(name: &str) -> Result<(), PipelineValidationError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PipelineValidationError::new(format!("Invalid node name '{name}'"))
            .with_nodes(vec![name.to_string()])
            .with_error_info(
                ContractErrorInfo::new(
                    "PIPELINE-INVALID-NAME",
                    "Node names must be identifiers",
                )
                .with_context_entry("node", name),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ExprEvaluator;
    use pretty_assertions::assert_eq;

    fn deps_of(skeleton: &PipelineSkeleton, name: &str) -> Vec<String> {
        skeleton.nodes()[skeleton.position(name).unwrap()]
            .dependencies
            .clone()
    }

    #[test]
    fn test_out_of_order_declarations() {
        let skeleton = PipelineBuilder::new()
            .node("sum", "z + x + y")
            .node("x", "10")
            .node("y", "20")
            .node("z", "30")
            .build(&ExprEvaluator::new())
            .unwrap();

        assert_eq!(skeleton.len(), 4);
        // ordered by declaration, not by appearance in the body
        assert_eq!(deps_of(&skeleton, "sum"), vec!["x", "y", "z"]);
        assert!(deps_of(&skeleton, "x").is_empty());
    }

    #[test]
    fn test_external_and_self_references_excluded() {
        let skeleton = PipelineBuilder::new()
            .node("a", "a + outside")
            .node("b", "a * 2")
            .build(&ExprEvaluator::new())
            .unwrap();

        assert!(deps_of(&skeleton, "a").is_empty());
        assert_eq!(deps_of(&skeleton, "b"), vec!["a"]);
    }

    #[test]
    fn test_shadowed_name_is_not_a_dependency() {
        let skeleton = PipelineBuilder::new()
            .node("x", "1")
            .node("f", "fn(x) -> x + 1")
            .node("g", "let x = 5 in x * 2")
            .build(&ExprEvaluator::new())
            .unwrap();

        assert!(deps_of(&skeleton, "f").is_empty());
        assert!(deps_of(&skeleton, "g").is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = PipelineBuilder::new()
            .node("a", "1")
            .node("a", "2")
            .build(&ExprEvaluator::new())
            .unwrap_err();

        match err {
            PipelineError::Validation(v) => {
                assert_eq!(v.error_info.unwrap().code, "PIPELINE-DUPLICATE");
                assert_eq!(v.nodes, vec!["a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_name_rejected() {
        let err = PipelineBuilder::new()
            .node("not-valid", "1")
            .build(&ExprEvaluator::new())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid node name"));
    }

    #[test]
    fn test_empty_block_rejected() {
        let err = PipelineBuilder::new().build(&ExprEvaluator::new()).unwrap_err();
        assert_eq!(err.to_string(), "Pipeline has no nodes");
    }
}
