//! Pipeline nodes and their results.

use crate::errors::EvalError;
use crate::evaluator::NodeBody;
use crate::value::Value;

/// The outcome of evaluating a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodeResult {
    /// Not evaluated yet.
    #[default]
    Unresolved,
    /// Evaluated successfully.
    Value(Value),
    /// Evaluation failed.
    Failed(EvalError),
}

impl NodeResult {
    /// Returns the value if the node resolved successfully.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true if the node failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A named unit of computation inside a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineNode {
    /// The unique name of the node.
    pub name: String,
    /// The expression computing the node.
    pub body: NodeBody,
    /// Names of other nodes the body references, in declaration order.
    pub dependencies: Vec<String>,
    /// Names the body read from the enclosing environment, sorted.
    pub external_refs: Vec<String>,
    /// The computed result.
    pub result: NodeResult,
    /// Content fingerprint of the computation, when every input is hashable.
    pub fingerprint: Option<String>,
}

impl PipelineNode {
    /// Creates an unresolved node.
    #[must_use]
    pub fn new(name: impl Into<String>, body: NodeBody, dependencies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            body,
            dependencies,
            external_refs: Vec::new(),
            result: NodeResult::Unresolved,
            fingerprint: None,
        }
    }

    /// Returns true if `name` is a direct dependency.
    #[must_use]
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }
}
