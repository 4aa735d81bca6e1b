//! Boundary to the expression evaluator.
//!
//! The pipeline engine never inspects expressions itself. It asks the
//! evaluator two things: which of a set of names an expression refers to
//! freely, and what value an expression has under a set of bindings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Debug};

use crate::errors::EvalError;
use crate::value::{Environment, Value};

/// The body of a pipeline node.
///
/// An opaque expression handle identified by its canonical source text, so
/// bodies can be compared, fingerprinted and written into generated build
/// scripts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeBody {
    source: String,
}

impl NodeBody {
    /// Creates a body from source text. Surrounding whitespace is dropped.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let source: String = source.into();
        Self {
            source: source.trim().to_string(),
        }
    }

    /// Returns the source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl From<&str> for NodeBody {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for NodeBody {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

impl fmt::Display for NodeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Trait implemented by the language's expression evaluator.
#[cfg_attr(test, mockall::automock)]
pub trait Evaluator: Send + Sync + Debug {
    /// Evaluates `body` against `env`.
    fn evaluate(&self, body: &NodeBody, env: &Environment) -> Result<Value, EvalError>;

    /// Returns the members of `candidates` that `body` references freely.
    ///
    /// Names bound locally inside the body (lambda parameters, `let`
    /// bindings) must not be reported even when they coincide with a
    /// candidate.
    fn free_references(&self, body: &NodeBody, candidates: &BTreeSet<String>) -> BTreeSet<String>;
}
