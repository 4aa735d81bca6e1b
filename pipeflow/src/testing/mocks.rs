//! Evaluator wrappers for testing.

use parking_lot::Mutex;
use std::collections::BTreeSet;

use crate::errors::EvalError;
use crate::evaluator::{Evaluator, NodeBody};
use crate::value::{Environment, Value};

/// Wraps an evaluator and records every body it evaluates.
#[derive(Debug)]
pub struct CountingEvaluator<E> {
    inner: E,
    evaluated: Mutex<Vec<String>>,
}

impl<E: Evaluator> CountingEvaluator<E> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            evaluated: Mutex::new(Vec::new()),
        }
    }

    /// Returns the sources of the evaluated bodies, in call order.
    #[must_use]
    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().clone()
    }

    /// Returns the number of evaluations.
    #[must_use]
    pub fn count(&self) -> usize {
        self.evaluated.lock().len()
    }

    /// Clears the recorded calls.
    pub fn reset(&self) {
        self.evaluated.lock().clear();
    }
}

impl<E: Evaluator> Evaluator for CountingEvaluator<E> {
    fn evaluate(&self, body: &NodeBody, env: &Environment) -> Result<Value, EvalError> {
        self.evaluated.lock().push(body.source().to_string());
        self.inner.evaluate(body, env)
    }

    fn free_references(&self, body: &NodeBody, candidates: &BTreeSet<String>) -> BTreeSet<String> {
        self.inner.free_references(body, candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ExprEvaluator;

    #[test]
    fn test_records_calls() {
        let eval = CountingEvaluator::new(ExprEvaluator::new());
        let env = Environment::new();
        eval.evaluate(&NodeBody::new("1"), &env).unwrap();
        assert!(eval.evaluate(&NodeBody::new("1 / 0"), &env).is_err());
        assert_eq!(eval.evaluated(), vec!["1", "1 / 0"]);
        eval.reset();
        assert_eq!(eval.count(), 0);
    }
}
