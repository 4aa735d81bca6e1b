//! Name to value bindings.

use std::collections::{BTreeMap, BTreeSet};

use super::Value;

/// A lexical environment: the bindings an expression is evaluated against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    bindings: BTreeMap<String, Value>,
}

impl Environment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// Binds a name, returning the previous value if it was bound.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.bindings.insert(name.into(), value)
    }

    /// Looks up a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Returns true if the name is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Returns all bound names.
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.bindings.keys().cloned().collect()
    }

    /// Copies every binding of `other` into this environment.
    pub fn extend_from(&mut self, other: &Self) {
        for (name, value) in &other.bindings {
            self.bindings.insert(name.clone(), value.clone());
        }
    }

    /// Iterates over the bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_shadow() {
        let mut env = Environment::new().with("x", 1_i64);
        assert_eq!(env.bind("x", Value::Int(2)), Some(Value::Int(1)));
        assert_eq!(env.get("x"), Some(&Value::Int(2)));
        assert!(!env.contains("y"));
    }

    #[test]
    fn test_extend_from() {
        let mut base = Environment::new().with("a", 1_i64);
        let other = Environment::new().with("a", 5_i64).with("b", true);
        base.extend_from(&other);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get("a"), Some(&Value::Int(5)));
        assert_eq!(base.names().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
