//! Runtime values exchanged between the evaluator and the pipeline engine.
//!
//! The set of value categories is closed: every consumer (artifact codec,
//! fingerprinting, rendering) matches on [`Value`] exhaustively, so adding a
//! category is a compile-time checked change.

mod environment;
mod table;

pub use environment::Environment;
pub use table::Table;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::pipeline::Pipeline;

/// The category of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// The absent value.
    Null,
    /// A boolean.
    Bool,
    /// A 64-bit integer.
    Int,
    /// A 64-bit float.
    Float,
    /// A string.
    String,
    /// An ordered list.
    List,
    /// A string-keyed dictionary.
    Dict,
    /// A columnar table.
    Table,
    /// A function (lambda) value.
    Function,
    /// A pipeline value.
    Pipeline,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "Null",
            Self::Bool => "Bool",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::String => "String",
            Self::List => "List",
            Self::Dict => "Dict",
            Self::Table => "DataFrame",
            Self::Function => "Function",
            Self::Pipeline => "Pipeline",
        };
        write!(f, "{name}")
    }
}

/// A function value produced by the evaluator.
///
/// The body is kept as source text so that functions can be compared,
/// hashed and rendered without holding on to evaluator internals.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionValue {
    /// Parameter names.
    pub params: Vec<String>,
    /// Source text of the body.
    pub body: String,
    /// Values captured from the defining scope.
    pub captured: BTreeMap<String, Value>,
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A string.
    Str(String),
    /// An ordered list.
    List(Vec<Value>),
    /// A string-keyed dictionary.
    Dict(BTreeMap<String, Value>),
    /// A columnar table.
    Table(Table),
    /// A function value.
    Function(FunctionValue),
    /// A fully built pipeline.
    Pipeline(Arc<Pipeline>),
}

impl Value {
    /// Returns the category of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::String,
            Self::List(_) => ValueKind::List,
            Self::Dict(_) => ValueKind::Dict,
            Self::Table(_) => ValueKind::Table,
            Self::Function(_) => ValueKind::Function,
            Self::Pipeline(_) => ValueKind::Pipeline,
        }
    }

    /// Creates a string value.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Creates a list of strings.
    #[must_use]
    pub fn str_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::Str(s.into())).collect())
    }

    /// Returns the pipeline if this is a pipeline value.
    #[must_use]
    pub fn as_pipeline(&self) -> Option<&Arc<Pipeline>> {
        match self {
            Self::Pipeline(p) => Some(p),
            _ => None,
        }
    }

    /// Returns a stable SHA-256 digest of this value, or `None` for
    /// pipelines (and anything containing one).
    #[must_use]
    pub fn content_hash(&self) -> Option<String> {
        crate::pipeline::value_digest(self)
    }

    /// Returns the integer if this is an integer value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<Table> for Value {
    fn from(v: Table) -> Self {
        Self::Table(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Table(t) => write!(f, "{t}"),
            Self::Function(func) => write!(f, "fn({}) -> {}", func.params.join(", "), func.body),
            Self::Pipeline(p) => write!(f, "{p}"),
        }
    }
}
