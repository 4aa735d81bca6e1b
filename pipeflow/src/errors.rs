//! Error types for pipeline construction, execution and builds.
//!
//! Every error surfaced to the language maps onto one of a small set of
//! error classes ([`ErrorKind`]). Structural problems carry a
//! [`ContractErrorInfo`] with a stable code and a fix hint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::value::ValueKind;

/// The language-level class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Structural or evaluation failure.
    ValueError,
    /// Missing node or registry entry.
    KeyError,
    /// Operation applied to the wrong kind of value.
    TypeError,
    /// Filesystem or external build tool failure.
    FileError,
    /// Artifact encoding or decoding failure.
    SerializationError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueError => write!(f, "ValueError"),
            Self::KeyError => write!(f, "KeyError"),
            Self::TypeError => write!(f, "TypeError"),
            Self::FileError => write!(f, "FileError"),
            Self::SerializationError => write!(f, "SerializationError"),
        }
    }
}

/// The main error type for pipeflow operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline block is structurally invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A node body failed to evaluate.
    #[error("Pipeline node '{node}' failed: {source}")]
    NodeFailed {
        /// The failing node.
        node: String,
        /// The evaluator's error.
        source: EvalError,
    },

    /// A generic value error (bad arguments, unbuildable pipeline).
    #[error("{0}")]
    Value(String),

    /// A node is not part of the pipeline.
    #[error("node '{0}' not found in Pipeline")]
    MissingNode(String),

    /// A node is absent from every matching build log.
    #[error("node '{name}' not found in any build log{}", pattern_suffix(.which_log))]
    MissingArtifact {
        /// The requested node.
        name: String,
        /// The build id pattern, if one was supplied.
        which_log: Option<String>,
    },

    /// An introspection function received a non-pipeline value.
    #[error("Function `{function}` expects a Pipeline, got {actual}.")]
    Type {
        /// The function that was called.
        function: String,
        /// The kind of value it received.
        actual: ValueKind,
    },

    /// The external build tool exited unsuccessfully.
    #[error("Build tool '{tool}' failed ({status}):\n{diagnostics}")]
    BuildFailed {
        /// The program that was run.
        tool: String,
        /// Exit status description.
        status: String,
        /// The tool's own stderr/stdout, verbatim.
        diagnostics: String,
    },

    /// The external build tool could not be started.
    #[error("Could not start build tool '{tool}': {source}")]
    BuildToolUnavailable {
        /// The program that was run.
        tool: String,
        /// The spawn error.
        source: std::io::Error,
    },

    /// The external build tool exceeded the configured timeout.
    #[error("Build tool '{tool}' timed out after {seconds}s")]
    BuildTimedOut {
        /// The program that was run.
        tool: String,
        /// The timeout in seconds.
        seconds: f64,
    },

    /// The build was cancelled before completion.
    #[error("Build cancelled: {0}")]
    BuildCancelled(String),

    /// IO error with the path it concerned.
    #[error("IO error on '{}': {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Artifact serialization error.
    #[error("{0}")]
    Serialization(#[from] SerializationError),
}

fn pattern_suffix(which_log: &Option<String>) -> String {
    which_log
        .as_ref()
        .map(|p| format!(" matching '{p}'"))
        .unwrap_or_default()
}

impl PipelineError {
    /// Creates an IO error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a type error for an introspection function.
    pub fn expected_pipeline(function: impl Into<String>, actual: ValueKind) -> Self {
        Self::Type {
            function: function.into(),
            actual,
        }
    }

    /// Returns the language-level error class.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::CycleDetected(_)
            | Self::NodeFailed { .. }
            | Self::Value(_) => ErrorKind::ValueError,
            Self::MissingNode(_) | Self::MissingArtifact { .. } => ErrorKind::KeyError,
            Self::Type { .. } => ErrorKind::TypeError,
            Self::BuildFailed { .. }
            | Self::BuildToolUnavailable { .. }
            | Self::BuildTimedOut { .. }
            | Self::BuildCancelled(_)
            | Self::Io { .. } => ErrorKind::FileError,
            Self::Serialization(_) => ErrorKind::SerializationError,
        }
    }

    /// Renders the error the way the language displays error values.
    #[must_use]
    pub fn render(&self) -> String {
        format!("Error({}: {:?})", self.kind(), self.to_string())
    }

    /// Returns the node this error concerns, if any.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::CycleDetected(err) => Some(&err.node),
            Self::NodeFailed { node, .. } | Self::MissingNode(node) => Some(node),
            Self::MissingArtifact { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(node) = self.node() {
            map.insert("node".to_string(), serde_json::json!(node));
        }
        match self {
            Self::Validation(err) => {
                if let Some(ref info) = err.error_info {
                    let info_map: serde_json::Map<String, serde_json::Value> =
                        info.to_dict().into_iter().collect();
                    map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
                }
            }
            Self::CycleDetected(err) => {
                map.insert("cycle_path".to_string(), serde_json::json!(err.cycle_path));
            }
            Self::NodeFailed { source, .. } => {
                map.insert("cause".to_string(), serde_json::json!(source.to_string()));
            }
            Self::BuildFailed { diagnostics, .. } => {
                map.insert("diagnostics".to_string(), serde_json::json!(diagnostics));
            }
            _ => {}
        }
        map
    }
}

/// An error produced by the expression evaluator.
///
/// Rendered the way the language prints error values, for example
/// `Error(DivisionByZero: Division by zero.)`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Error({code}: {message})")]
pub struct EvalError {
    /// Error class reported by the evaluator (e.g. `DivisionByZero`).
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl EvalError {
    /// Creates a new evaluation error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Metadata about a structural error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));

        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }

        map
    }
}

/// Error raised when a pipeline block is structurally invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when a cycle is detected in the dependency graph.
///
/// The message names the node at which the cycle closed; the full path
/// is kept for diagnostics.
#[derive(Debug, Clone, Error)]
#[error("Pipeline has a dependency cycle involving node '{node}'")]
pub struct CycleDetectedError {
    /// A node on the cycle.
    pub node: String,
    /// The path of nodes forming the cycle, first node repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error from the cycle path.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let node = cycle_path.first().cloned().unwrap_or_default();
        let info = ContractErrorInfo::new(
            "PIPELINE-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the references in the cycle to break it.");

        Self {
            node,
            cycle_path,
            error_info: info,
        }
    }
}

/// Errors raised while encoding or decoding artifacts.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The value category has no artifact encoding.
    #[error("Cannot serialize a value of type {kind}{}", location_suffix(.location))]
    Unsupported {
        /// The offending value category.
        kind: ValueKind,
        /// Where inside the value it was found, if nested.
        location: Option<String>,
    },

    /// The artifact file does not exist.
    #[error("Artifact not found at '{}'", path.display())]
    Missing {
        /// The artifact path.
        path: PathBuf,
    },

    /// The artifact exists but cannot be decoded.
    #[error("Corrupt artifact{}: {reason}", path_suffix(.path))]
    Corrupt {
        /// The artifact path, when reading from disk.
        path: Option<PathBuf>,
        /// What went wrong.
        reason: String,
    },

    /// The encoder rejected the value.
    #[error("Failed to encode artifact: {0}")]
    Encode(String),
}

fn location_suffix(location: &Option<String>) -> String {
    location
        .as_ref()
        .map(|l| format!(" (at {l})"))
        .unwrap_or_default()
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" at '{}'", p.display()))
        .unwrap_or_default()
}

impl SerializationError {
    /// Creates a corrupt-artifact error with no path.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: None,
            reason: reason.into(),
        }
    }

    /// Attaches a path to a corrupt-artifact error.
    #[must_use]
    pub fn at_path(self, artifact: impl Into<PathBuf>) -> Self {
        match self {
            Self::Corrupt { path: None, reason } => Self::Corrupt {
                path: Some(artifact.into()),
                reason,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_first_node() {
        let err = CycleDetectedError::new(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.node, "a");
        assert_eq!(
            err.to_string(),
            "Pipeline has a dependency cycle involving node 'a'"
        );
        assert!(err.error_info.summary.contains("a -> b -> a"));
    }

    #[test]
    fn test_node_failed_rendering() {
        let err = PipelineError::NodeFailed {
            node: "a".into(),
            source: EvalError::new("DivisionByZero", "Division by zero."),
        };
        assert_eq!(
            err.to_string(),
            "Pipeline node 'a' failed: Error(DivisionByZero: Division by zero.)"
        );
        assert_eq!(err.kind(), ErrorKind::ValueError);
        assert_eq!(err.node(), Some("a"));
    }

    #[test]
    fn test_missing_node_is_key_error() {
        let err = PipelineError::MissingNode("missing".into());
        assert_eq!(err.kind(), ErrorKind::KeyError);
        assert_eq!(
            err.render(),
            "Error(KeyError: \"node 'missing' not found in Pipeline\")"
        );
    }

    #[test]
    fn test_missing_artifact_mentions_pattern() {
        let err = PipelineError::MissingArtifact {
            name: "c".into(),
            which_log: Some("2024".into()),
        };
        assert_eq!(err.to_string(), "node 'c' not found in any build log matching '2024'");
    }

    #[test]
    fn test_type_error_kind() {
        let err = PipelineError::expected_pipeline("pipeline_nodes", ValueKind::Int);
        assert_eq!(err.kind(), ErrorKind::TypeError);
        assert!(err.to_string().contains("pipeline_nodes"));
    }

    #[test]
    fn test_build_failure_keeps_diagnostics() {
        let err = PipelineError::BuildFailed {
            tool: "nix-build".into(),
            status: "exit status: 1".into(),
            diagnostics: "error: undefined variable 'pkgs'".into(),
        };
        assert_eq!(err.kind(), ErrorKind::FileError);
        assert!(err.to_string().contains("undefined variable 'pkgs'"));
        let dict = err.to_dict();
        assert_eq!(dict.get("kind").unwrap(), "FileError");
        assert!(dict.contains_key("diagnostics"));
    }

    #[test]
    fn test_serialization_error_path() {
        let err = SerializationError::corrupt("truncated").at_path("/tmp/x/artifact");
        assert_eq!(err.to_string(), "Corrupt artifact at '/tmp/x/artifact': truncated");
        let unsupported = SerializationError::Unsupported {
            kind: ValueKind::Function,
            location: Some("[1]".into()),
        };
        assert_eq!(
            unsupported.to_string(),
            "Cannot serialize a value of type Function (at [1])"
        );
    }

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("PIPELINE-DUPLICATE", "Duplicate node")
            .with_fix_hint("Rename one of the nodes")
            .with_context_entry("node", "x");

        assert_eq!(info.code, "PIPELINE-DUPLICATE");
        assert_eq!(info.context.get("node"), Some(&"x".to_string()));
        assert!(info.to_dict().contains_key("fix_hint"));
    }
}
