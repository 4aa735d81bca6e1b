//! Retrieval of built artifacts through the registry.

use regex::Regex;
use std::path::PathBuf;
use tracing::debug;

use super::{BuildRegistry, BuildRegistryEntry};
use crate::artifact;
use crate::errors::PipelineError;
use crate::value::{Environment, Value};

/// Returns registry entries whose build id matches `which_log`, newest
/// first. Without a pattern every entry matches.
///
/// # Errors
///
/// Returns a `ValueError` for an invalid pattern, or the registry's read
/// error.
pub fn select_entries(
    registry: &dyn BuildRegistry,
    which_log: Option<&str>,
) -> Result<Vec<BuildRegistryEntry>, PipelineError> {
    let entries = registry.entries()?;
    let Some(pattern) = which_log else {
        return Ok(entries);
    };
    let re = Regex::new(pattern)
        .map_err(|e| PipelineError::Value(format!("Invalid build log pattern '{pattern}': {e}")))?;
    Ok(entries
        .into_iter()
        .filter(|entry| re.is_match(&entry.build_id))
        .collect())
}

/// Finds the artifact path of `name` in the newest matching build that
/// contains it.
///
/// # Errors
///
/// Returns a `KeyError` if no matching build recorded the node.
pub fn resolve_artifact(
    registry: &dyn BuildRegistry,
    name: &str,
    which_log: Option<&str>,
) -> Result<(String, PathBuf), PipelineError> {
    select_entries(registry, which_log)?
        .into_iter()
        .find_map(|entry| {
            let path = entry.artifact(name)?.clone();
            Some((entry.build_id, path))
        })
        .ok_or_else(|| PipelineError::MissingArtifact {
            name: name.to_string(),
            which_log: which_log.map(str::to_string),
        })
}

/// Reads a node's value from a past build.
///
/// # Errors
///
/// Returns a `KeyError` if the node is not in any matching build, or a
/// `SerializationError` if its artifact is missing or corrupt.
pub fn read_node(
    registry: &dyn BuildRegistry,
    name: &str,
    which_log: Option<&str>,
) -> Result<Value, PipelineError> {
    let (build_id, path) = resolve_artifact(registry, name, which_log)?;
    debug!(node = %name, build_id = %build_id, path = %path.display(), "Reading node artifact");
    artifact::deserialize(&path)
}

/// Reads a node's value from a past build and binds it into `env` under
/// the node's name.
///
/// # Errors
///
/// Same as [`read_node`]; `env` is left untouched on error.
pub fn load_node(
    registry: &dyn BuildRegistry,
    env: &mut Environment,
    name: &str,
    which_log: Option<&str>,
) -> Result<(), PipelineError> {
    let value = read_node(registry, name, which_log)?;
    env.bind(name, value);
    Ok(())
}

/// Lists recorded build ids, newest first.
///
/// # Errors
///
/// Returns the registry's read error.
pub fn inspect_pipeline(registry: &dyn BuildRegistry) -> Result<Vec<String>, PipelineError> {
    Ok(registry
        .entries()?
        .into_iter()
        .map(|entry| entry.build_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::registry::InMemoryRegistry;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record_build(
        registry: &InMemoryRegistry,
        dir: &TempDir,
        build_id: &str,
        age_secs: i64,
        values: &[(&str, Value)],
    ) {
        let root = dir.path().join(build_id);
        let mut artifacts = BTreeMap::new();
        for (name, value) in values {
            let path = root.join(name).join("artifact");
            artifact::serialize(value, &path).unwrap();
            artifacts.insert((*name).to_string(), path);
        }
        registry
            .record(&BuildRegistryEntry {
                build_id: build_id.to_string(),
                created_at: Utc::now() - Duration::seconds(age_secs),
                root_output_path: root,
                artifacts,
            })
            .unwrap();
    }

    #[test]
    fn test_read_latest_by_default() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        record_build(&registry, &dir, "build_20240101", 100, &[("c", Value::Int(1))]);
        record_build(&registry, &dir, "build_20250101", 0, &[("c", Value::Int(2))]);

        assert_eq!(read_node(&registry, "c", None).unwrap(), Value::Int(2));
        assert_eq!(
            read_node(&registry, "c", Some("2024")).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            inspect_pipeline(&registry).unwrap(),
            vec!["build_20250101", "build_20240101"]
        );
    }

    #[test]
    fn test_falls_back_to_older_build_containing_node() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        record_build(&registry, &dir, "build_1", 10, &[("old_only", Value::str("x"))]);
        record_build(&registry, &dir, "build_2", 0, &[("other", Value::Null)]);

        assert_eq!(read_node(&registry, "old_only", None).unwrap(), Value::str("x"));
    }

    #[test]
    fn test_missing_node_is_key_error() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        record_build(&registry, &dir, "build_1", 0, &[("a", Value::Int(1))]);

        let err = read_node(&registry, "zzz", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyError);
        let err = read_node(&registry, "a", Some("^nomatch$")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyError);
    }

    #[test]
    fn test_invalid_pattern_is_value_error() {
        let registry = InMemoryRegistry::new();
        let err = read_node(&registry, "a", Some("(")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueError);
    }

    #[test]
    fn test_load_node_binds_into_environment() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        record_build(&registry, &dir, "build_1", 0, &[("a", Value::Int(7))]);

        let mut env = Environment::new();
        load_node(&registry, &mut env, "a", None).unwrap();
        assert_eq!(env.get("a"), Some(&Value::Int(7)));

        assert!(load_node(&registry, &mut env, "b", None).is_err());
        assert!(!env.contains("b"));
    }
}
