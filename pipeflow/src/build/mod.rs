//! Hermetic builds of pipelines.
//!
//! [`build_pipeline`] compiles a fully evaluated pipeline into a
//! derivation graph, writes the description and node scripts to the work
//! directory, has a [`BuildTool`] realise it and, only once that
//! succeeded, publishes a registry entry pointing at the artifacts.

mod cancellation;
mod compiler;
mod tool;

pub use cancellation::CancellationToken;
pub use compiler::{
    generate_script, BuildCompiler, CompiledBuild, DerivationSpec, ARTIFACT_FILE, DEP_ENV_PREFIX,
};
pub use tool::{BuildRequest, BuildTool, LocalBuildTool, NixBuildTool};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use crate::config::BuildConfig;
use crate::errors::PipelineError;
use crate::pipeline::{NodeResult, Pipeline};
use crate::registry::{BuildRegistry, BuildRegistryEntry};

/// The result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// The registry id of this build.
    pub build_id: String,
    /// The aggregate output root.
    pub root: PathBuf,
    /// Node name to artifact path.
    pub artifacts: BTreeMap<String, PathBuf>,
}

/// Builds a pipeline and records the result in the registry.
///
/// Nothing is recorded unless the build tool succeeds, so a failed,
/// timed out or cancelled build leaves the registry unchanged.
///
/// # Errors
///
/// Returns a `ValueError` if any node is unresolved, failed or reads a
/// name from the enclosing environment, a
/// `FileError` if the generated files cannot be written or the build tool
/// fails, and the registry's error if publishing fails.
pub async fn build_pipeline(
    pipeline: &Pipeline,
    config: &BuildConfig,
    tool: &dyn BuildTool,
    registry: &dyn BuildRegistry,
    cancel: &CancellationToken,
) -> Result<BuildOutcome, PipelineError> {
    let start = Instant::now();
    ensure_buildable(pipeline)?;

    let compiled = BuildCompiler::new(config).compile(pipeline)?;
    let description_path = write_build_files(&compiled, config)?;
    info!(
        tool = tool.name(),
        nodes = compiled.derivations.len(),
        description = %description_path.display(),
        "Starting pipeline build"
    );

    if cancel.is_cancelled() {
        return Err(PipelineError::BuildCancelled(
            cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
        ));
    }

    let request = BuildRequest {
        compiled: &compiled,
        description_path: &description_path,
    };
    let root = tool.realize(&request, cancel).await?;

    let artifacts: BTreeMap<String, PathBuf> = compiled
        .derivations
        .iter()
        .map(|d| (d.node_name.clone(), root.join(&d.node_name).join(ARTIFACT_FILE)))
        .collect();

    let entry = BuildRegistryEntry::new(&root, artifacts);
    registry.record(&entry)?;

    info!(
        build_id = %entry.build_id,
        root = %root.display(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Pipeline build complete"
    );

    Ok(BuildOutcome {
        build_id: entry.build_id,
        root,
        artifacts: entry.artifacts,
    })
}

fn ensure_buildable(pipeline: &Pipeline) -> Result<(), PipelineError> {
    if pipeline.has_errors() {
        return Err(PipelineError::Value(format!(
            "Cannot build a pipeline with failed nodes: {}",
            pipeline.failed_nodes().join(", ")
        )));
    }
    let unresolved: Vec<&str> = pipeline
        .nodes()
        .iter()
        .filter(|n| matches!(n.result, NodeResult::Unresolved))
        .map(|n| n.name.as_str())
        .collect();
    if !unresolved.is_empty() {
        return Err(PipelineError::Value(format!(
            "Cannot build a pipeline with unevaluated nodes: {}",
            unresolved.join(", ")
        )));
    }
    // Derivations only see upstream artifacts.
    if let Some(node) = pipeline.nodes().iter().find(|n| !n.external_refs.is_empty()) {
        return Err(PipelineError::Value(format!(
            "Cannot build node '{}': it reads '{}' from outside the pipeline",
            node.name,
            node.external_refs.join("', '")
        )));
    }
    Ok(())
}

/// Writes the description and node scripts, returning the description path.
///
/// # Errors
///
/// Returns a `FileError` if any file cannot be written.
pub fn write_build_files(compiled: &CompiledBuild, config: &BuildConfig) -> Result<PathBuf, PipelineError> {
    let scripts_dir = config.scripts_dir();
    fs::create_dir_all(&scripts_dir).map_err(|e| PipelineError::io(&scripts_dir, e))?;

    for derivation in &compiled.derivations {
        write_file(
            &scripts_dir.join(derivation.script_file_name()),
            &derivation.generated_script,
        )?;
    }

    let description_path = config.description_path();
    write_file(&description_path, &compiled.description)?;
    Ok(description_path)
}

fn write_file(path: &Path, contents: &str) -> Result<(), PipelineError> {
    fs::write(path, contents).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, EvalError};
    use crate::evaluator::NodeBody;
    use crate::pipeline::{evaluate_block, PipelineNode};
    use crate::registry::{read_node, InMemoryRegistry};
    use crate::testing::{fixtures, ExprEvaluator};
    use crate::value::{Environment, Value};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_records_entry() {
        let dir = TempDir::new().unwrap();
        let config = fixtures::build_config(dir.path());
        let registry = InMemoryRegistry::new();
        let tool = fixtures::local_tool(dir.path());

        let p = evaluate_block([("a", "1"), ("b", "a + 1")], &ExprEvaluator::new(), &Environment::new()).unwrap();
        let outcome = build_pipeline(
            p.as_pipeline().unwrap(),
            &config,
            &tool,
            &registry,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(outcome.artifacts.len(), 2);
        assert!(config.description_path().is_file());
        assert!(config.scripts_dir().join("b.t").is_file());
        assert_eq!(read_node(&registry, "b", None).unwrap(), Value::Int(2));
    }

    #[tokio::test]
    async fn test_failed_pipeline_rejected() {
        let dir = TempDir::new().unwrap();
        let mut bad = PipelineNode::new("a", NodeBody::new("1 / 0"), Vec::new());
        bad.result = NodeResult::Failed(EvalError::new("DivisionByZero", "Division by zero."));
        let pipeline = Pipeline::from_nodes(vec![bad]);
        let registry = InMemoryRegistry::new();

        let err = build_pipeline(
            &pipeline,
            &fixtures::build_config(dir.path()),
            &fixtures::local_tool(dir.path()),
            &registry,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueError);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_enclosing_references_rejected_before_writing() {
        let dir = TempDir::new().unwrap();
        let config = fixtures::build_config(dir.path());
        let registry = InMemoryRegistry::new();
        let env = Environment::new().with("k", 2_i64);
        let p = evaluate_block([("a", "k * 3"), ("b", "a + 1")], &ExprEvaluator::new(), &env).unwrap();

        let err = build_pipeline(
            p.as_pipeline().unwrap(),
            &config,
            &fixtures::local_tool(dir.path()),
            &registry,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.render(),
            "Error(ValueError: \"Cannot build node 'a': it reads 'k' from outside the pipeline\")"
        );
        assert!(!config.description_path().exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_build_leaves_registry_untouched() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let cancel = CancellationToken::new();
        cancel.cancel("shutdown");
        let p = evaluate_block([("a", "1")], &ExprEvaluator::new(), &Environment::new()).unwrap();

        let err = build_pipeline(
            p.as_pipeline().unwrap(),
            &fixtures::build_config(dir.path()),
            &LocalBuildTool::new(Arc::new(ExprEvaluator::new()), dir.path().join("store")),
            &registry,
            &cancel,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileError);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failing_tool_leaves_registry_untouched() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let p = evaluate_block([("a", "1")], &ExprEvaluator::new(), &Environment::new()).unwrap();
        let tool = NixBuildTool::new(dir.path().join("missing-nix-build").to_string_lossy());

        let err = build_pipeline(
            p.as_pipeline().unwrap(),
            &fixtures::build_config(dir.path()),
            &tool,
            &registry,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileError);
        assert!(registry.is_empty());
    }
}
