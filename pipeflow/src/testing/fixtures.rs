//! Fixtures for tests that touch the filesystem.
//!
//! Every fixture takes the directory to work in, normally a
//! `tempfile::TempDir` owned by the test.

use std::path::Path;
use std::sync::Arc;

use super::ExprEvaluator;
use crate::build::LocalBuildTool;
use crate::config::{BuildConfig, PipeflowConfig};
use crate::errors::PipelineError;
use crate::pipeline::evaluate_block;
use crate::registry::FileRegistry;
use crate::value::{Environment, Value};

/// Build settings with the work directory under `dir`.
#[must_use]
pub fn build_config(dir: &Path) -> BuildConfig {
    BuildConfig::default()
        .with_work_dir(dir.join("_pipeline"))
        .with_timeout_seconds(Some(60.0))
}

/// Full configuration rooted at `dir`.
#[must_use]
pub fn config(dir: &Path) -> PipeflowConfig {
    PipeflowConfig::default()
        .with_build(build_config(dir))
        .with_registry_dir(dir.join("_pipeline").join("registry"))
}

/// A file registry under `dir`.
#[must_use]
pub fn file_registry(dir: &Path) -> FileRegistry {
    FileRegistry::new(dir.join("_pipeline").join("registry"))
}

/// An in-process build tool using [`ExprEvaluator`], storing under `dir`.
#[must_use]
pub fn local_tool(dir: &Path) -> LocalBuildTool {
    LocalBuildTool::new(Arc::new(ExprEvaluator::new()), dir.join("store"))
}

/// Evaluates a pipeline block with [`ExprEvaluator`] and no enclosing
/// bindings.
///
/// # Errors
///
/// Returns any build or evaluation error.
pub fn pipeline(declarations: &[(&str, &str)]) -> Result<Value, PipelineError> {
    evaluate_block(
        declarations.iter().copied(),
        &ExprEvaluator::new(),
        &Environment::new(),
    )
}
