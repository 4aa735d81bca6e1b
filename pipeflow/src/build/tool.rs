//! Build tool drivers.
//!
//! [`NixBuildTool`] runs the external build tool as one subprocess per
//! build and waits for it, bounded by a timeout and a cancellation token.
//! On unix the tool runs in its own process group, and the whole group is
//! killed when the wait is abandoned.
//! [`LocalBuildTool`] realises the same compiled derivations in process,
//! into a content-addressed directory store.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::cancellation::CancellationToken;
use super::compiler::{CompiledBuild, DerivationSpec, ARTIFACT_FILE};
use crate::artifact;
use crate::config::BuildConfig;
use crate::errors::PipelineError;
use crate::evaluator::Evaluator;
use crate::value::Environment;

/// Everything a build tool needs to realise a compiled build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    /// The compiled derivation graph.
    pub compiled: &'a CompiledBuild,
    /// Where the description file was written.
    pub description_path: &'a Path,
}

/// Realises a compiled build and returns the aggregate output root.
///
/// The root must contain `<node>/artifact` for every node.
#[async_trait]
pub trait BuildTool: Send + Sync + Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Realises the build.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if the tool fails, times out or is cancelled.
    async fn realize(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError>;
}

/// Drives an external build tool such as `nix-build`.
#[derive(Debug, Clone)]
pub struct NixBuildTool {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl NixBuildTool {
    /// Creates a driver for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Creates a driver from build settings.
    #[must_use]
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            program: config.build_tool.clone(),
            args: config.build_tool_args.clone(),
            timeout: config.timeout(),
        }
    }

    /// Sets the arguments passed before the description path.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

/// Kills every process in the tool's group, not only the direct child.
#[cfg(unix)]
async fn kill_process_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else {
        return;
    };
    let status = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => debug!(pgid, "Build tool process group killed"),
        Ok(status) => warn!(pgid, %status, "Failed to kill build tool process group"),
        Err(e) => warn!(pgid, error = %e, "Failed to kill build tool process group"),
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pgid: Option<u32>) {}

#[async_trait]
impl BuildTool for NixBuildTool {
    fn name(&self) -> &str {
        &self.program
    }

    async fn realize(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        let start = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(request.description_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|source| PipelineError::BuildToolUnavailable {
                tool: self.program.clone(),
                source,
            })?;
        info!(
            tool = %self.program,
            description = %request.description_path.display(),
            derivations = request.compiled.derivations.len(),
            "Build tool started"
        );

        // The child leads its own group, so its pid is the group id.
        let pgid = child.id();
        // Dropping this future drops the child, which kills it.
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            output = &mut wait => output.map_err(|e| PipelineError::io(request.description_path, e))?,
            () = cancel.cancelled() => {
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                warn!(tool = %self.program, reason = %reason, "Build tool killed on cancellation");
                kill_process_group(pgid).await;
                return Err(PipelineError::BuildCancelled(reason));
            }
            () = deadline(self.timeout) => {
                let seconds = self.timeout.map_or(0.0, |t| t.as_secs_f64());
                warn!(tool = %self.program, seconds, "Build tool timed out, killing it");
                kill_process_group(pgid).await;
                return Err(PipelineError::BuildTimedOut {
                    tool: self.program.clone(),
                    seconds,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let mut diagnostics = stderr.trim_end().to_string();
            if !stdout.trim().is_empty() {
                if !diagnostics.is_empty() {
                    diagnostics.push('\n');
                }
                diagnostics.push_str(stdout.trim_end());
            }
            return Err(PipelineError::BuildFailed {
                tool: self.program.clone(),
                status: output.status.to_string(),
                diagnostics,
            });
        }

        let root = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| PipelineError::BuildFailed {
                tool: self.program.clone(),
                status: output.status.to_string(),
                diagnostics: format!("build tool printed no output path\n{}", stderr.trim_end()),
            })?;

        info!(
            tool = %self.program,
            root = %root.display(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Build tool finished"
        );
        Ok(root)
    }
}

/// Realises builds in process.
///
/// Each derivation's output directory is named after a hash of its script
/// and its inputs' output paths, so an unchanged node with unchanged
/// inputs is reused rather than evaluated again.
#[derive(Debug, Clone)]
pub struct LocalBuildTool {
    evaluator: Arc<dyn Evaluator>,
    store_dir: PathBuf,
}

impl LocalBuildTool {
    /// Creates a local tool writing outputs under `store_dir`.
    #[must_use]
    pub fn new(evaluator: Arc<dyn Evaluator>, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            evaluator,
            store_dir: store_dir.into(),
        }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn output_path(&self, label: &str, inputs: &[&str]) -> PathBuf {
        let mut hasher = Sha256::new();
        for input in inputs {
            hasher.update((input.len() as u64).to_le_bytes());
            hasher.update(input.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        self.store_dir.join(format!("{}-{label}", &digest[..32]))
    }

    async fn realize_node(
        &self,
        derivation: &DerivationSpec,
        outputs: &HashMap<String, PathBuf>,
    ) -> Result<PathBuf, PipelineError> {
        let mut inputs: Vec<String> = vec![derivation.generated_script.clone()];
        for dep in &derivation.upstream_names {
            let path = outputs.get(dep).ok_or_else(|| {
                PipelineError::Value(format!(
                    "Derivation '{}' realised before its input '{dep}'",
                    derivation.node_name
                ))
            })?;
            inputs.push(format!("{dep}={}", path.display()));
        }
        let input_refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let out = self.output_path(&format!("pipeflow-node-{}", derivation.node_name), &input_refs);

        if out.join(ARTIFACT_FILE).is_file() {
            debug!(node = %derivation.node_name, out = %out.display(), "Derivation already realised");
            return Ok(out);
        }

        let mut env = Environment::new();
        for dep in &derivation.upstream_names {
            if let Some(path) = outputs.get(dep) {
                env.bind(dep.clone(), artifact::deserialize(&path.join(ARTIFACT_FILE))?);
            }
        }

        let evaluator = Arc::clone(&self.evaluator);
        let body = derivation.body.clone();
        let result = tokio::task::spawn_blocking(move || evaluator.evaluate(&body, &env))
            .await
            .map_err(|e| PipelineError::Value(format!("Evaluation task failed: {e}")))?;
        let value = result.map_err(|err| PipelineError::BuildFailed {
            tool: self.name().to_string(),
            status: format!("derivation 'pipeflow-node-{}' failed", derivation.node_name),
            diagnostics: err.to_string(),
        })?;

        let staging = out.with_extension("tmp");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| PipelineError::io(&staging, e))?;
        }
        artifact::serialize(&value, &staging.join(ARTIFACT_FILE))?;
        fs::rename(&staging, &out).map_err(|e| PipelineError::io(&out, e))?;

        debug!(node = %derivation.node_name, out = %out.display(), "Derivation realised");
        Ok(out)
    }

    fn link_root(
        &self,
        compiled: &CompiledBuild,
        outputs: &HashMap<String, PathBuf>,
    ) -> Result<PathBuf, PipelineError> {
        let mut inputs = Vec::with_capacity(compiled.derivations.len());
        for derivation in &compiled.derivations {
            let path = outputs.get(&derivation.node_name).map_or_else(String::new, |p| {
                format!("{}={}", derivation.node_name, p.display())
            });
            inputs.push(path);
        }
        let input_refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let root = self.output_path("pipeflow-pipeline", &input_refs);
        if root.is_dir() {
            return Ok(root);
        }

        let staging = root.with_extension("tmp");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| PipelineError::io(&staging, e))?;
        }
        for derivation in &compiled.derivations {
            let Some(src) = outputs.get(&derivation.node_name) else {
                continue;
            };
            let dest = staging.join(&derivation.node_name);
            fs::create_dir_all(&dest).map_err(|e| PipelineError::io(&dest, e))?;
            fs::copy(src.join(ARTIFACT_FILE), dest.join(ARTIFACT_FILE))
                .map_err(|e| PipelineError::io(&dest, e))?;
        }
        fs::rename(&staging, &root).map_err(|e| PipelineError::io(&root, e))?;
        Ok(root)
    }
}

#[async_trait]
impl BuildTool for LocalBuildTool {
    fn name(&self) -> &str {
        "local"
    }

    async fn realize(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(&self.store_dir).map_err(|e| PipelineError::io(&self.store_dir, e))?;

        let mut outputs: HashMap<String, PathBuf> = HashMap::new();
        for derivation in &request.compiled.derivations {
            if cancel.is_cancelled() {
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                warn!(node = %derivation.node_name, reason = %reason, "Local build cancelled");
                return Err(PipelineError::BuildCancelled(reason));
            }
            let out = self.realize_node(derivation, &outputs).await?;
            outputs.insert(derivation.node_name.clone(), out);
        }

        let root = self.link_root(request.compiled, &outputs)?;
        info!(root = %root.display(), nodes = outputs.len(), "Local build finished");
        Ok(root)
    }
}
