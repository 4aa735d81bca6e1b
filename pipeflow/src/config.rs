//! Configuration for builds, the registry and logging.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::PipelineError;

/// Environment variable overriding [`BuildConfig::build_tool`].
pub const ENV_BUILD_TOOL: &str = "PIPEFLOW_BUILD_TOOL";
/// Environment variable overriding [`BuildConfig::work_dir`].
pub const ENV_WORK_DIR: &str = "PIPEFLOW_WORK_DIR";
/// Environment variable overriding [`RegistryConfig::dir`].
pub const ENV_REGISTRY_DIR: &str = "PIPEFLOW_REGISTRY_DIR";
/// Environment variable overriding [`BuildConfig::timeout_seconds`]
/// (`0` or `none` disables the timeout).
pub const ENV_BUILD_TIMEOUT: &str = "PIPEFLOW_BUILD_TIMEOUT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipeflowConfig {
    /// Build compiler and build tool settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Registry location.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipeflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `PIPEFLOW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ValueError` if `PIPEFLOW_BUILD_TIMEOUT` is not a number.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Loads a configuration from a JSON file. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if the file cannot be read, or a `ValueError`
    /// if it is not valid configuration JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            PipelineError::Value(format!("Invalid configuration in '{}': {e}", path.display()))
        })
    }

    /// Applies overrides looked up by variable name.
    ///
    /// # Errors
    ///
    /// Returns a `ValueError` for an unparsable timeout.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tool) = lookup(ENV_BUILD_TOOL) {
            self.build.build_tool = tool;
        }
        if let Some(dir) = lookup(ENV_WORK_DIR) {
            self.build.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_REGISTRY_DIR) {
            self.registry.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_BUILD_TIMEOUT) {
            self.build.timeout_seconds = parse_timeout(&raw)?;
        }
        Ok(self)
    }

    /// Sets the build configuration.
    #[must_use]
    pub fn with_build(mut self, build: BuildConfig) -> Self {
        self.build = build;
        self
    }

    /// Sets the registry directory.
    #[must_use]
    pub fn with_registry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.registry.dir = dir.into();
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

fn parse_timeout(raw: &str) -> Result<Option<f64>, PipelineError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let seconds: f64 = raw
        .parse()
        .map_err(|_| PipelineError::Value(format!("{ENV_BUILD_TIMEOUT} must be a number, got '{raw}'")))?;
    if seconds <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        PipelineError::Value(format!("{ENV_BUILD_TIMEOUT} is out of range, got '{raw}'"))
    })?;
    Ok(Some(seconds))
}

/// Settings for compiling and realising builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// The external build tool program.
    #[serde(default = "default_build_tool")]
    pub build_tool: String,
    /// Arguments passed before the description file.
    #[serde(default = "default_build_tool_args")]
    pub build_tool_args: Vec<String>,
    /// Command that runs a node script inside a derivation.
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
    /// Package attribute providing the interpreter, added to each
    /// derivation's build inputs. `None` leaves the inputs empty, which only
    /// works when the build tool runs outside a sandbox.
    #[serde(default = "default_interpreter_package")]
    pub interpreter_package: Option<String>,
    /// Directory receiving the description file and node scripts.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Build tool timeout in seconds; `None` waits indefinitely.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: Option<f64>,
    /// Expression importing the package set.
    #[serde(default = "default_nixpkgs")]
    pub nixpkgs: String,
}

fn default_build_tool() -> String {
    "nix-build".to_string()
}

fn default_build_tool_args() -> Vec<String> {
    vec!["--no-out-link".to_string()]
}

fn default_interpreter() -> Vec<String> {
    vec!["t".to_string(), "run".to_string()]
}

#[allow(clippy::unnecessary_wraps)]
fn default_interpreter_package() -> Option<String> {
    Some("t".to_string())
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("_pipeline")
}

#[allow(clippy::unnecessary_wraps)]
fn default_timeout_seconds() -> Option<f64> {
    Some(3600.0)
}

fn default_nixpkgs() -> String {
    "<nixpkgs>".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_tool: default_build_tool(),
            build_tool_args: default_build_tool_args(),
            interpreter: default_interpreter(),
            interpreter_package: default_interpreter_package(),
            work_dir: default_work_dir(),
            timeout_seconds: default_timeout_seconds(),
            nixpkgs: default_nixpkgs(),
        }
    }
}

impl BuildConfig {
    /// Creates a build configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the build tool program.
    #[must_use]
    pub fn with_build_tool(mut self, program: impl Into<String>) -> Self {
        self.build_tool = program.into();
        self
    }

    /// Sets the build tool arguments.
    #[must_use]
    pub fn with_build_tool_args(mut self, args: Vec<String>) -> Self {
        self.build_tool_args = args;
        self
    }

    /// Sets the interpreter command.
    #[must_use]
    pub fn with_interpreter(mut self, command: Vec<String>) -> Self {
        self.interpreter = command;
        self
    }

    /// Sets the interpreter package attribute.
    #[must_use]
    pub fn with_interpreter_package(mut self, attr: impl Into<String>) -> Self {
        self.interpreter_package = Some(attr.into());
        self
    }

    /// Sets the work directory.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Sets the timeout; `None` disables it.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: Option<f64>) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Gets the timeout as a Duration. Values too large to represent mean
    /// no timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Path of the generated description file.
    #[must_use]
    pub fn description_path(&self) -> PathBuf {
        self.work_dir.join("pipeline.nix")
    }

    /// Directory of the generated node scripts.
    #[must_use]
    pub fn scripts_dir(&self) -> PathBuf {
        self.work_dir.join("scripts")
    }
}

/// Location of the build registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding one record per build.
    #[serde(default = "default_registry_dir")]
    pub dir: PathBuf,
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from("_pipeline/registry")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: default_registry_dir(),
        }
    }
}

/// Logging setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_directive")]
    pub default_directive: String,
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_directive() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: default_directive(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the default directive.
    #[must_use]
    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Enables or disables JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipeflowConfig::default();
        assert_eq!(config.build.build_tool, "nix-build");
        assert_eq!(config.build.build_tool_args, vec!["--no-out-link"]);
        assert_eq!(config.build.interpreter_package.as_deref(), Some("t"));
        assert_eq!(config.build.description_path(), PathBuf::from("_pipeline/pipeline.nix"));
        assert_eq!(config.build.timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.registry.dir, PathBuf::from("_pipeline/registry"));
        assert_eq!(config.logging.default_directive, "info");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BUILD_TOOL, "/opt/nix/bin/nix-build"),
            (ENV_REGISTRY_DIR, "/var/pipeflow"),
            (ENV_BUILD_TIMEOUT, "0"),
        ]
        .into_iter()
        .collect();

        let config = PipeflowConfig::default()
            .with_env_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.build.build_tool, "/opt/nix/bin/nix-build");
        assert_eq!(config.registry.dir, PathBuf::from("/var/pipeflow"));
        assert_eq!(config.build.timeout(), None);
        assert_eq!(config.build.work_dir, PathBuf::from("_pipeline"));
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let err = PipeflowConfig::default()
            .with_env_overrides(|k| (k == ENV_BUILD_TIMEOUT).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn test_out_of_range_timeout() {
        let err = PipeflowConfig::default()
            .with_env_overrides(|k| (k == ENV_BUILD_TIMEOUT).then(|| "1e20".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ValueError);
        assert!(err.to_string().contains("out of range"));

        for seconds in [1e20, f64::INFINITY, f64::NAN] {
            let build = BuildConfig::default().with_timeout_seconds(Some(seconds));
            assert_eq!(build.timeout(), None);
        }
    }

    #[test]
    fn test_partial_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeflow.json");
        std::fs::write(&path, r#"{"build": {"timeout_seconds": 5, "interpreter": ["tlang"]}}"#).unwrap();

        let config = PipeflowConfig::from_json_file(&path).unwrap();
        assert_eq!(config.build.timeout_seconds, Some(5.0));
        assert_eq!(config.build.interpreter, vec!["tlang"]);
        assert_eq!(config.build.build_tool, "nix-build");
        assert_eq!(config.registry, RegistryConfig::default());
    }
}
