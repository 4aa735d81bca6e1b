//! Compiles a pipeline into a Nix derivation graph.
//!
//! Each node becomes one `runCommand` derivation whose inputs are the
//! derivations of its dependencies. Inside the derivation a generated
//! script deserializes the upstream artifacts, evaluates the node body
//! and serializes the result to `$out/artifact`. A final aggregate
//! derivation copies every node output under one root.
//!
//! Compilation is pure: the same pipeline and configuration always
//! produce byte-identical text, so the build tool's own caching applies.

use std::fmt::Write as _;

use crate::config::BuildConfig;
use crate::errors::PipelineError;
use crate::evaluator::NodeBody;
use crate::pipeline::{topological_order, Pipeline, PipelineSkeleton};

/// Name of the artifact file inside every node output.
pub const ARTIFACT_FILE: &str = "artifact";

/// Prefix of the environment variables carrying upstream output paths.
pub const DEP_ENV_PREFIX: &str = "PIPEFLOW_DEP_";

/// Extension of generated node scripts.
pub const SCRIPT_EXTENSION: &str = "t";

/// The compiled form of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationSpec {
    /// The node's name.
    pub node_name: String,
    /// The node's dependencies, in declaration order.
    pub upstream_names: Vec<String>,
    /// The node's body.
    pub body: NodeBody,
    /// The stand-alone script run inside the derivation.
    pub generated_script: String,
    /// This derivation's binding in the description.
    pub description_fragment: String,
}

impl DerivationSpec {
    /// File name of the generated script.
    #[must_use]
    pub fn script_file_name(&self) -> String {
        format!("{}.{SCRIPT_EXTENSION}", self.node_name)
    }
}

/// A complete derivation graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBuild {
    /// The full description file text.
    pub description: String,
    /// Derivations in dependency order.
    pub derivations: Vec<DerivationSpec>,
}

impl CompiledBuild {
    /// Looks up the derivation of a node.
    #[must_use]
    pub fn derivation(&self, node: &str) -> Option<&DerivationSpec> {
        self.derivations.iter().find(|d| d.node_name == node)
    }

    /// Returns the node names in dependency order.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.derivations.iter().map(|d| d.node_name.clone()).collect()
    }
}

/// Emits the derivation graph of a pipeline.
#[derive(Debug, Clone)]
pub struct BuildCompiler<'a> {
    config: &'a BuildConfig,
}

impl<'a> BuildCompiler<'a> {
    /// Creates a compiler using the given build settings.
    #[must_use]
    pub fn new(config: &'a BuildConfig) -> Self {
        Self { config }
    }

    /// Compiles every node of `pipeline`.
    ///
    /// # Errors
    ///
    /// Returns a `ValueError` if the pipeline is empty or its graph is not
    /// fully orderable.
    pub fn compile(&self, pipeline: &Pipeline) -> Result<CompiledBuild, PipelineError> {
        if pipeline.is_empty() {
            return Err(PipelineError::Value("Cannot compile an empty pipeline".to_string()));
        }

        let skeleton = PipelineSkeleton::from_nodes(pipeline.nodes().to_vec());
        let order = topological_order(&skeleton);
        if order.len() != pipeline.len() {
            return Err(PipelineError::Value(
                "Pipeline graph cannot be ordered for compilation".to_string(),
            ));
        }

        let derivations: Vec<DerivationSpec> = order
            .into_iter()
            .map(|i| {
                let node = &pipeline.nodes()[i];
                let generated_script = generate_script(&node.name, &node.dependencies, &node.body);
                let description_fragment = self.fragment(&node.name, &node.dependencies);
                DerivationSpec {
                    node_name: node.name.clone(),
                    upstream_names: node.dependencies.clone(),
                    body: node.body.clone(),
                    generated_script,
                    description_fragment,
                }
            })
            .collect();

        let description = self.description(&derivations);
        Ok(CompiledBuild {
            description,
            derivations,
        })
    }

    fn fragment(&self, name: &str, upstream: &[String]) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "  {} = pkgs.runCommand \"pipeflow-node-{name}\" {{",
            derivation_attr(name)
        );
        if let Some(package) = &self.config.interpreter_package {
            let _ = writeln!(out, "    nativeBuildInputs = [ pkgs.{package} ];");
        }
        for dep in upstream {
            let _ = writeln!(out, "    {DEP_ENV_PREFIX}{dep} = {};", derivation_attr(dep));
        }
        out.push_str("  } ''\n");
        out.push_str("    mkdir -p $out\n");
        let command: Vec<String> = self
            .config
            .interpreter
            .iter()
            .map(|arg| escape_indented(arg))
            .collect();
        let _ = writeln!(
            out,
            "    {} ${{./scripts/{name}.{SCRIPT_EXTENSION}}}",
            command.join(" ")
        );
        out.push_str("  '';\n");
        out
    }

    fn description(&self, derivations: &[DerivationSpec]) -> String {
        let mut out = String::new();
        out.push_str("# Generated by pipeflow. Do not edit.\n");
        out.push_str("let\n");
        let _ = writeln!(out, "  pkgs = import {} {{}};", self.config.nixpkgs);
        out.push('\n');
        for derivation in derivations {
            out.push_str(&derivation.description_fragment);
            out.push('\n');
        }
        out.push_str("in\n");
        out.push_str("pkgs.runCommand \"pipeflow-pipeline\" {} ''\n");
        out.push_str("  mkdir -p $out\n");
        for derivation in derivations {
            let _ = writeln!(
                out,
                "  cp -r ${{{}}} $out/{}",
                derivation_attr(&derivation.node_name),
                derivation.node_name
            );
        }
        out.push_str("''\n");
        out
    }
}

fn derivation_attr(node: &str) -> String {
    format!("node_{node}")
}

/// Escapes text for a Nix indented string.
fn escape_indented(text: &str) -> String {
    text.replace("''", "'''").replace("${", "''${")
}

/// Generates the script evaluated inside a node's derivation.
#[must_use]
pub fn generate_script(name: &str, upstream: &[String], body: &NodeBody) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- pipeflow node '{name}'");
    for dep in upstream {
        let _ = writeln!(
            out,
            "{dep} = deserialize(env(\"{DEP_ENV_PREFIX}{dep}\") + \"/{ARTIFACT_FILE}\")"
        );
    }
    let _ = writeln!(out, "{name} = {}", body.source());
    let _ = writeln!(out, "serialize({name}, env(\"out\") + \"/{ARTIFACT_FILE}\")");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::evaluate_block;
    use crate::testing::ExprEvaluator;
    use crate::value::Environment;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn linear() -> Arc<Pipeline> {
        let value = evaluate_block(
            [("c", "b * 2"), ("a", "1"), ("b", "a + 1")],
            &ExprEvaluator::new(),
            &Environment::new(),
        )
        .unwrap();
        Arc::clone(value.as_pipeline().unwrap())
    }

    #[test]
    fn test_derivations_in_dependency_order() {
        let config = BuildConfig::default();
        let compiled = BuildCompiler::new(&config).compile(&linear()).unwrap();
        assert_eq!(compiled.node_names(), vec!["a", "b", "c"]);
        assert_eq!(compiled.derivation("c").unwrap().upstream_names, vec!["b"]);
    }

    #[test]
    fn test_script_reads_upstream_and_writes_output() {
        let script = generate_script("c", &["b".to_string()], &NodeBody::new("b * 2"));
        assert_eq!(
            script,
            "-- pipeflow node 'c'\n\
             b = deserialize(env(\"PIPEFLOW_DEP_b\") + \"/artifact\")\n\
             c = b * 2\n\
             serialize(c, env(\"out\") + \"/artifact\")\n"
        );
    }

    #[test]
    fn test_description_wires_inputs() {
        let config = BuildConfig::default().with_interpreter_package("tlang");
        let compiled = BuildCompiler::new(&config).compile(&linear()).unwrap();
        let text = &compiled.description;

        assert!(text.contains("pkgs = import <nixpkgs> {};"));
        assert!(text.contains("node_b = pkgs.runCommand \"pipeflow-node-b\" {"));
        assert!(text.contains("    PIPEFLOW_DEP_a = node_a;"));
        assert!(text.contains("nativeBuildInputs = [ pkgs.tlang ];"));
        assert!(text.contains("    t run ${./scripts/c.t}"));
        assert!(text.contains("  cp -r ${node_c} $out/c"));
    }

    #[test]
    fn test_default_config_provides_interpreter() {
        let config = BuildConfig::default();
        let compiled = BuildCompiler::new(&config).compile(&linear()).unwrap();
        let fragment = &compiled.derivation("a").unwrap().description_fragment;
        assert!(fragment.contains("    nativeBuildInputs = [ pkgs.t ];"));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let config = BuildConfig::default();
        let compiler = BuildCompiler::new(&config);
        assert_eq!(compiler.compile(&linear()).unwrap(), compiler.compile(&linear()).unwrap());
    }

    #[test]
    fn test_escape_indented() {
        assert_eq!(escape_indented("a''b${c}"), "a'''b''${c}");
    }
}
