//! # Pipeflow
//!
//! The pipeline subsystem of a data-analysis language.
//!
//! A pipeline block is a set of named computations that may refer to each
//! other in any declaration order. Pipeflow provides:
//!
//! - **Graph construction**: dependencies are discovered from node bodies
//!   through the language's evaluator
//! - **In-process execution**: cycle detection up front, deterministic
//!   topological evaluation, fail-fast errors, fingerprint-based reuse on
//!   re-run
//! - **Hermetic builds**: compilation to a Nix derivation graph, one
//!   derivation per node, realised by an external build tool
//! - **Artifacts and registry**: Arrow IPC / MessagePack artifacts indexed
//!   by an append-only build registry, readable from later processes
//! - **Introspection**: node lists, dependency maps, lineage traces
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeflow::prelude::*;
//!
//! let eval = ExprEvaluator::new();
//! let p = evaluate_block(
//!     [("sum", "x + y"), ("x", "1"), ("y", "2")],
//!     &eval,
//!     &Environment::new(),
//! )?;
//! assert_eq!(pipeline_node(&p, "sum")?, Value::Int(3));
//!
//! let config = PipeflowConfig::from_env()?;
//! let registry = FileRegistry::new(&config.registry.dir);
//! let tool = NixBuildTool::from_config(&config.build);
//! let outcome = build_pipeline(
//!     p.as_pipeline().unwrap(),
//!     &config.build,
//!     &tool,
//!     &registry,
//!     &CancellationToken::new(),
//! )
//! .await?;
//! let sum = read_node(&registry, "sum", None)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifact;
pub mod build;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod introspect;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod testing;
pub mod value;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifact::{deserialize, serialize, ArtifactFormat};
    pub use crate::build::{
        build_pipeline, BuildOutcome, BuildTool, CancellationToken, LocalBuildTool, NixBuildTool,
    };
    pub use crate::config::{BuildConfig, LoggingConfig, PipeflowConfig, RegistryConfig};
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, ErrorKind, EvalError, PipelineError,
        PipelineValidationError, SerializationError,
    };
    pub use crate::evaluator::{Evaluator, NodeBody};
    pub use crate::introspect::{
        node_lineage, pipeline_deps, pipeline_dot_access, pipeline_node, pipeline_nodes,
        trace_nodes,
    };
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        evaluate_block, pipeline_run, Executor, Pipeline, PipelineBuilder, RunReport,
    };
    pub use crate::registry::{
        inspect_pipeline, load_node, read_node, BuildRegistry, FileRegistry, InMemoryRegistry,
    };
    pub use crate::testing::ExprEvaluator;
    pub use crate::value::{Environment, Table, Value, ValueKind};
}
