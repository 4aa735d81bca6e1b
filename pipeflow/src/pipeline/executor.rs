//! Sequential pipeline executor.
//!
//! Nodes are evaluated one at a time in topological order. The first
//! failing node aborts the whole run: nothing after it is evaluated and no
//! partially built pipeline is returned.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::builder::{PipelineBuilder, PipelineSkeleton};
use super::dag::{detect_cycle, topological_order};
use super::fingerprint::{value_digest, FingerprintBuilder};
use super::node::{NodeResult, PipelineNode};
use super::Pipeline;
use crate::errors::{EvalError, PipelineError};
use crate::evaluator::{Evaluator, NodeBody};
use crate::value::{Environment, Value};

/// Hooks invoked around node evaluation.
pub trait ExecutionObserver: Send + Sync {
    /// Called before a node's body is evaluated.
    fn on_node_start(&self, _name: &str) {}

    /// Called after a node's body was evaluated.
    fn on_node_finish(&self, _name: &str, _result: &Result<Value, EvalError>) {}

    /// Called when a node's previous value is reused instead of evaluated.
    fn on_node_reused(&self, _name: &str) {}
}

/// An observer that logs node events using the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_node_start(&self, name: &str) {
        debug!(node = %name, "Evaluating node");
    }

    fn on_node_finish(&self, name: &str, result: &Result<Value, EvalError>) {
        match result {
            Ok(value) => debug!(node = %name, kind = %value.kind(), "Node evaluated"),
            Err(err) => debug!(node = %name, error = %err, "Node failed"),
        }
    }

    fn on_node_reused(&self, name: &str) {
        debug!(node = %name, "Node unchanged, reusing previous value");
    }
}

static TRACING_OBSERVER: TracingObserver = TracingObserver;

/// Which nodes a run evaluated and which it reused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Nodes whose bodies were evaluated, in evaluation order.
    pub evaluated: Vec<String>,
    /// Nodes whose previous values were reused.
    pub reused: Vec<String>,
}

/// Evaluates pipeline graphs against an enclosing environment.
pub struct Executor<'a> {
    evaluator: &'a dyn Evaluator,
    enclosing: &'a Environment,
    observer: &'a dyn ExecutionObserver,
}

impl std::fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("evaluator", &self.evaluator)
            .field("enclosing_bindings", &self.enclosing.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Executor<'a> {
    /// Creates an executor. Names not defined by the pipeline resolve in
    /// `enclosing`.
    #[must_use]
    pub fn new(evaluator: &'a dyn Evaluator, enclosing: &'a Environment) -> Self {
        Self {
            evaluator,
            enclosing,
            observer: &TRACING_OBSERVER,
        }
    }

    /// Replaces the execution observer.
    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn ExecutionObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Evaluates every node of a freshly built graph.
    ///
    /// # Errors
    ///
    /// Returns a cycle error before evaluating anything if the graph is
    /// cyclic, or the wrapped error of the first node that fails.
    pub fn run(&self, skeleton: PipelineSkeleton) -> Result<Pipeline, PipelineError> {
        self.execute(skeleton, None).map(|(pipeline, _)| pipeline)
    }

    /// Re-runs an existing pipeline, producing a new one.
    ///
    /// Nodes whose fingerprint matches the one recorded in `previous` keep
    /// their previous value; all others are evaluated again.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::run`].
    pub fn rerun(&self, previous: &Pipeline) -> Result<(Pipeline, RunReport), PipelineError> {
        let nodes = previous
            .nodes()
            .iter()
            .map(|n| PipelineNode::new(n.name.clone(), n.body.clone(), n.dependencies.clone()))
            .collect();
        self.execute(PipelineSkeleton::from_nodes(nodes), Some(previous))
    }

    fn execute(
        &self,
        skeleton: PipelineSkeleton,
        previous: Option<&Pipeline>,
    ) -> Result<(Pipeline, RunReport), PipelineError> {
        let start = Instant::now();
        detect_cycle(&skeleton)?;
        let order = topological_order(&skeleton);

        let positions: HashMap<String, usize> = skeleton
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        let external: BTreeSet<String> = self
            .enclosing
            .names()
            .into_iter()
            .filter(|name| !positions.contains_key(name))
            .collect();

        let mut nodes = skeleton.into_nodes();
        let mut values: Vec<Option<Value>> = vec![None; nodes.len()];
        let mut fingerprints: Vec<Option<String>> = vec![None; nodes.len()];
        let mut report = RunReport::default();

        for &i in &order {
            let external_refs: Vec<String> = self
                .evaluator
                .free_references(&nodes[i].body, &external)
                .into_iter()
                .collect();
            let node = &nodes[i];
            let fingerprint = self.fingerprint(node, &positions, &fingerprints, &external_refs);

            let reused = previous.and_then(|prev| {
                let fp = fingerprint.as_ref()?;
                let old = prev.node(&node.name)?;
                if old.fingerprint.as_ref() == Some(fp) {
                    old.result.value().cloned()
                } else {
                    None
                }
            });

            let value = if let Some(value) = reused {
                self.observer.on_node_reused(&node.name);
                report.reused.push(node.name.clone());
                value
            } else {
                let mut env = self.enclosing.clone();
                for dep in &node.dependencies {
                    if let Some(value) = positions.get(dep).and_then(|&d| values[d].as_ref()) {
                        env.bind(dep.clone(), value.clone());
                    }
                }

                self.observer.on_node_start(&node.name);
                let result = self.evaluator.evaluate(&node.body, &env);
                self.observer.on_node_finish(&node.name, &result);
                report.evaluated.push(node.name.clone());

                result.map_err(|source| PipelineError::NodeFailed {
                    node: node.name.clone(),
                    source,
                })?
            };

            values[i] = Some(value);
            fingerprints[i] = fingerprint;
            nodes[i].external_refs = external_refs;
        }

        for (i, node) in nodes.iter_mut().enumerate() {
            node.result = values[i]
                .take()
                .map_or(NodeResult::Unresolved, NodeResult::Value);
            node.fingerprint = fingerprints[i].take();
        }

        info!(
            nodes = nodes.len(),
            evaluated = report.evaluated.len(),
            reused = report.reused.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Pipeline built"
        );

        Ok((Pipeline::from_nodes(nodes), report))
    }

    fn fingerprint(
        &self,
        node: &PipelineNode,
        positions: &HashMap<String, usize>,
        fingerprints: &[Option<String>],
        external_refs: &[String],
    ) -> Option<String> {
        let mut builder = FingerprintBuilder::new(&node.body);
        for dep in &node.dependencies {
            let fp = fingerprints[*positions.get(dep)?].as_ref()?;
            builder.dependency(dep, fp);
        }
        for name in external_refs {
            let digest = value_digest(self.enclosing.get(name)?)?;
            builder.external(name, &digest);
        }
        Some(builder.finish())
    }
}

/// Evaluates a pipeline block: builds the graph and runs it.
///
/// # Errors
///
/// Returns structural errors (duplicates, cycles) before any evaluation,
/// or the wrapped error of the first failing node.
pub fn evaluate_block<I, N, B>(
    declarations: I,
    evaluator: &dyn Evaluator,
    enclosing: &Environment,
) -> Result<Value, PipelineError>
where
    I: IntoIterator<Item = (N, B)>,
    N: Into<String>,
    B: Into<NodeBody>,
{
    let mut builder = PipelineBuilder::new();
    for (name, body) in declarations {
        builder.add_node(name, body);
    }
    let skeleton = builder.build(evaluator)?;
    let pipeline = Executor::new(evaluator, enclosing).run(skeleton)?;
    Ok(Value::Pipeline(Arc::new(pipeline)))
}

/// Re-runs a pipeline value with a fresh environment.
///
/// # Errors
///
/// Returns a `TypeError` if `value` is not a pipeline, otherwise the same
/// errors as [`Executor::rerun`].
pub fn pipeline_run(
    value: &Value,
    evaluator: &dyn Evaluator,
    enclosing: &Environment,
) -> Result<Value, PipelineError> {
    let previous = value
        .as_pipeline()
        .ok_or_else(|| PipelineError::expected_pipeline("pipeline_run", value.kind()))?;
    let (pipeline, _) = Executor::new(evaluator, enclosing).rerun(previous)?;
    Ok(Value::Pipeline(Arc::new(pipeline)))
}
