//! Read-only queries over pipelines.
//!
//! Every function takes the pipeline as a [`Value`] and fails with a
//! `TypeError` when handed anything else. Registry queries
//! (`read_node`, `load_node`, `inspect_pipeline`) live in
//! [`crate::registry`].

mod lineage;

pub use lineage::{lineage_of, Lineage, LineageEntry};

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use crate::errors::PipelineError;
use crate::pipeline::Pipeline;
use crate::value::Value;

const TRANSITIVE_MARKER: &str = " (transitive)";
const EXPANDED_MARKER: &str = " (see above)";

/// Returns the pipeline inside `value`.
///
/// # Errors
///
/// Returns a `TypeError` naming `function` if `value` is not a pipeline.
pub fn expect_pipeline<'a>(function: &str, value: &'a Value) -> Result<&'a Pipeline, PipelineError> {
    value
        .as_pipeline()
        .map(|p| &**p)
        .ok_or_else(|| PipelineError::expected_pipeline(function, value.kind()))
}

/// `pipeline_nodes(p)`: node names in declaration order.
///
/// # Errors
///
/// Returns a `TypeError` for non-pipeline values.
pub fn pipeline_nodes(p: &Value) -> Result<Value, PipelineError> {
    let pipeline = expect_pipeline("pipeline_nodes", p)?;
    Ok(Value::str_list(pipeline.node_names()))
}

/// `pipeline_deps(p)`: node name to the names it depends on.
///
/// # Errors
///
/// Returns a `TypeError` for non-pipeline values.
pub fn pipeline_deps(p: &Value) -> Result<Value, PipelineError> {
    let pipeline = expect_pipeline("pipeline_deps", p)?;
    let deps: BTreeMap<String, Value> = pipeline
        .dependency_map()
        .into_iter()
        .map(|(name, deps)| (name, Value::str_list(deps)))
        .collect();
    Ok(Value::Dict(deps))
}

/// `pipeline_node(p, name)`: the computed value of a node.
///
/// # Errors
///
/// Returns a `TypeError` for non-pipeline values and a `KeyError` for an
/// unknown node.
pub fn pipeline_node(p: &Value, name: &str) -> Result<Value, PipelineError> {
    expect_pipeline("pipeline_node", p)?.value(name).cloned()
}

/// `p.<name>`: sugar for [`pipeline_node`].
///
/// # Errors
///
/// Same as [`pipeline_node`].
pub fn pipeline_dot_access(p: &Value, name: &str) -> Result<Value, PipelineError> {
    pipeline_node(p, name)
}

/// Lineage of a node as data.
///
/// # Errors
///
/// Returns a `TypeError` for non-pipeline values and a `KeyError` for an
/// unknown node.
pub fn node_lineage(p: &Value, name: &str) -> Result<Lineage, PipelineError> {
    lineage_of(expect_pipeline("node_lineage", p)?, name)
}

/// Renders the text printed by [`trace_nodes`].
///
/// Without a name the whole dependency forest is drawn, rooted at the
/// nodes nothing depends on. With a name, that node's ancestors and
/// descendants are listed. When `transitive` is true, indirect relations
/// are included and marked `(transitive)`; otherwise only direct ones are
/// shown.
///
/// # Errors
///
/// Returns a `TypeError` for non-pipeline values and a `KeyError` for an
/// unknown node.
pub fn render_trace(p: &Value, name: Option<&str>, transitive: bool) -> Result<String, PipelineError> {
    let pipeline = expect_pipeline("trace_nodes", p)?;
    match name {
        Some(name) => Ok(render_lineage(&lineage_of(pipeline, name)?, transitive)),
        None => Ok(render_forest(pipeline, transitive)),
    }
}

/// `trace_nodes(p, name?, transitive?)`: prints the trace to stdout.
///
/// Returns the printed text.
///
/// # Errors
///
/// Same as [`render_trace`].
pub fn trace_nodes(p: &Value, name: Option<&str>, transitive: bool) -> Result<String, PipelineError> {
    let text = render_trace(p, name, transitive)?;
    print!("{text}");
    Ok(text)
}

fn render_forest(pipeline: &Pipeline, transitive: bool) -> String {
    let mut out = String::from("Pipeline dependency forest:\n");
    let mut expanded = HashSet::new();
    for root in pipeline.nodes().iter().filter(|n| pipeline.dependents(&n.name).is_empty()) {
        render_subtree(pipeline, &root.name, 0, transitive, &mut expanded, &mut out);
    }
    out
}

/// Each node's dependencies are listed once; later occurrences of a node
/// with dependencies are printed as a reference to the earlier subtree.
fn render_subtree<'a>(
    pipeline: &'a Pipeline,
    name: &'a str,
    depth: usize,
    transitive: bool,
    expanded: &mut HashSet<&'a str>,
    out: &mut String,
) {
    let marker = if depth >= 2 { TRANSITIVE_MARKER } else { "" };
    let indent = "  ".repeat(depth + 1);
    let deps = pipeline.node(name).map_or(&[][..], |n| n.dependencies.as_slice());
    let descend = !deps.is_empty() && (depth == 0 || transitive);

    if descend && !expanded.insert(name) {
        let _ = writeln!(out, "{indent}{name}{marker}{EXPANDED_MARKER}");
        return;
    }
    let _ = writeln!(out, "{indent}{name}{marker}");
    if descend {
        for dep in deps {
            render_subtree(pipeline, dep, depth + 1, transitive, expanded, out);
        }
    }
}

fn render_lineage(lineage: &Lineage, transitive: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Node: {}", lineage.node);
    render_section(&mut out, "Ancestors", &lineage.ancestors, transitive);
    render_section(&mut out, "Descendants", &lineage.descendants, transitive);
    out
}

fn render_section(out: &mut String, title: &str, entries: &[LineageEntry], transitive: bool) {
    let _ = writeln!(out, "{title}:");
    let shown: Vec<&LineageEntry> = entries
        .iter()
        .filter(|e| transitive || !e.is_transitive())
        .collect();
    if shown.is_empty() {
        out.push_str("  (none)\n");
    }
    for entry in shown {
        let marker = if entry.is_transitive() { TRANSITIVE_MARKER } else { "" };
        let _ = writeln!(out, "  {}{marker}", entry.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::pipeline::evaluate_block;
    use crate::testing::ExprEvaluator;
    use crate::value::Environment;
    use pretty_assertions::assert_eq;

    fn chain() -> Value {
        evaluate_block(
            [("a", "1"), ("b", "a + 1"), ("c", "b + 1"), ("d", "a * 3")],
            &ExprEvaluator::new(),
            &Environment::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_nodes_and_deps() {
        let p = chain();
        assert_eq!(pipeline_nodes(&p).unwrap(), Value::str_list(["a", "b", "c", "d"]));
        let deps = pipeline_deps(&p).unwrap();
        let Value::Dict(map) = deps else {
            panic!("expected dict")
        };
        assert_eq!(map["c"], Value::str_list(["b"]));
        assert_eq!(map["a"], Value::List(vec![]));
    }

    #[test]
    fn test_node_access() {
        let p = chain();
        assert_eq!(pipeline_node(&p, "c").unwrap(), Value::Int(3));
        assert_eq!(pipeline_dot_access(&p, "d").unwrap(), Value::Int(3));
        let err = pipeline_node(&p, "missing").unwrap_err();
        assert_eq!(err.to_string(), "node 'missing' not found in Pipeline");
    }

    #[test]
    fn test_non_pipeline_is_type_error() {
        for result in [
            pipeline_nodes(&Value::Int(1)).map(|_| ()),
            pipeline_deps(&Value::Null).map(|_| ()),
            pipeline_node(&Value::str("p"), "a").map(|_| ()),
            render_trace(&Value::List(vec![]), None, true).map(|_| ()),
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeError);
        }
    }

    #[test]
    fn test_lineage_depths() {
        let lineage = node_lineage(&chain(), "a").unwrap();
        assert!(lineage.ancestors.is_empty());
        assert_eq!(
            lineage.descendants,
            vec![
                LineageEntry { name: "b".into(), depth: 1 },
                LineageEntry { name: "d".into(), depth: 1 },
                LineageEntry { name: "c".into(), depth: 2 },
            ]
        );
    }

    #[test]
    fn test_forest_marks_transitive() {
        let text = render_trace(&chain(), None, true).unwrap();
        assert_eq!(
            text,
            "Pipeline dependency forest:\n\
             \x20 c\n\
             \x20   b\n\
             \x20     a (transitive)\n\
             \x20 d\n\
             \x20   a\n"
        );
    }

    #[test]
    fn test_forest_direct_only() {
        let text = render_trace(&chain(), None, false).unwrap();
        assert!(!text.contains("(transitive)"));
        assert!(!text.contains("      a"));
    }

    #[test]
    fn test_forest_lists_shared_subtree_once() {
        let p = evaluate_block(
            [
                ("top", "left + right"),
                ("left", "base"),
                ("right", "base"),
                ("base", "seed"),
                ("seed", "1"),
            ],
            &ExprEvaluator::new(),
            &Environment::new(),
        )
        .unwrap();
        assert_eq!(
            render_trace(&p, None, true).unwrap(),
            "Pipeline dependency forest:\n\
             \x20 top\n\
             \x20   left\n\
             \x20     base (transitive)\n\
             \x20       seed (transitive)\n\
             \x20   right\n\
             \x20     base (transitive) (see above)\n"
        );
    }

    #[test]
    fn test_forest_size_linear_in_diamonds() {
        let mut decls = vec![("l0".to_string(), "1".to_string())];
        for i in 1..=30 {
            decls.push((format!("a{i}"), format!("l{}", i - 1)));
            decls.push((format!("b{i}"), format!("l{}", i - 1)));
            decls.push((format!("l{i}"), format!("a{i} + b{i}")));
        }
        let p = evaluate_block(
            decls.iter().map(|(n, b)| (n.as_str(), b.as_str())),
            &ExprEvaluator::new(),
            &Environment::new(),
        )
        .unwrap();

        let text = render_trace(&p, None, true).unwrap();
        assert!(text.lines().count() <= 2 * decls.len());
        assert_eq!(text.matches("(see above)").count(), 29);
    }

    #[test]
    fn test_named_trace() {
        let text = render_trace(&chain(), Some("c"), true).unwrap();
        assert_eq!(
            text,
            "Node: c\nAncestors:\n  b\n  a (transitive)\nDescendants:\n  (none)\n"
        );

        let direct = trace_nodes(&chain(), Some("c"), false).unwrap();
        assert_eq!(direct, "Node: c\nAncestors:\n  b\nDescendants:\n  (none)\n");
    }
}
