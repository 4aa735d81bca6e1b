//! Support code for testing pipelines.
//!
//! This module provides:
//! - A reference expression evaluator ([`ExprEvaluator`])
//! - An evaluator wrapper recording evaluated bodies
//! - Filesystem fixtures for builds and registries

mod expr;
pub mod fixtures;
mod mocks;

pub use expr::ExprEvaluator;
pub use mocks::CountingEvaluator;
