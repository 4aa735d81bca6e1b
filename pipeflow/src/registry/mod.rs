//! The build registry.
//!
//! Every successful build appends one [`BuildRegistryEntry`] mapping node
//! names to artifact paths. Entries are never modified or removed, which
//! lets later processes read artifacts of any historical build without
//! re-running it.
//!
//! The registry is an explicit handle ([`BuildRegistry`]) passed to the
//! components that need it: [`FileRegistry`] persists one JSON record per
//! build, [`InMemoryRegistry`] backs tests.

mod file;
mod lookup;
mod memory;

pub use file::FileRegistry;
pub use lookup::{inspect_pipeline, load_node, read_node, resolve_artifact, select_entries};
pub use memory::InMemoryRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::PipelineError;

/// One successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRegistryEntry {
    /// Unique build identifier; lexical order is chronological order.
    pub build_id: String,
    /// When the build finished.
    pub created_at: DateTime<Utc>,
    /// The aggregate output produced by the build tool.
    pub root_output_path: PathBuf,
    /// Node name to artifact path.
    pub artifacts: BTreeMap<String, PathBuf>,
}

impl BuildRegistryEntry {
    /// Creates an entry with a fresh build id.
    #[must_use]
    pub fn new(root_output_path: impl Into<PathBuf>, artifacts: BTreeMap<String, PathBuf>) -> Self {
        let created_at = Utc::now();
        Self {
            build_id: build_id_at(created_at),
            created_at,
            root_output_path: root_output_path.into(),
            artifacts,
        }
    }

    /// Returns the artifact path recorded for a node.
    #[must_use]
    pub fn artifact(&self, node: &str) -> Option<&PathBuf> {
        self.artifacts.get(node)
    }
}

/// Generates a build identifier for the current instant.
#[must_use]
pub fn new_build_id() -> String {
    build_id_at(Utc::now())
}

fn build_id_at(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("build_{}_{}", at.format("%Y%m%dT%H%M%S%.6fZ"), &suffix[..8])
}

/// Storage for build registry entries.
pub trait BuildRegistry: Send + Sync + Debug {
    /// Publishes a new entry atomically.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if the entry cannot be persisted.
    fn record(&self, entry: &BuildRegistryEntry) -> Result<(), PipelineError>;

    /// Returns all entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if the registry cannot be read.
    fn entries(&self) -> Result<Vec<BuildRegistryEntry>, PipelineError>;
}

pub(crate) fn sort_newest_first(entries: &mut [BuildRegistryEntry]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.build_id.cmp(&a.build_id))
    });
}
