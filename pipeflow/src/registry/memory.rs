//! In-memory registry.

use parking_lot::RwLock;

use super::{sort_newest_first, BuildRegistry, BuildRegistryEntry};
use crate::errors::PipelineError;

/// A registry held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: RwLock<Vec<BuildRegistryEntry>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded builds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no build was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl BuildRegistry for InMemoryRegistry {
    fn record(&self, entry: &BuildRegistryEntry) -> Result<(), PipelineError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<BuildRegistryEntry>, PipelineError> {
        let mut entries = self.entries.read().clone();
        sort_newest_first(&mut entries);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;

    #[test]
    fn test_entries_newest_first() {
        let registry = InMemoryRegistry::new();
        assert!(registry.is_empty());

        let older = BuildRegistryEntry::new("/out/1", BTreeMap::new());
        let mut newer = BuildRegistryEntry::new("/out/2", BTreeMap::new());
        newer.created_at = older.created_at + Duration::seconds(1);
        registry.record(&older).unwrap();
        registry.record(&newer).unwrap();

        let ids: Vec<_> = registry.entries().unwrap().into_iter().map(|e| e.build_id).collect();
        assert_eq!(ids, vec![newer.build_id, older.build_id]);
        assert_eq!(registry.len(), 2);
    }
}
