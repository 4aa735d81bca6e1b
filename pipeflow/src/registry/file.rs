//! File-backed registry: one JSON record per build.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{sort_newest_first, BuildRegistry, BuildRegistryEntry};
use crate::errors::PipelineError;

const RECORD_EXTENSION: &str = "json";

/// A registry stored as `<dir>/<build_id>.json` files.
///
/// Records are written to a hidden temporary file and renamed into place,
/// so concurrent readers see either the complete record or nothing.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    dir: PathBuf,
}

impl FileRegistry {
    /// Creates a registry rooted at `dir`. The directory is created on the
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the registry directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, build_id: &str) -> PathBuf {
        self.dir.join(format!("{build_id}.{RECORD_EXTENSION}"))
    }

    fn read_record(path: &Path) -> Option<BuildRegistryEntry> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable registry record");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed registry record");
                None
            }
        }
    }
}

impl BuildRegistry for FileRegistry {
    fn record(&self, entry: &BuildRegistryEntry) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;

        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| PipelineError::Value(format!("Cannot encode registry record: {e}")))?;
        let tmp = self.dir.join(format!(".{}.{RECORD_EXTENSION}.tmp", entry.build_id));
        let path = self.record_path(&entry.build_id);

        fs::write(&tmp, json).map_err(|e| PipelineError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            PipelineError::io(&path, e)
        })?;

        info!(
            build_id = %entry.build_id,
            record = %path.display(),
            nodes = entry.artifacts.len(),
            "Build registry entry published"
        );
        Ok(())
    }

    fn entries(&self) -> Result<Vec<BuildRegistryEntry>, PipelineError> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(&self.dir, e)),
        };

        let mut entries = Vec::new();
        for item in dir {
            let item = item.map_err(|e| PipelineError::io(&self.dir, e))?;
            let path = item.path();
            let is_record = path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
                && !path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if is_record {
                entries.extend(Self::read_record(&path));
            }
        }

        sort_newest_first(&mut entries);
        Ok(entries)
    }
}
