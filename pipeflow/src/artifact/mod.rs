//! Artifact serialization.
//!
//! Values are persisted as single files whose format is chosen by the
//! value's category:
//!
//! - tables are written as an Arrow IPC stream, readable by any Arrow
//!   implementation;
//! - everything else (scalars, lists, dictionaries) is written as a
//!   versioned MessagePack envelope.
//!
//! Functions and pipelines have no artifact form and are rejected.
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never observes a half-written artifact.

mod arrow_ipc;
mod msgpack;

pub use arrow_ipc::{table_from_ipc, table_to_ipc};

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use tracing::debug;

use crate::errors::{PipelineError, SerializationError};
use crate::value::Value;

/// The on-disk encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactFormat {
    /// Arrow IPC stream (tables).
    ArrowIpc,
    /// MessagePack envelope (all other serializable values).
    MessagePack,
}

impl ArtifactFormat {
    /// Returns the format used for a value.
    #[must_use]
    pub fn for_value(value: &Value) -> Self {
        match value {
            Value::Table(_) => Self::ArrowIpc,
            _ => Self::MessagePack,
        }
    }

    /// Recognises the format of encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Corrupt`] for empty input.
    pub fn detect(bytes: &[u8]) -> Result<Self, SerializationError> {
        if bytes.is_empty() {
            return Err(SerializationError::corrupt("artifact is empty"));
        }
        if bytes.starts_with(&arrow_ipc::STREAM_MARKER) {
            Ok(Self::ArrowIpc)
        } else {
            Ok(Self::MessagePack)
        }
    }

    /// Returns a short name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ArrowIpc => "arrow-ipc",
            Self::MessagePack => "msgpack",
        }
    }
}

/// Encodes a value to artifact bytes.
///
/// # Errors
///
/// Returns [`SerializationError::Unsupported`] for functions and pipelines
/// (including ones nested inside lists or dictionaries).
pub fn to_bytes(value: &Value) -> Result<Vec<u8>, SerializationError> {
    match value {
        Value::Table(table) => table_to_ipc(table),
        Value::Function(_) | Value::Pipeline(_) => Err(SerializationError::Unsupported {
            kind: value.kind(),
            location: None,
        }),
        _ => msgpack::encode(value),
    }
}

/// Decodes artifact bytes.
///
/// # Errors
///
/// Returns [`SerializationError::Corrupt`] if the bytes are not a valid
/// artifact.
pub fn from_bytes(bytes: &[u8]) -> Result<Value, SerializationError> {
    match ArtifactFormat::detect(bytes)? {
        ArtifactFormat::ArrowIpc => table_from_ipc(bytes).map(Value::Table),
        ArtifactFormat::MessagePack => msgpack::decode(bytes),
    }
}

/// Serializes a value to `path`, creating parent directories.
///
/// # Errors
///
/// Returns a serialization error for unsupported values (nothing is
/// written) or an IO error if the file cannot be written.
pub fn serialize(value: &Value, path: &Path) -> Result<(), PipelineError> {
    let bytes = to_bytes(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, &bytes).map_err(|e| PipelineError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PipelineError::io(path, e))?;

    debug!(
        path = %path.display(),
        format = ArtifactFormat::for_value(value).as_str(),
        bytes = bytes.len(),
        "Artifact written"
    );
    Ok(())
}

/// Deserializes the artifact stored at `path`.
///
/// # Errors
///
/// Returns [`SerializationError::Missing`] if the file does not exist and
/// [`SerializationError::Corrupt`] if it cannot be decoded.
pub fn deserialize(path: &Path) -> Result<Value, PipelineError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            return Err(SerializationError::Missing {
                path: path.to_path_buf(),
            }
            .into())
        }
        Err(e) => return Err(PipelineError::io(path, e)),
    };
    from_bytes(&bytes).map_err(|err| err.at_path(path).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::value::{FunctionValue, Table};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_scalar_round_trips() {
        let dir = TempDir::new().unwrap();
        let values = [
            Value::Null,
            Value::Bool(false),
            Value::Int(-42),
            Value::Float(0.125),
            Value::str("héllo"),
            Value::List(vec![Value::Int(1), Value::str("two")]),
        ];
        for (i, value) in values.iter().enumerate() {
            let path = dir.path().join(format!("v{i}/artifact"));
            serialize(value, &path).unwrap();
            assert_eq!(&deserialize(&path).unwrap(), value);
        }
    }

    #[test]
    fn test_table_uses_arrow() {
        let dir = TempDir::new().unwrap();
        let table = Table::from_columns(vec![
            ("id".into(), vec![Value::Int(1), Value::Int(2)]),
            ("name".into(), vec![Value::str("a"), Value::Null]),
        ])
        .unwrap();
        let value = Value::Table(table);
        let path = dir.path().join("artifact");

        serialize(&value, &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(ArtifactFormat::detect(&bytes).unwrap(), ArtifactFormat::ArrowIpc);
        assert_eq!(deserialize(&path).unwrap(), value);
    }

    #[test]
    fn test_function_rejected_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifact");
        let func = Value::Function(FunctionValue {
            params: vec!["x".into()],
            body: "x".into(),
            captured: BTreeMap::new(),
        });

        let err = serialize(&func, &path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationError);
        assert!(err.to_string().contains("Function"));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_and_corrupt_artifacts() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = deserialize(&missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationError);
        assert!(err.to_string().starts_with("Artifact not found"));

        let corrupt = dir.path().join("bad");
        fs::write(&corrupt, b"\xc1\xc1").unwrap();
        let err = deserialize(&corrupt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationError);
        assert!(err.to_string().contains("bad"));
    }
}
