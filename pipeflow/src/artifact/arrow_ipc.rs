//! Arrow IPC stream codec for table values.

use std::io::Cursor;

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;

use crate::errors::SerializationError;
use crate::value::Table;

/// Leading bytes of an Arrow IPC stream (the continuation marker).
pub(crate) const STREAM_MARKER: [u8; 4] = [0xFF; 4];

/// Encodes a table as a single-batch Arrow IPC stream.
///
/// # Errors
///
/// Returns [`SerializationError::Encode`] if Arrow rejects the batch.
pub fn table_to_ipc(table: &Table) -> Result<Vec<u8>, SerializationError> {
    let batch = table.batch();
    let schema = batch.schema();
    let mut bytes = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut bytes, &schema)
            .map_err(|err| SerializationError::Encode(format!("Arrow IPC writer: {err}")))?;
        writer
            .write(batch)
            .map_err(|err| SerializationError::Encode(format!("Arrow IPC batch: {err}")))?;
        writer
            .finish()
            .map_err(|err| SerializationError::Encode(format!("Arrow IPC finish: {err}")))?;
    }
    Ok(bytes)
}

/// Decodes a table from an Arrow IPC stream.
///
/// A stream with a schema and no batches decodes to an empty table.
///
/// # Errors
///
/// Returns [`SerializationError::Corrupt`] if the stream is malformed or
/// holds more than one batch.
pub fn table_from_ipc(bytes: &[u8]) -> Result<Table, SerializationError> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|err| SerializationError::corrupt(format!("invalid Arrow IPC stream: {err}")))?;
    let schema = reader.schema();

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(
            batch.map_err(|err| SerializationError::corrupt(format!("invalid Arrow batch: {err}")))?,
        );
    }

    match batches.len() {
        0 => Ok(Table::new(RecordBatch::new_empty(schema))),
        1 => Ok(Table::new(batches.remove(0))),
        n => Err(SerializationError::corrupt(format!(
            "expected one record batch, found {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stream_starts_with_marker() {
        let table = Table::from_columns(vec![("x".into(), vec![Value::Int(1)])]).unwrap();
        let bytes = table_to_ipc(&table).unwrap();
        assert_eq!(bytes[..4], STREAM_MARKER);
        assert_eq!(table_from_ipc(&bytes).unwrap(), table);
    }

    #[test]
    fn test_truncated_stream_is_corrupt() {
        let table = Table::from_columns(vec![("x".into(), vec![Value::Int(1)])]).unwrap();
        let bytes = table_to_ipc(&table).unwrap();
        let err = table_from_ipc(&bytes[..6]).unwrap_err();
        assert!(matches!(err, SerializationError::Corrupt { .. }));
    }
}
