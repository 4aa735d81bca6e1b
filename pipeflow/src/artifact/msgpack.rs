//! MessagePack codec for non-tabular values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::arrow_ipc::{table_from_ipc, table_to_ipc};
use crate::errors::SerializationError;
use crate::value::Value;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    value: StoredValue,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
enum StoredValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<StoredValue>),
    Dict(BTreeMap<String, StoredValue>),
    /// A table nested inside a list or dictionary, as Arrow IPC bytes.
    Table(Vec<u8>),
}

impl StoredValue {
    fn from_value(value: &Value, location: &str) -> Result<Self, SerializationError> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(x) => Self::Float(*x),
            Value::Str(s) => Self::Str(s.clone()),
            Value::List(items) => Self::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::from_value(item, &format!("{location}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(map) => Self::Dict(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_value(v, &format!("{location}.{k}"))?)))
                    .collect::<Result<_, SerializationError>>()?,
            ),
            Value::Table(table) => Self::Table(table_to_ipc(table)?),
            Value::Function(_) | Value::Pipeline(_) => {
                return Err(SerializationError::Unsupported {
                    kind: value.kind(),
                    location: (!location.is_empty()).then(|| location.to_string()),
                })
            }
        })
    }

    fn into_value(self) -> Result<Value, SerializationError> {
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(x) => Value::Float(x),
            Self::Str(s) => Value::Str(s),
            Self::List(items) => Value::List(
                items
                    .into_iter()
                    .map(Self::into_value)
                    .collect::<Result<_, _>>()?,
            ),
            Self::Dict(map) => Value::Dict(
                map.into_iter()
                    .map(|(k, v)| Ok((k, v.into_value()?)))
                    .collect::<Result<_, SerializationError>>()?,
            ),
            Self::Table(bytes) => Value::Table(table_from_ipc(&bytes)?),
        })
    }
}

/// Encodes a non-tabular value.
pub(crate) fn encode(value: &Value) -> Result<Vec<u8>, SerializationError> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        value: StoredValue::from_value(value, "")?,
    };
    rmp_serde::to_vec_named(&envelope)
        .map_err(|err| SerializationError::Encode(format!("MessagePack: {err}")))
}

/// Decodes a value written by [`encode`].
pub(crate) fn decode(bytes: &[u8]) -> Result<Value, SerializationError> {
    let envelope: Envelope = rmp_serde::from_slice(bytes)
        .map_err(|err| SerializationError::corrupt(format!("invalid MessagePack payload: {err}")))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(SerializationError::corrupt(format!(
            "unsupported artifact format version {}",
            envelope.format_version
        )));
    }
    envelope.value.into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FunctionValue, Table, ValueKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_nested_structure_round_trip() {
        let mut dict = BTreeMap::new();
        dict.insert("name".to_string(), Value::str("alpha"));
        dict.insert(
            "scores".to_string(),
            Value::List(vec![Value::Int(3), Value::Float(2.5), Value::Null]),
        );
        dict.insert("ok".to_string(), Value::Bool(true));
        let value = Value::Dict(dict);

        assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_nested_table_round_trip() {
        let table = Table::from_columns(vec![("x".into(), vec![Value::Int(1), Value::Int(2)])]).unwrap();
        let value = Value::List(vec![Value::Table(table), Value::Int(0)]);
        assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_nested_function_reports_location() {
        let func = Value::Function(FunctionValue {
            params: vec![],
            body: "1".into(),
            captured: BTreeMap::new(),
        });
        let mut dict = BTreeMap::new();
        dict.insert("f".to_string(), Value::List(vec![Value::Int(1), func]));

        match encode(&Value::Dict(dict)).unwrap_err() {
            SerializationError::Unsupported { kind, location } => {
                assert_eq!(kind, ValueKind::Function);
                assert_eq!(location.as_deref(), Some(".f[1]"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = decode(b"\x01\x02\x03").unwrap_err();
        assert!(matches!(err, SerializationError::Corrupt { .. }));
    }
}
