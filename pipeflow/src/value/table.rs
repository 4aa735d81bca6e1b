//! Columnar table values backed by Arrow record batches.

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::sync::Arc;

use super::Value;

/// A table value.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    batch: RecordBatch,
}

impl Table {
    /// Wraps an existing record batch.
    #[must_use]
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Builds a table from named columns of scalar values.
    ///
    /// Each column must hold a single scalar category (integers and floats
    /// may be mixed, producing a float column); `Null` entries become nulls.
    ///
    /// # Errors
    ///
    /// Returns an error if columns differ in length or hold non-scalar or
    /// mixed values.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Self, ArrowError> {
        let mut fields = Vec::with_capacity(columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());

        for (name, values) in columns {
            let array = column_array(&name, &values)?;
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }

        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema, arrays)?;
        Ok(Self { batch })
    }

    /// Returns the underlying record batch.
    #[must_use]
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// Returns the column names in schema order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Reads a column back as scalar values.
    #[must_use]
    pub fn column_values(&self, name: &str) -> Option<Vec<Value>> {
        let column = self.batch.column_by_name(name)?;
        let any = column.as_any();
        let len = column.len();

        let values = if let Some(arr) = any.downcast_ref::<Int64Array>() {
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Int(arr.value(i)) })
                .collect()
        } else if let Some(arr) = any.downcast_ref::<Float64Array>() {
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Float(arr.value(i)) })
                .collect()
        } else if let Some(arr) = any.downcast_ref::<StringArray>() {
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::str(arr.value(i)) })
                .collect()
        } else if let Some(arr) = any.downcast_ref::<BooleanArray>() {
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Bool(arr.value(i)) })
                .collect()
        } else {
            return None;
        };
        Some(values)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DataFrame({} rows x {} cols: [{}])",
            self.num_rows(),
            self.num_columns(),
            self.column_names().join(", ")
        )
    }
}

fn column_array(name: &str, values: &[Value]) -> Result<ArrayRef, ArrowError> {
    let mut data_type: Option<DataType> = None;
    for value in values {
        let this = match value {
            Value::Null => continue,
            Value::Int(_) => DataType::Int64,
            Value::Float(_) => DataType::Float64,
            Value::Str(_) => DataType::Utf8,
            Value::Bool(_) => DataType::Boolean,
            other => {
                return Err(ArrowError::InvalidArgumentError(format!(
                    "column '{name}' holds a non-scalar value of type {}",
                    other.kind()
                )))
            }
        };
        data_type = Some(match (data_type, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
                DataType::Float64
            }
            (Some(a), b) => {
                return Err(ArrowError::InvalidArgumentError(format!(
                    "column '{name}' mixes {a} and {b} values"
                )))
            }
        });
    }

    let array: ArrayRef = match data_type.unwrap_or(DataType::Int64) {
        DataType::Float64 => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Float(x) => Some(*x),
                    #[allow(clippy::cast_precision_loss)]
                    Value::Int(i) => Some(*i as f64),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Utf8 => Arc::new(StringArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Boolean => Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        _ => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns() {
        let table = Table::from_columns(vec![
            ("id".into(), vec![Value::Int(1), Value::Int(2)]),
            ("name".into(), vec![Value::str("a"), Value::Null]),
        ])
        .unwrap();

        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.column_names(), vec!["id", "name"]);
        assert_eq!(
            table.column_values("name").unwrap(),
            vec![Value::str("a"), Value::Null]
        );
    }

    #[test]
    fn test_int_and_float_widen() {
        let table = Table::from_columns(vec![(
            "x".into(),
            vec![Value::Int(1), Value::Float(2.5)],
        )])
        .unwrap();
        assert_eq!(
            table.column_values("x").unwrap(),
            vec![Value::Float(1.0), Value::Float(2.5)]
        );
    }

    #[test]
    fn test_mixed_column_rejected() {
        let result = Table::from_columns(vec![(
            "x".into(),
            vec![Value::Int(1), Value::str("a")],
        )]);
        assert!(result.is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = Table::from_columns(vec![
            ("a".into(), vec![Value::Int(1)]),
            ("b".into(), vec![Value::Int(1), Value::Int(2)]),
        ]);
        assert!(result.is_err());
    }
}
