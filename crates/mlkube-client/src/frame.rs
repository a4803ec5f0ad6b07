//! The tabular wire format of inference requests and responses.
//!
//! Requests are sent in pandas `split` orientation:
//!
//! ```json
//! {"columns": ["a", "b"], "data": [[1, 2], [3, 4]]}
//! ```
//!
//! Model servers answer in a few shapes; all are folded back into a table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Column name used when a response carries bare predictions.
pub const PREDICTIONS_COLUMN: &str = "predictions";

/// A table of JSON values, column names plus row-major data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularBody {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows, each with one value per column.
    pub data: Vec<Vec<Value>>,
}

impl TabularBody {
    /// Build a table.
    #[must_use]
    pub fn new(columns: Vec<String>, data: Vec<Vec<Value>>) -> Self {
        Self { columns, data }
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.data.len()
    }

    /// Values of the column called `name`.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.data.iter().filter_map(|row| row.get(idx)).collect())
    }

    /// Fold a model server response into a table.
    ///
    /// Accepted shapes:
    /// - `{"columns": [...], "data": [[...]]}` (extra keys such as `index` are ignored)
    /// - `{"predictions": ...}`, unwrapped
    /// - a list of records, `[{"a": 1}, ...]`
    /// - a list of rows, `[[1, 2], ...]`, with columns named by position
    /// - a list of scalars, as a single `predictions` column
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] for anything else.
    pub fn from_response(value: Value) -> Result<Self> {
        match value {
            Value::Object(mut map) => {
                if map.contains_key("columns") && map.contains_key("data") {
                    return serde_json::from_value(Value::Object(map))
                        .map_err(|e| ClientError::Decode(e.to_string()));
                }
                match map.remove(PREDICTIONS_COLUMN) {
                    Some(inner) => Self::from_response(inner),
                    None => Err(ClientError::Decode(
                        "object response without columns/data or predictions".to_string(),
                    )),
                }
            }
            Value::Array(items) => Ok(Self::from_list(items)),
            other => Err(ClientError::Decode(format!(
                "unexpected response shape: {other}"
            ))),
        }
    }

    fn from_list(items: Vec<Value>) -> Self {
        match items.first() {
            Some(Value::Object(_)) => Self::from_records(items),
            Some(Value::Array(first)) => {
                let columns = (0..first.len()).map(|i| i.to_string()).collect();
                let data = items
                    .into_iter()
                    .map(|row| match row {
                        Value::Array(values) => values,
                        scalar => vec![scalar],
                    })
                    .collect();
                Self { columns, data }
            }
            _ => Self {
                columns: vec![PREDICTIONS_COLUMN.to_string()],
                data: items.into_iter().map(|v| vec![v]).collect(),
            },
        }
    }

    fn from_records(items: Vec<Value>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for item in &items {
            if let Value::Object(record) = item {
                for key in record.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }

        let data = items
            .into_iter()
            .map(|item| {
                let record = match item {
                    Value::Object(record) => record,
                    _ => Map::new(),
                };
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, data }
    }
}
