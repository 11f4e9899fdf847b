//! Row-level mutations recorded by the local database.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use syncbridge_common::{Error, Result};

/// Kind of a recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Insert the row, replacing any existing row with the same id.
    Put,
    /// Update only the columns present in the row data.
    Patch,
    /// Delete the row.
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Put => "PUT",
            OpKind::Patch => "PATCH",
            OpKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single row-level create/update/delete recorded locally.
///
/// Operations are immutable once read from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOp {
    /// Operation kind.
    pub kind: OpKind,
    /// Target table.
    pub table: String,
    /// Row identifier.
    pub id: String,
    /// Row data. Present for [`OpKind::Put`] and [`OpKind::Patch`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MutationOp {
    /// Insert-or-replace a row.
    pub fn put(table: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: OpKind::Put,
            table: table.into(),
            id: id.into(),
            data: Some(data),
        }
    }

    /// Partially update a row.
    pub fn patch(table: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: OpKind::Patch,
            table: table.into(),
            id: id.into(),
            data: Some(data),
        }
    }

    /// Delete a row.
    pub fn delete(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Delete,
            table: table.into(),
            id: id.into(),
            data: None,
        }
    }

    /// Row data merged with the row identifier under `"id"`.
    ///
    /// Delete operations carry only the identifier. Missing data on a put or
    /// patch is treated as an empty row.
    ///
    /// # Errors
    /// - Row data is present but is not a JSON object
    pub fn merged_data(&self) -> Result<Map<String, Value>> {
        let mut merged = match (self.kind, &self.data) {
            (OpKind::Delete, _) | (_, None) | (_, Some(Value::Null)) => Map::new(),
            (_, Some(Value::Object(fields))) => fields.clone(),
            (_, Some(other)) => {
                return Err(Error::InvalidInput(format!(
                    "Row data for {}/{} must be an object, got {}",
                    self.table,
                    self.id,
                    json_type_name(other)
                )));
            }
        };
        merged.insert("id".to_string(), Value::String(self.id.clone()));
        Ok(merged)
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.table, self.id)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
