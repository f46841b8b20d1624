//! Result rows
//!
//! [`Row`] is the interpreter-internal form: ordered `(column, Value)` pairs
//! with unique column names. [`ResultRow`] is what callers receive: parallel
//! arrays of names, types and raw values.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::{RawValue, Value};

/// Ordered row of named values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row. Column names must be unique and match the value count.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(Error::internal(format!(
                "row has {} columns but {} values",
                columns.len(),
                values.len()
            )));
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(Error::invalid_input(format!(
                    "duplicate column name in row: {}",
                    column
                )));
            }
        }

        Ok(Row { columns, values })
    }

    /// Single-column row
    pub fn single(column: impl Into<String>, value: Value) -> Self {
        Row {
            columns: vec![column.into()],
            values: vec![value],
        }
    }

    /// Column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a column by name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume into the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Caller-facing result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Column names
    pub column_names: Vec<String>,
    /// Column data types
    pub column_types: Vec<DataType>,
    /// Raw values
    pub values: Vec<RawValue>,
}

impl From<Row> for ResultRow {
    fn from(row: Row) -> Self {
        let mut column_types = Vec::with_capacity(row.values.len());
        let mut values = Vec::with_capacity(row.values.len());
        for value in row.values {
            column_types.push(value.data_type());
            values.push(value.into_raw());
        }

        ResultRow {
            column_names: row.columns,
            column_types,
            values,
        }
    }
}
