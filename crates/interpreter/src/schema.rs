//! Persisted schema definitions
//!
//! Tables and actions are stored in the metadata schema as JSON documents.
//! These are their in-memory forms.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use nsql_core::{validate_ident, DataType, Error, Result};

use crate::action::ActionDef;
use crate::catalog::NamespaceKind;

/// One table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Column type
    pub data_type: DataType,
    /// Whether NULL is allowed
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Whether the column is (part of) the primary key
    #[serde(default)]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Nullable, non-key column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark as primary key (implies NOT NULL)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// Table definition as tracked by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Build a table definition
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Lower-case names and check them.
    pub fn normalize(&mut self) -> Result<()> {
        self.name = self.name.to_lowercase();
        validate_ident(&self.name)?;

        let mut seen = HashSet::new();
        for column in &mut self.columns {
            column.name = column.name.to_lowercase();
            validate_ident(&column.name)?;
            if !seen.insert(column.name.clone()) {
                return Err(Error::invalid_input(format!(
                    "duplicate column {} in table {}",
                    column.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Everything needed to deploy a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSchema {
    /// Namespace kind
    pub kind: NamespaceKind,
    /// Tables
    #[serde(default)]
    pub tables: Vec<TableDef>,
    /// Actions
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

impl NamespaceSchema {
    /// Empty user namespace
    pub fn user() -> Self {
        Self {
            kind: NamespaceKind::User,
            tables: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Add a table
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Add an action
    pub fn with_action(mut self, action: ActionDef) -> Self {
        self.actions.push(action);
        self
    }
}
