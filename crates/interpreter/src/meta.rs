//! Persisted catalog metadata
//!
//! The catalog is stored in tables of the configured metadata schema and
//! read through the same [`Database`] handle as everything else:
//!
//! | Table | Columns |
//! |-------|---------|
//! | `namespaces` | `name`, `type` |
//! | `tables` | `namespace`, `name`, `definition` (JSON [`TableDef`]) |
//! | `actions` | `namespace`, `name`, `definition` (JSON [`ActionDef`]) |
//! | `extensions` | `alias`, `base_extension`, `config` (JSON object) |
//! | `role_privileges` | `role`, `namespace` (NULL for global), `privilege` |
//! | `user_roles` | `user_id`, `role` |
//!
//! Rows that cannot be interpreted are reported as
//! [`Error::Initialization`]: they mean the persisted state is corrupt, not
//! that a request was bad.

use std::collections::BTreeMap;

use nsql_core::{Error, HostValue, Result, Value};

use crate::access::{AccessController, Privilege, DEFAULT_ROLE};
use crate::action::ActionDef;
use crate::catalog::NamespaceKind;
use crate::db::{Database, QueryResult};
use crate::schema::TableDef;

/// A persisted extension use.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredExtension {
    pub(crate) base_extension: String,
    pub(crate) alias: String,
    pub(crate) config: BTreeMap<String, Value>,
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> Error {
    Error::Initialization {
        reason: format!("malformed {} metadata: {}", what, detail),
    }
}

fn text_at(row: &[Value], index: usize, what: &str) -> Result<String> {
    row.get(index)
        .and_then(Value::as_text)
        .map(str::to_string)
        .ok_or_else(|| corrupt(what, format!("column {} is not text", index + 1)))
}

fn optional_text_at(row: &[Value], index: usize, what: &str) -> Result<Option<String>> {
    match row.get(index) {
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_text()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| corrupt(what, format!("column {} is not text", index + 1))),
        None => Err(corrupt(what, format!("missing column {}", index + 1))),
    }
}

/// Reader over the metadata schema.
pub(crate) struct Metadata<'a> {
    db: &'a dyn Database,
    schema: &'a str,
}

impl<'a> Metadata<'a> {
    pub(crate) fn new(db: &'a dyn Database, schema: &'a str) -> Self {
        Self { db, schema }
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.db.query(sql, params)
    }

    /// Whether the metadata schema exists. Exactly one row is expected.
    pub(crate) fn is_initialized(&self) -> Result<bool> {
        let result = self.query(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1);",
            &[Value::text(self.schema)],
        )?;

        match result.rows.as_slice() {
            [] => Err(Error::Initialization {
                reason: "could not determine if the database is initialized".to_string(),
            }),
            [row] => row
                .first()
                .and_then(Value::as_bool)
                .ok_or_else(|| corrupt("bootstrap", "expected a boolean")),
            rows => Err(Error::Initialization {
                reason: format!(
                    "unexpected number of rows returned by the bootstrap check: {}",
                    rows.len()
                ),
            }),
        }
    }

    /// Statements creating the metadata schema and its initial contents.
    pub(crate) fn init_statements(&self, system_namespaces: &[&str]) -> Vec<(String, Vec<Value>)> {
        let s = self.schema;
        let mut statements: Vec<(String, Vec<Value>)> = vec![
            (format!("CREATE SCHEMA {};", s), vec![]),
            (
                format!(
                    "CREATE TABLE {s}.namespaces (name TEXT PRIMARY KEY, type TEXT NOT NULL);"
                ),
                vec![],
            ),
            (
                format!(
                    "CREATE TABLE {s}.tables (namespace TEXT NOT NULL REFERENCES {s}.namespaces(name) ON DELETE CASCADE, name TEXT NOT NULL, definition TEXT NOT NULL, PRIMARY KEY (namespace, name));"
                ),
                vec![],
            ),
            (
                format!(
                    "CREATE TABLE {s}.actions (namespace TEXT NOT NULL REFERENCES {s}.namespaces(name) ON DELETE CASCADE, name TEXT NOT NULL, definition TEXT NOT NULL, PRIMARY KEY (namespace, name));"
                ),
                vec![],
            ),
            (
                format!(
                    "CREATE TABLE {s}.extensions (alias TEXT PRIMARY KEY, base_extension TEXT NOT NULL, config TEXT NOT NULL);"
                ),
                vec![],
            ),
            (
                format!(
                    "CREATE TABLE {s}.role_privileges (role TEXT NOT NULL, namespace TEXT, privilege TEXT NOT NULL);"
                ),
                vec![],
            ),
            (
                format!(
                    "CREATE TABLE {s}.user_roles (user_id TEXT NOT NULL, role TEXT NOT NULL, PRIMARY KEY (user_id, role));"
                ),
                vec![],
            ),
        ];

        for ns in system_namespaces {
            statements.push((
                format!("INSERT INTO {s}.namespaces (name, type) VALUES ($1, $2);"),
                vec![Value::text(*ns), Value::text(NamespaceKind::System.as_str())],
            ));
        }
        for privilege in [Privilege::Select, Privilege::Call] {
            statements.push((
                format!(
                    "INSERT INTO {s}.role_privileges (role, namespace, privilege) VALUES ($1, NULL, $2);"
                ),
                vec![Value::text(DEFAULT_ROLE), Value::text(privilege.name())],
            ));
        }
        statements
    }

    /// Create the metadata schema.
    pub(crate) fn initialize(&self, system_namespaces: &[&str]) -> Result<()> {
        for (sql, params) in self.init_statements(system_namespaces) {
            self.query(&sql, &params)?;
        }
        Ok(())
    }

    pub(crate) fn namespaces(&self) -> Result<Vec<(String, NamespaceKind)>> {
        let result = self.query(
            &format!("SELECT name, type FROM {}.namespaces ORDER BY name;", self.schema),
            &[],
        )?;
        result
            .rows
            .iter()
            .map(|row| {
                let name = text_at(row, 0, "namespace")?.to_lowercase();
                let kind = text_at(row, 1, "namespace")?
                    .parse::<NamespaceKind>()
                    .map_err(|e| corrupt("namespace", e))?;
                Ok((name, kind))
            })
            .collect()
    }

    pub(crate) fn tables(&self, namespace: &str) -> Result<Vec<TableDef>> {
        let result = self.query(
            &format!(
                "SELECT definition FROM {}.tables WHERE namespace = $1 ORDER BY name;",
                self.schema
            ),
            &[Value::text(namespace)],
        )?;
        result
            .rows
            .iter()
            .map(|row| {
                let json = text_at(row, 0, "table")?;
                let mut table: TableDef =
                    serde_json::from_str(&json).map_err(|e| corrupt("table", e))?;
                table.normalize().map_err(|e| corrupt("table", e))?;
                Ok(table)
            })
            .collect()
    }

    pub(crate) fn actions(&self, namespace: &str) -> Result<Vec<ActionDef>> {
        let result = self.query(
            &format!(
                "SELECT definition FROM {}.actions WHERE namespace = $1 ORDER BY name;",
                self.schema
            ),
            &[Value::text(namespace)],
        )?;
        result
            .rows
            .iter()
            .map(|row| {
                let json = text_at(row, 0, "action")?;
                let mut action: ActionDef =
                    serde_json::from_str(&json).map_err(|e| corrupt("action", e))?;
                action.normalize(namespace).map_err(|e| corrupt("action", e))?;
                Ok(action)
            })
            .collect()
    }

    pub(crate) fn extensions(&self) -> Result<Vec<StoredExtension>> {
        let result = self.query(
            &format!(
                "SELECT base_extension, alias, config FROM {}.extensions ORDER BY alias;",
                self.schema
            ),
            &[],
        )?;
        result
            .rows
            .iter()
            .map(|row| {
                let base_extension = text_at(row, 0, "extension")?.to_lowercase();
                let alias = text_at(row, 1, "extension")?.to_lowercase();
                let json = text_at(row, 2, "extension")?;
                let config = parse_config(&json).map_err(|e| corrupt("extension", e))?;
                Ok(StoredExtension {
                    base_extension,
                    alias,
                    config,
                })
            })
            .collect()
    }

    /// Build the access controller from persisted grants and memberships.
    pub(crate) fn access_controller(&self) -> Result<AccessController> {
        let mut access = AccessController::new();

        let grants = self.query(
            &format!(
                "SELECT role, namespace, privilege FROM {}.role_privileges ORDER BY role, namespace, privilege;",
                self.schema
            ),
            &[],
        )?;
        for row in &grants.rows {
            let role = text_at(row, 0, "role privilege")?;
            let namespace = optional_text_at(row, 1, "role privilege")?;
            let privilege = text_at(row, 2, "role privilege")?
                .parse::<Privilege>()
                .map_err(|e| corrupt("role privilege", e))?;
            access.grant(&role, namespace.as_deref(), privilege);
        }

        let memberships = self.query(
            &format!(
                "SELECT user_id, role FROM {}.user_roles ORDER BY user_id, role;",
                self.schema
            ),
            &[],
        )?;
        for row in &memberships.rows {
            let user = text_at(row, 0, "user role")?;
            let role = text_at(row, 1, "user role")?;
            access.assign_role(&user, &role);
        }

        Ok(access)
    }
}

/// Parse an extension config document: a JSON object of host values.
pub(crate) fn parse_config(json: &str) -> Result<BTreeMap<String, Value>> {
    let parsed: BTreeMap<String, HostValue> =
        serde_json::from_str(json).map_err(|e| Error::invalid_input(e.to_string()))?;
    parsed
        .into_iter()
        .map(|(k, v)| Ok((k, Value::from_host(&v)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_documents() {
        let config = parse_config(r#"{"limit": 5, "name": "x", "key": {"$bytes": "AQ=="}}"#).unwrap();
        assert_eq!(config["limit"], Value::int8(5));
        assert_eq!(config["name"], Value::text("x"));
        assert_eq!(config["key"], Value::bytea(vec![1]));

        assert!(parse_config("[1]").is_err());
        assert!(parse_config(r#"{"f": 1.5}"#).is_err());
    }

    #[test]
    fn text_helpers_report_corruption() {
        let row = vec![Value::int8(1), Value::null(nsql_core::DataType::TEXT)];
        assert!(matches!(text_at(&row, 0, "x"), Err(Error::Initialization { .. })));
        assert_eq!(optional_text_at(&row, 1, "x").unwrap(), None);
        assert!(optional_text_at(&row, 2, "x").is_err());
    }
}
