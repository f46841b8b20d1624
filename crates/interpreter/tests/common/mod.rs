//! Shared test utilities for the interpreter integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]
#![allow(unused_imports)]

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub use nsql_interpreter::{
    AccessMode, ActionDef, CallResult, Database, DataType, Engine, EngineContext, Error,
    ExtensionRegistry, HostValue, InterpreterConfig, NamespaceKind, QueryResult, Result, ResultRow,
    TableDef, ThreadSafeInterpreter, Value,
};
pub use serde_json::json;

// ============================================================================
// Persisted catalog
// ============================================================================

/// Rows of the metadata schema, shared by every view of a [`FakeDb`].
#[derive(Debug, Default)]
pub struct Catalog {
    pub initialized: bool,
    pub namespaces: Vec<(String, String)>,
    pub tables: Vec<(String, String, String)>,
    pub actions: Vec<(String, String, String)>,
    pub extensions: Vec<(String, String, String)>,
    pub role_privileges: Vec<(String, Option<String>, String)>,
    pub user_roles: Vec<(String, String)>,
    /// Replaces the bootstrap check result when set
    pub bootstrap_rows: Option<Vec<Vec<Value>>>,
}

#[derive(Default)]
struct Shared {
    catalog: Mutex<Catalog>,
    queries: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, QueryResult)>>,
}

// ============================================================================
// FakeDb
// ============================================================================

/// In-memory stand-in for a node database handle.
///
/// It answers the metadata queries issued during construction, evaluates a
/// few scalar built-ins (`upper`, `lower`, `length`, `abs`) and returns
/// canned results for any other statement containing a registered fragment.
/// Every query is recorded. Views created with [`FakeDb::read_only`] share
/// state with the original.
#[derive(Clone)]
pub struct FakeDb {
    mode: Option<AccessMode>,
    shared: Arc<Shared>,
}

const SCHEMA: &str = "nsql_engine";

fn text(row: &[Value], i: usize) -> String {
    row[i].as_text().unwrap_or_default().to_string()
}

impl FakeDb {
    /// Read-write handle over an empty database.
    pub fn new() -> Self {
        Self {
            mode: Some(AccessMode::ReadWrite),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Read-only view of the same database.
    pub fn read_only(&self) -> Self {
        Self {
            mode: Some(AccessMode::ReadOnly),
            shared: Arc::clone(&self.shared),
        }
    }

    /// View that does not report an access mode.
    pub fn without_access_mode(&self) -> Self {
        Self {
            mode: None,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn catalog(&self) -> parking_lot::MutexGuard<'_, Catalog> {
        self.shared.catalog.lock()
    }

    /// Every query seen so far.
    pub fn queries(&self) -> Vec<String> {
        self.shared.queries.lock().clone()
    }

    pub fn clear_queries(&self) {
        self.shared.queries.lock().clear();
    }

    /// Answer statements containing `fragment` with `result`.
    pub fn respond(&self, fragment: &str, result: QueryResult) {
        self.shared
            .responses
            .lock()
            .push((fragment.to_string(), result));
    }

    // ------------------------------------------------------------------
    // Seeding persisted state
    // ------------------------------------------------------------------

    /// Mark the metadata schema as created, with the standard system
    /// namespaces and default grants.
    pub fn bootstrapped() -> Self {
        let db = Self::new();
        {
            let mut catalog = db.catalog();
            catalog.initialized = true;
            catalog.namespaces.push(("main".into(), "SYSTEM".into()));
            catalog.namespaces.push(("info".into(), "SYSTEM".into()));
            catalog
                .role_privileges
                .push(("default".into(), None, "select".into()));
            catalog
                .role_privileges
                .push(("default".into(), None, "call".into()));
        }
        db
    }

    pub fn add_namespace(&self, name: &str, kind: &str) {
        self.catalog().namespaces.push((name.into(), kind.into()));
    }

    pub fn add_action(&self, namespace: &str, action: &ActionDef) {
        let json = serde_json::to_string(action).unwrap();
        self.catalog()
            .actions
            .push((namespace.into(), action.name.clone(), json));
    }

    pub fn add_table(&self, namespace: &str, table: &TableDef) {
        let json = serde_json::to_string(table).unwrap();
        self.catalog()
            .tables
            .push((namespace.into(), table.name.clone(), json));
    }

    pub fn add_extension(&self, base: &str, alias: &str, config: serde_json::Value) {
        self.catalog()
            .extensions
            .push((base.into(), alias.into(), config.to_string()));
    }

    pub fn assign_role(&self, user: &str, role: &str) {
        self.catalog().user_roles.push((user.into(), role.into()));
    }

    // ------------------------------------------------------------------
    // Query handling
    // ------------------------------------------------------------------

    fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn metadata(&self, sql: &str, params: &[Value]) -> Option<QueryResult> {
        let mut catalog = self.catalog();

        if sql.contains("information_schema.schemata") {
            let rows = catalog
                .bootstrap_rows
                .clone()
                .unwrap_or_else(|| vec![vec![Value::boolean(catalog.initialized)]]);
            return Some(Self::rows(&["exists"], rows));
        }
        if sql.starts_with("CREATE SCHEMA") {
            catalog.initialized = true;
            return Some(QueryResult::empty());
        }
        if sql.starts_with(&format!("CREATE TABLE {}.", SCHEMA)) {
            return Some(QueryResult::empty());
        }
        if sql.starts_with(&format!("INSERT INTO {}.namespaces", SCHEMA)) {
            catalog
                .namespaces
                .push((text(params, 0), text(params, 1)));
            return Some(QueryResult::empty());
        }
        if sql.starts_with(&format!("INSERT INTO {}.role_privileges", SCHEMA)) {
            catalog
                .role_privileges
                .push((text(params, 0), None, text(params, 1)));
            return Some(QueryResult::empty());
        }
        if sql.starts_with(&format!("SELECT name, type FROM {}.namespaces", SCHEMA)) {
            let mut rows: Vec<_> = catalog.namespaces.clone();
            rows.sort();
            return Some(Self::rows(
                &["name", "type"],
                rows.into_iter()
                    .map(|(n, t)| vec![Value::text(n), Value::text(t)])
                    .collect(),
            ));
        }
        if sql.starts_with(&format!("SELECT definition FROM {}.tables", SCHEMA)) {
            let ns = text(params, 0);
            let rows = catalog
                .tables
                .iter()
                .filter(|(n, _, _)| *n == ns)
                .map(|(_, _, json)| vec![Value::text(json.clone())])
                .collect();
            return Some(Self::rows(&["definition"], rows));
        }
        if sql.starts_with(&format!("SELECT definition FROM {}.actions", SCHEMA)) {
            let ns = text(params, 0);
            let rows = catalog
                .actions
                .iter()
                .filter(|(n, _, _)| *n == ns)
                .map(|(_, _, json)| vec![Value::text(json.clone())])
                .collect();
            return Some(Self::rows(&["definition"], rows));
        }
        if sql.starts_with(&format!("SELECT base_extension, alias, config FROM {}.extensions", SCHEMA)) {
            let rows = catalog
                .extensions
                .iter()
                .map(|(b, a, c)| vec![Value::text(b.clone()), Value::text(a.clone()), Value::text(c.clone())])
                .collect();
            return Some(Self::rows(&["base_extension", "alias", "config"], rows));
        }
        if sql.starts_with(&format!("SELECT role, namespace, privilege FROM {}.role_privileges", SCHEMA)) {
            let rows = catalog
                .role_privileges
                .iter()
                .map(|(r, ns, p)| {
                    vec![
                        Value::text(r.clone()),
                        ns.clone()
                            .map(Value::text)
                            .unwrap_or_else(|| Value::null(DataType::TEXT)),
                        Value::text(p.clone()),
                    ]
                })
                .collect();
            return Some(Self::rows(&["role", "namespace", "privilege"], rows));
        }
        if sql.starts_with(&format!("SELECT user_id, role FROM {}.user_roles", SCHEMA)) {
            let rows = catalog
                .user_roles
                .iter()
                .map(|(u, r)| vec![Value::text(u.clone()), Value::text(r.clone())])
                .collect();
            return Some(Self::rows(&["user_id", "role"], rows));
        }
        None
    }

    fn builtin(sql: &str, params: &[Value]) -> Option<QueryResult> {
        let expr = sql.strip_prefix("SELECT ")?.strip_suffix(';')?;
        let (name, _) = expr.split_once('(')?;
        let value = match (name, params) {
            ("upper", [v]) => Value::text(v.as_text()?.to_uppercase()),
            ("lower", [v]) => Value::text(v.as_text()?.to_lowercase()),
            ("length", [v]) => Value::int8(v.as_text()?.chars().count() as i64),
            ("abs", [v]) => Value::int8(v.as_int8()?.abs()),
            _ => return None,
        };
        Some(Self::rows(&[name], vec![vec![value]]))
    }
}

impl Default for FakeDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for FakeDb {
    fn access_mode(&self) -> Option<AccessMode> {
        self.mode
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.shared.queries.lock().push(sql.to_string());

        if let Some(result) = self.metadata(sql, params) {
            return Ok(result);
        }
        if let Some(result) = Self::builtin(sql, params) {
            return Ok(result);
        }
        let responses = self.shared.responses.lock();
        if let Some((_, result)) = responses.iter().find(|(fragment, _)| sql.contains(fragment.as_str())) {
            return Ok(result.clone());
        }
        Ok(QueryResult::empty())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Interpreter over `db` using an isolated extension registry.
pub fn build(db: &FakeDb) -> ThreadSafeInterpreter {
    build_with(db, Arc::new(ExtensionRegistry::new()))
}

pub fn build_with(db: &FakeDb, registry: Arc<ExtensionRegistry>) -> ThreadSafeInterpreter {
    ThreadSafeInterpreter::builder()
        .registry(registry)
        .build(db)
        .expect("interpreter should build")
}

pub fn ctx(caller: &str) -> EngineContext {
    EngineContext::new(caller)
}

pub fn params(pairs: &[(&str, HostValue)]) -> HashMap<String, HostValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Run `execute` and collect the rows.
pub fn execute(
    engine: &dyn Engine,
    ctx: &EngineContext,
    db: &FakeDb,
    statement: &str,
    params: &HashMap<String, HostValue>,
) -> Result<Vec<ResultRow>> {
    let mut rows = Vec::new();
    engine.execute(ctx, db, statement, params, &mut |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

/// Run `call` and collect the rows.
pub fn call(
    engine: &dyn Engine,
    ctx: &EngineContext,
    db: &FakeDb,
    namespace: &str,
    action: &str,
    args: &[HostValue],
) -> Result<(Vec<ResultRow>, CallResult)> {
    let mut rows = Vec::new();
    let result = engine.call(ctx, db, namespace, action, args, &mut |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok((rows, result))
}

/// Values of a result row as host values.
pub fn host_values(row: &ResultRow) -> Vec<HostValue> {
    row.column_types
        .iter()
        .zip(&row.values)
        .map(|(ty, raw)| {
            Value::from_parts(*ty, raw.clone())
                .map(|v| v.to_host())
                .unwrap_or(HostValue::Null)
        })
        .collect()
}
