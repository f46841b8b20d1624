//! In-memory catalog of namespaces
//!
//! The catalog owns every [`Namespace`]: its tables, its executable table
//! and its lifecycle hooks. It is rebuilt from persisted metadata when the
//! interpreter is constructed and changes afterwards only through deploy and
//! undeploy. All names are lower-cased before they are used as keys.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nsql_core::{Error, Result};

use crate::executable::{Executable, ExecutableInfo};
use crate::precompile::CallContext;
use crate::schema::TableDef;

/// Kind of a namespace, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NamespaceKind {
    /// Deployed by users
    User,
    /// Created by the node itself; cannot be undeployed
    System,
    /// Backed by an extension instance
    Extension,
}

impl NamespaceKind {
    /// Persisted spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceKind::User => "USER",
            NamespaceKind::System => "SYSTEM",
            NamespaceKind::Extension => "EXTENSION",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamespaceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(NamespaceKind::User),
            "SYSTEM" => Ok(NamespaceKind::System),
            "EXTENSION" => Ok(NamespaceKind::Extension),
            _ => Err(Error::invalid_input(format!("unknown namespace type: {}", s))),
        }
    }
}

/// Lifecycle hook; runs at most once.
pub(crate) type Hook = Box<dyn FnOnce(&CallContext<'_>) -> Result<()> + Send + Sync>;

pub(crate) fn hook<F>(f: F) -> Hook
where
    F: FnOnce(&CallContext<'_>) -> Result<()> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Tables, executables and hooks of one namespace.
pub(crate) struct Namespace {
    kind: NamespaceKind,
    pub(crate) tables: BTreeMap<String, TableDef>,
    pub(crate) executables: HashMap<String, Arc<Executable>>,
    on_deploy: Option<Hook>,
    on_undeploy: Option<Hook>,
}

impl Namespace {
    /// Namespace with no-op hooks.
    pub(crate) fn new(
        kind: NamespaceKind,
        tables: BTreeMap<String, TableDef>,
        executables: HashMap<String, Arc<Executable>>,
    ) -> Self {
        Self {
            kind,
            tables,
            executables,
            on_deploy: None,
            on_undeploy: None,
        }
    }

    pub(crate) fn with_hooks(mut self, on_deploy: Hook, on_undeploy: Hook) -> Self {
        self.on_deploy = Some(on_deploy);
        self.on_undeploy = Some(on_undeploy);
        self
    }

    pub(crate) fn kind(&self) -> NamespaceKind {
        self.kind
    }

    pub(crate) fn take_on_deploy(&mut self) -> Option<Hook> {
        self.on_deploy.take()
    }

    pub(crate) fn take_on_undeploy(&mut self) -> Option<Hook> {
        self.on_undeploy.take()
    }

    /// Callable entries (everything but plain functions), sorted by name.
    pub(crate) fn callables(&self) -> Vec<ExecutableInfo> {
        let mut infos: Vec<ExecutableInfo> = self
            .executables
            .values()
            .filter(|e| e.kind != crate::executable::ExecutableKind::Function)
            .map(|e| ExecutableInfo {
                name: e.name.clone(),
                kind: e.kind,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("kind", &self.kind)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("executables", &self.executables.len())
            .finish()
    }
}

/// Every namespace, keyed by lower-cased name.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    namespaces: HashMap<String, Namespace>,
}

impl Catalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the replaced namespace.
    pub(crate) fn insert(&mut self, name: &str, namespace: Namespace) -> Option<Namespace> {
        self.namespaces.insert(name.to_lowercase(), namespace)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.namespaces.contains_key(&name.to_lowercase())
    }

    pub(crate) fn get(&self, name: &str) -> Result<&Namespace> {
        let name = name.to_lowercase();
        self.namespaces
            .get(&name)
            .ok_or(Error::NamespaceNotFound { namespace: name })
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut Namespace> {
        let name = name.to_lowercase();
        self.namespaces
            .get_mut(&name)
            .ok_or(Error::NamespaceNotFound { namespace: name })
    }

    pub(crate) fn remove(&mut self, name: &str) -> Result<Namespace> {
        let name = name.to_lowercase();
        self.namespaces
            .remove(&name)
            .ok_or(Error::NamespaceNotFound { namespace: name })
    }

    /// Resolve `name` within `namespace`.
    pub(crate) fn executable(&self, namespace: &str, name: &str) -> Result<Arc<Executable>> {
        let ns = self.get(namespace)?;
        let name = name.to_lowercase();
        ns.executables
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::UnknownAction {
                namespace: namespace.to_lowercase(),
                action: name,
            })
    }

    /// Names and kinds, sorted by name.
    pub(crate) fn list(&self) -> Vec<(String, NamespaceKind)> {
        let mut names: Vec<(String, NamespaceKind)> = self
            .namespaces
            .iter()
            .map(|(name, ns)| (name.clone(), ns.kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }
}
