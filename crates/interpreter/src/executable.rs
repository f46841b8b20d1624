//! Callable units bound in a namespace

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use nsql_core::{Result, Row, Value};

use crate::exec_ctx::ExecutionContext;

/// Which kind of callable an executable is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutableKind {
    /// Built-in (or overriding) scalar function; not callable as an action
    Function,
    /// Persisted user action
    Action,
    /// Method provided by an extension
    Precompile,
}

impl fmt::Display for ExecutableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutableKind::Function => "function",
            ExecutableKind::Action => "action",
            ExecutableKind::Precompile => "precompile",
        })
    }
}

/// Row sink handed to executables.
pub(crate) type RowSink<'s> = dyn FnMut(Row) -> Result<()> + 's;

/// Invocation contract shared by every executable kind.
pub(crate) type ExecFn =
    Arc<dyn Fn(&mut ExecutionContext<'_>, &[Value], &mut RowSink<'_>) -> Result<()> + Send + Sync>;

/// A named callable.
#[derive(Clone)]
pub(crate) struct Executable {
    pub(crate) name: String,
    pub(crate) kind: ExecutableKind,
    func: ExecFn,
}

impl Executable {
    pub(crate) fn new<F>(name: impl Into<String>, kind: ExecutableKind, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, &[Value], &mut RowSink<'_>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            kind,
            func: Arc::new(func),
        }
    }

    pub(crate) fn invoke(
        &self,
        ctx: &mut ExecutionContext<'_>,
        args: &[Value],
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        (self.func)(ctx, args, sink)
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Name and kind of a callable, as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableInfo {
    /// Name within its namespace
    pub name: String,
    /// Kind
    pub kind: ExecutableKind,
}
