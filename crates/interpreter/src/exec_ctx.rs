//! Per-invocation execution state

use parking_lot::Mutex;
use std::sync::Arc;

use nsql_core::{Error, Result, Value};

use crate::ast::{ContextVar, VarRef};
use crate::context::EngineContext;
use crate::db::{require_access_mode, AccessMode, Database};
use crate::interpreter::BaseInterpreter;
use crate::precompile::CallContext;
use crate::scope::Scope;
use crate::thread_safe::RecursiveInterpreter;

/// Append-only log lines of one top-level call.
///
/// Clones share the same buffer, so nested contexts and recursive engine
/// handles write into the stream the outermost call returns.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogBuffer(Arc<Mutex<Vec<String>>>);

impl LogBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, line: impl Into<String>) {
        self.0.lock().push(line.into());
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Lines appended at or after position `start`.
    pub(crate) fn since(&self, start: usize) -> Vec<String> {
        let logs = self.0.lock();
        logs.get(start..).map(<[String]>::to_vec).unwrap_or_default()
    }

    /// Drop lines appended at or after position `start`.
    pub(crate) fn truncate(&self, start: usize) {
        self.0.lock().truncate(start);
    }
}

/// State threaded through every executable invoked by one `execute` or
/// `call`.
pub(crate) struct ExecutionContext<'a> {
    pub(crate) engine_ctx: &'a EngineContext,
    pub(crate) db: &'a dyn Database,
    pub(crate) interpreter: Arc<BaseInterpreter>,
    pub(crate) scope: Scope,
    /// Derived from the handle's access mode, never set by callers
    pub(crate) can_mutate: bool,
    pub(crate) logs: LogBuffer,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        interpreter: Arc<BaseInterpreter>,
        engine_ctx: &'a EngineContext,
        db: &'a dyn Database,
        namespace: &str,
        is_top_level: bool,
        logs: LogBuffer,
    ) -> Result<Self> {
        let mode = require_access_mode(db)?;
        Ok(Self {
            engine_ctx,
            db,
            interpreter,
            scope: Scope::new(namespace, is_top_level),
            can_mutate: mode == AccessMode::ReadWrite,
            logs,
        })
    }

    /// Nested context for an action body running in `namespace`.
    pub(crate) fn child(&self, namespace: &str) -> ExecutionContext<'a> {
        ExecutionContext {
            engine_ctx: self.engine_ctx,
            db: self.db,
            interpreter: Arc::clone(&self.interpreter),
            scope: self.scope.child(namespace),
            can_mutate: self.can_mutate,
            logs: self.logs.clone(),
        }
    }

    pub(crate) fn caller(&self) -> &str {
        &self.engine_ctx.caller
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        self.engine_ctx.cancel.check()
    }

    pub(crate) fn require_mutation(&self, operation: &str) -> Result<()> {
        if self.can_mutate {
            Ok(())
        } else {
            Err(Error::ReadOnly {
                operation: operation.to_string(),
            })
        }
    }

    /// Non-locking engine handle writing into this context's log buffer.
    pub(crate) fn recursive_engine(&self) -> RecursiveInterpreter {
        RecursiveInterpreter::new(Arc::clone(&self.interpreter), self.logs.clone())
    }

    /// Context handed to extension methods and namespace hooks.
    pub(crate) fn call_context(&self, alias: &str) -> CallContext<'a> {
        CallContext::new(
            self.engine_ctx,
            self.db,
            alias,
            self.can_mutate,
            self.scope.is_top_level(),
            self.recursive_engine(),
            self.logs.clone(),
        )
    }

    pub(crate) fn context_value(&self, var: ContextVar) -> Value {
        match var {
            ContextVar::Caller => Value::text(self.engine_ctx.caller.clone()),
            ContextVar::Signer => Value::bytea(self.engine_ctx.signer.clone()),
            ContextVar::Height => Value::int8(self.engine_ctx.height),
            ContextVar::TxId => Value::text(self.engine_ctx.tx_id.clone()),
        }
    }

    pub(crate) fn resolve_var(&self, var: &VarRef) -> Result<Value> {
        match var {
            VarRef::Variable(name) => self.scope.get(name).cloned(),
            VarRef::Context(cv) => Ok(self.context_value(*cv)),
        }
    }
}
