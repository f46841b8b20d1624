//! Locking and recursive engine handles
//!
//! Both handles run the same [`BaseInterpreter`]; they differ only in
//! locking:
//!
//! - [`ThreadSafeInterpreter`] is the handle external callers use. Each
//!   request takes the interpreter lock: shared for a read-only database
//!   handle, exclusive for anything else. A handle that cannot report its
//!   access mode is rejected before any lock is taken.
//! - [`RecursiveInterpreter`] never locks and appends its log lines to the
//!   buffer of the request that created it. It is handed to extensions
//!   (start hooks, methods, deploy hooks), which may already run under the
//!   exclusive lock, so calling back through it cannot deadlock.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use nsql_core::{Error, HostValue, Result, Value};

use crate::builder::InterpreterBuilder;
use crate::catalog::NamespaceKind;
use crate::context::{CallResult, EngineContext};
use crate::db::{require_access_mode, AccessMode, Database};
use crate::exec_ctx::LogBuffer;
use crate::executable::ExecutableInfo;
use crate::interpreter::{BaseInterpreter, Request, ResultSink};
use crate::schema::{NamespaceSchema, TableDef};

/// The `execute`/`call` contract shared by both handles.
pub trait Engine: Send + Sync {
    /// Invoke `namespace.action` (empty namespace: the default one) with
    /// host arguments, streaming rows into `sink`.
    fn call(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        namespace: &str,
        action: &str,
        args: &[HostValue],
        sink: &mut ResultSink<'_>,
    ) -> Result<CallResult>;

    /// Parse and run `statement` in the default namespace with `params`
    /// bound as variables, streaming rows into `sink`.
    fn execute(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        statement: &str,
        params: &HashMap<String, HostValue>,
        sink: &mut ResultSink<'_>,
    ) -> Result<()>;
}

/// Held for the duration of a request.
enum Guard<'a> {
    Shared { _guard: RwLockReadGuard<'a, ()> },
    Exclusive { _guard: RwLockWriteGuard<'a, ()> },
}

/// Interpreter handle for external callers.
///
/// # Thread Safety
///
/// Requests on read-only database handles may run concurrently. Any other
/// request runs alone: it waits for running requests and blocks new ones
/// until it finishes.
pub struct ThreadSafeInterpreter {
    lock: RwLock<()>,
    inner: Arc<BaseInterpreter>,
}

impl ThreadSafeInterpreter {
    pub(crate) fn new(inner: Arc<BaseInterpreter>) -> Self {
        Self {
            lock: RwLock::new(()),
            inner,
        }
    }

    /// Builder with default configuration and the process-wide registry.
    pub fn builder() -> InterpreterBuilder {
        InterpreterBuilder::new()
    }

    fn lock(&self, db: &dyn Database) -> Result<Guard<'_>> {
        let mode = require_access_mode(db)?;
        debug!(target: "nsql::lock", mode = ?mode, "Acquiring interpreter lock");
        Ok(match mode {
            AccessMode::ReadOnly => Guard::Shared {
                _guard: self.lock.read(),
            },
            AccessMode::ReadWrite => Guard::Exclusive {
                _guard: self.lock.write(),
            },
        })
    }

    fn lock_exclusive(&self, db: &dyn Database, operation: &str) -> Result<Guard<'_>> {
        if require_access_mode(db)? != AccessMode::ReadWrite {
            return Err(Error::ReadOnly {
                operation: operation.to_string(),
            });
        }
        self.lock(db)
    }

    /// Deploy a namespace. Fails if the name is taken.
    pub fn deploy_namespace(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        name: &str,
        schema: NamespaceSchema,
    ) -> Result<()> {
        let _guard = self.lock_exclusive(db, "deploy namespace")?;
        self.inner.deploy_namespace(ctx, db, name, schema)
    }

    /// Initialize the registered extension `extension` under `alias` and
    /// deploy it as an extension namespace.
    pub fn use_extension(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        extension: &str,
        alias: &str,
        config: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let _guard = self.lock_exclusive(db, "use extension")?;
        self.inner.use_extension(ctx, db, extension, alias, config)
    }

    /// Remove a user or extension namespace.
    pub fn undeploy_namespace(&self, ctx: &EngineContext, db: &dyn Database, name: &str) -> Result<()> {
        let _guard = self.lock_exclusive(db, "undeploy namespace")?;
        self.inner.undeploy_namespace(ctx, db, name)
    }

    /// Namespace names and kinds, sorted by name.
    pub fn namespaces(&self) -> Vec<(String, NamespaceKind)> {
        let _guard = self.lock.read();
        self.inner.namespaces()
    }

    /// Tables of `namespace`, sorted by name.
    pub fn tables(&self, namespace: &str) -> Result<Vec<TableDef>> {
        let _guard = self.lock.read();
        self.inner.tables(namespace)
    }

    /// Actions and methods of `namespace`, sorted by name.
    pub fn actions(&self, namespace: &str) -> Result<Vec<ExecutableInfo>> {
        let _guard = self.lock.read();
        self.inner.actions(namespace)
    }
}

impl Engine for ThreadSafeInterpreter {
    fn call(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        namespace: &str,
        action: &str,
        args: &[HostValue],
        sink: &mut ResultSink<'_>,
    ) -> Result<CallResult> {
        let _guard = self.lock(db)?;
        let request = Request {
            engine_ctx: ctx,
            db,
            top_level: true,
            logs: LogBuffer::new(),
        };
        self.inner.call(request, namespace, action, args, sink)
    }

    fn execute(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        statement: &str,
        params: &HashMap<String, HostValue>,
        sink: &mut ResultSink<'_>,
    ) -> Result<()> {
        let _guard = self.lock(db)?;
        let request = Request {
            engine_ctx: ctx,
            db,
            top_level: true,
            logs: LogBuffer::new(),
        };
        self.inner.execute(request, statement, params, sink)
    }
}

impl fmt::Debug for ThreadSafeInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeInterpreter")
            .field("namespaces", &self.inner.catalog.read().list().len())
            .finish_non_exhaustive()
    }
}

/// Non-locking handle given to extensions.
///
/// Calls made through it are nested: they are not top-level for modifier
/// checks, and their log lines are appended to the buffer of the request
/// that created the handle. Extensions only ever borrow one, for the
/// length of a hook or method call.
pub struct RecursiveInterpreter {
    inner: Arc<BaseInterpreter>,
    logs: LogBuffer,
}

impl RecursiveInterpreter {
    pub(crate) fn new(inner: Arc<BaseInterpreter>, logs: LogBuffer) -> Self {
        Self { inner, logs }
    }

    fn request<'a>(&self, ctx: &'a EngineContext, db: &'a dyn Database) -> Request<'a> {
        Request {
            engine_ctx: ctx,
            db,
            top_level: false,
            logs: self.logs.clone(),
        }
    }
}

impl Engine for RecursiveInterpreter {
    fn call(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        namespace: &str,
        action: &str,
        args: &[HostValue],
        sink: &mut ResultSink<'_>,
    ) -> Result<CallResult> {
        self.inner
            .call(self.request(ctx, db), namespace, action, args, sink)
    }

    fn execute(
        &self,
        ctx: &EngineContext,
        db: &dyn Database,
        statement: &str,
        params: &HashMap<String, HostValue>,
        sink: &mut ResultSink<'_>,
    ) -> Result<()> {
        self.inner
            .execute(self.request(ctx, db), statement, params, sink)
    }
}

impl fmt::Debug for RecursiveInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveInterpreter")
            .field("logs", &self.logs.len())
            .finish_non_exhaustive()
    }
}
