//! Interpreter core
//!
//! [`BaseInterpreter`] owns the catalog and the access controller and
//! implements `execute` and `call`. It does no locking of its own beyond the
//! short-lived guards around catalog lookups; callers reach it through
//! [`ThreadSafeInterpreter`](crate::ThreadSafeInterpreter), which serializes
//! writers, or through a [`RecursiveInterpreter`] handed to extensions.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use nsql_core::{
    normalize_var_name, validate_ident, validate_var_name, Error, HostValue, Result, ResultRow,
    Row, Value,
};

use crate::access::AccessController;
use crate::action::{compile, ActionDef};
use crate::builtins::{builtin_executables, is_builtin};
use crate::catalog::{Catalog, Namespace, NamespaceKind};
use crate::config::InterpreterConfig;
use crate::context::{CallResult, EngineContext, Service};
use crate::db::{require_access_mode, AccessMode, Database};
use crate::exec_ctx::{ExecutionContext, LogBuffer};
use crate::executable::{Executable, ExecutableInfo, ExecutableKind, RowSink};
use crate::parser::Parser;
use crate::planner::{plan, run_statements};
use crate::precompile::{initialize_extension, App, CallContext, ExtensionRegistry, Instance};
use crate::schema::{NamespaceSchema, TableDef};
use crate::thread_safe::RecursiveInterpreter;

/// Caller-facing row sink.
pub type ResultSink<'s> = dyn FnMut(ResultRow) -> Result<()> + 's;

/// Per-request inputs shared by `execute` and `call`.
pub(crate) struct Request<'a> {
    pub(crate) engine_ctx: &'a EngineContext,
    pub(crate) db: &'a dyn Database,
    /// Whether the request comes from outside the interpreter
    pub(crate) top_level: bool,
    /// Buffer the request's log lines are appended to
    pub(crate) logs: LogBuffer,
}

/// Shared interpreter state.
pub(crate) struct BaseInterpreter {
    pub(crate) config: InterpreterConfig,
    pub(crate) parser: Arc<dyn Parser>,
    pub(crate) catalog: RwLock<Catalog>,
    pub(crate) access: RwLock<AccessController>,
    pub(crate) registry: Arc<ExtensionRegistry>,
    pub(crate) service: Service,
    pub(crate) accounts: Arc<dyn Any + Send + Sync>,
    pub(crate) validators: Arc<dyn Any + Send + Sync>,
}

impl BaseInterpreter {
    // ========================================================================
    // Resolution
    // ========================================================================

    /// Look up `name` in `namespace`.
    pub(crate) fn resolve(&self, namespace: &str, name: &str) -> Result<Arc<Executable>> {
        self.catalog.read().executable(namespace, name)
    }

    /// Look up an executable that may be invoked with `call`.
    fn callable(&self, namespace: &str, name: &str) -> Result<Arc<Executable>> {
        let exec = self.resolve(namespace, name)?;
        match exec.kind {
            ExecutableKind::Function => {
                warn!(target: "nsql::interp", namespace, action = %exec.name, "Rejected call of a built-in function");
                Err(Error::NotCallable {
                    action: exec.name.clone(),
                })
            }
            ExecutableKind::Action | ExecutableKind::Precompile => Ok(exec),
        }
    }

    fn run(
        &self,
        ctx: &mut ExecutionContext<'_>,
        namespace: &str,
        exec: &Executable,
        args: &[Value],
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        exec.invoke(ctx, args, sink)
            .map_err(|e| e.in_call(&namespace.to_lowercase(), &exec.name))
    }

    /// Resolve and invoke an action or method from inside a running context.
    pub(crate) fn invoke(
        &self,
        ctx: &mut ExecutionContext<'_>,
        namespace: &str,
        action: &str,
        args: &[Value],
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        let exec = self.callable(namespace, action)?;
        self.run(ctx, namespace, &exec, args, sink)
    }

    // ========================================================================
    // Execute / call
    // ========================================================================

    /// Parse and run statement text in the default namespace.
    pub(crate) fn execute(
        self: &Arc<Self>,
        request: Request<'_>,
        text: &str,
        params: &HashMap<String, HostValue>,
        sink: &mut ResultSink<'_>,
    ) -> Result<()> {
        let statements = self.parser.parse(text)?;
        if statements.is_empty() {
            return Err(Error::NoStatements {
                statement: text.to_string(),
            });
        }

        let mut ctx = ExecutionContext::new(
            Arc::clone(self),
            request.engine_ctx,
            request.db,
            &self.config.default_namespace,
            request.top_level,
            request.logs,
        )?;

        let ordered: BTreeMap<&String, &HostValue> = params.iter().collect();
        for (key, host) in ordered {
            let value = Value::from_host(host)?;
            let name = normalize_var_name(key);
            validate_var_name(&name)?;
            ctx.scope.set(&name, value)?;
        }

        debug!(
            target: "nsql::interp",
            statements = statements.len(),
            params = params.len(),
            top_level = request.top_level,
            "Execute"
        );

        let planned = plan(&statements);
        run_statements(&mut ctx, &planned, &mut |row: Row| sink(ResultRow::from(row)))
    }

    /// Invoke `namespace.action` with host arguments.
    ///
    /// The returned logs are the lines appended to the request's buffer
    /// while this call ran.
    pub(crate) fn call(
        self: &Arc<Self>,
        request: Request<'_>,
        namespace: &str,
        action: &str,
        args: &[HostValue],
        sink: &mut ResultSink<'_>,
    ) -> Result<CallResult> {
        let namespace = if namespace.is_empty() {
            self.config.default_namespace.clone()
        } else {
            namespace.to_lowercase()
        };
        let action = action.to_lowercase();

        let logs = request.logs.clone();
        let start = logs.len();
        let mut ctx = ExecutionContext::new(
            Arc::clone(self),
            request.engine_ctx,
            request.db,
            &namespace,
            request.top_level,
            request.logs,
        )?;

        let exec = self.callable(&namespace, &action)?;
        let args = args
            .iter()
            .map(Value::from_host)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            target: "nsql::interp",
            namespace = %namespace,
            action = %action,
            kind = %exec.kind,
            top_level = request.top_level,
            "Call"
        );

        let outcome = self.run(&mut ctx, &namespace, &exec, &args, &mut |row: Row| {
            sink(ResultRow::from(row))
        });
        if let Err(err) = outcome {
            // a failed call leaves no lines behind in a shared buffer
            logs.truncate(start);
            return Err(err);
        }

        Ok(CallResult {
            logs: logs.since(start),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Context handed to deploy hooks. Hooks write into `logs` and call back
    /// through a recursive handle.
    fn hook_context<'a>(
        self: &Arc<Self>,
        engine_ctx: &'a EngineContext,
        db: &'a dyn Database,
        alias: &str,
        logs: LogBuffer,
    ) -> Result<CallContext<'a>> {
        let mode = require_access_mode(db)?;
        Ok(CallContext::new(
            engine_ctx,
            db,
            alias,
            mode == AccessMode::ReadWrite,
            true,
            RecursiveInterpreter::new(Arc::clone(self), logs.clone()),
            logs,
        ))
    }

    /// Run `on_start` of every instance, in order. The engine handed to the
    /// instances does not lock, so they may call back while construction or
    /// an exclusive operation is in progress. It is only lent for the hook,
    /// so no instance can keep a non-locking handle past it.
    pub(crate) fn start_instances(
        self: &Arc<Self>,
        db: &dyn Database,
        instances: &[Arc<dyn Instance>],
    ) -> Result<()> {
        let engine = RecursiveInterpreter::new(Arc::clone(self), LogBuffer::new());
        let app = App {
            service: &self.service,
            db,
            engine: &engine,
            accounts: Arc::clone(&self.accounts),
            validators: Arc::clone(&self.validators),
        };
        for instance in instances {
            instance.on_start(&app)?;
        }
        Ok(())
    }

    /// Add `namespace` under `name`, running its deploy hook first.
    fn install(
        self: &Arc<Self>,
        engine_ctx: &EngineContext,
        db: &dyn Database,
        name: &str,
        mut namespace: Namespace,
    ) -> Result<()> {
        if let Some(on_deploy) = namespace.take_on_deploy() {
            let ctx = self.hook_context(engine_ctx, db, name, LogBuffer::new())?;
            on_deploy(&ctx)?;
        }

        let kind = namespace.kind();
        self.catalog.write().insert(name, namespace);
        self.access.write().register_namespace(name);
        info!(target: "nsql::interp", namespace = %name, kind = %kind, "Namespace deployed");
        Ok(())
    }

    fn ensure_absent(&self, name: &str) -> Result<()> {
        if self.catalog.read().contains(name) {
            return Err(Error::NamespaceExists {
                namespace: name.to_string(),
            });
        }
        Ok(())
    }

    /// Deploy a namespace from its definition.
    pub(crate) fn deploy_namespace(
        self: &Arc<Self>,
        engine_ctx: &EngineContext,
        db: &dyn Database,
        name: &str,
        schema: NamespaceSchema,
    ) -> Result<()> {
        let name = name.to_lowercase();
        validate_ident(&name)?;
        self.ensure_absent(&name)?;

        let NamespaceSchema {
            kind,
            mut tables,
            mut actions,
        } = schema;
        for table in &mut tables {
            table.normalize()?;
        }
        for action in &mut actions {
            action.normalize(&name)?;
        }

        let namespace = build_namespace(kind, tables, &actions, self.parser.as_ref())?;
        self.install(engine_ctx, db, &name, namespace)
    }

    /// Initialize a registered extension under `alias`, start it and deploy
    /// it as an extension namespace.
    pub(crate) fn use_extension(
        self: &Arc<Self>,
        engine_ctx: &EngineContext,
        db: &dyn Database,
        extension: &str,
        alias: &str,
        config: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let alias = alias.to_lowercase();
        validate_ident(&alias)?;
        self.ensure_absent(&alias)?;

        let ext = self.registry.get(extension).ok_or_else(|| {
            Error::invalid_input(format!("extension {} is not registered", extension))
        })?;
        let (namespace, instance) = initialize_extension(ext.as_ref(), &alias, config, db)?;
        self.start_instances(db, &[instance])?;
        info!(target: "nsql::ext", extension, alias = %alias, "Extension started");

        self.install(engine_ctx, db, &alias, namespace)
    }

    /// Remove a namespace and run its undeploy hook.
    pub(crate) fn undeploy_namespace(
        self: &Arc<Self>,
        engine_ctx: &EngineContext,
        db: &dyn Database,
        name: &str,
    ) -> Result<()> {
        let name = name.to_lowercase();
        let mut namespace = {
            let mut catalog = self.catalog.write();
            if catalog.get(&name)?.kind() == NamespaceKind::System {
                return Err(Error::PermissionDenied {
                    reason: format!("system namespace {} cannot be undeployed", name),
                });
            }
            catalog.remove(&name)?
        };
        self.access.write().unregister_namespace(&name);

        if let Some(on_undeploy) = namespace.take_on_undeploy() {
            let ctx = self.hook_context(engine_ctx, db, &name, LogBuffer::new())?;
            on_undeploy(&ctx)?;
        }
        info!(target: "nsql::interp", namespace = %name, "Namespace undeployed");
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub(crate) fn namespaces(&self) -> Vec<(String, NamespaceKind)> {
        self.catalog.read().list()
    }

    pub(crate) fn tables(&self, namespace: &str) -> Result<Vec<TableDef>> {
        Ok(self
            .catalog
            .read()
            .get(namespace)?
            .tables
            .values()
            .cloned()
            .collect())
    }

    pub(crate) fn actions(&self, namespace: &str) -> Result<Vec<ExecutableInfo>> {
        Ok(self.catalog.read().get(namespace)?.callables())
    }
}

/// Build a namespace over a fresh copy of the built-ins. Actions replace
/// built-ins of the same name.
pub(crate) fn build_namespace(
    kind: NamespaceKind,
    tables: Vec<TableDef>,
    actions: &[ActionDef],
    parser: &dyn Parser,
) -> Result<Namespace> {
    let mut table_map = BTreeMap::new();
    for table in tables {
        let name = table.name.clone();
        if table_map.insert(name.clone(), table).is_some() {
            return Err(Error::invalid_input(format!("duplicate table {}", name)));
        }
    }

    let mut executables = builtin_executables();
    let mut declared = Vec::with_capacity(actions.len());
    for def in actions {
        if declared.contains(&def.name) {
            return Err(Error::invalid_input(format!("duplicate action {}", def.name)));
        }
        declared.push(def.name.clone());
        let exec = compile(def, parser)?;
        executables.insert(exec.name.clone(), Arc::new(exec));
    }

    Ok(Namespace::new(kind, table_map, executables))
}

/// Fold a previously loaded namespace into a freshly initialized extension
/// namespace: its persisted actions replace methods of the same name and its
/// tables are carried over unchanged. Baseline built-ins are skipped so they
/// never shadow a method.
pub(crate) fn merge_persisted(extension: &mut Namespace, existing: Namespace) {
    for (name, exec) in existing.executables {
        if !is_builtin(&exec) {
            extension.executables.insert(name, exec);
        }
    }
    extension.tables = existing.tables;
}
