//! Extensions ("precompiles")
//!
//! An [`Extension`] is registered with an [`ExtensionRegistry`] under a
//! name. When a namespace uses it, the extension is initialized with the
//! namespace alias and its configuration, producing a [`Precompile`]: a set
//! of [`Method`]s exposed as executables of the namespace, plus an
//! [`Instance`] receiving lifecycle callbacks.
//!
//! # Lifecycle
//!
//! | Callback | When |
//! |----------|------|
//! | `on_start` | once per interpreter, after every instance is initialized |
//! | `on_use` | when the extension namespace is deployed |
//! | `on_unuse` | when the extension namespace is undeployed |
//!
//! Methods and hooks receive a [`CallContext`]. Its [`engine`](CallContext::engine)
//! handle calls back into the interpreter without taking the interpreter
//! lock, and its log lines land in the outermost call's result.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use nsql_core::{validate_ident, DataType, Error, Result, Row, Value};

use crate::action::{check_arguments, check_modifiers, Modifier};
use crate::builtins::builtin_executables;
use crate::catalog::{hook, Namespace, NamespaceKind};
use crate::context::{EngineContext, Service};
use crate::db::Database;
use crate::exec_ctx::LogBuffer;
use crate::executable::{Executable, ExecutableKind};
use crate::thread_safe::{Engine, RecursiveInterpreter};

/// Row sink handed to method handlers.
pub type MethodSink<'s> = dyn FnMut(Row) -> Result<()> + 's;

/// Handler of an extension method.
pub type MethodHandler =
    Arc<dyn Fn(&CallContext<'_>, &[Value], &mut MethodSink<'_>) -> Result<()> + Send + Sync>;

/// Context given to method handlers and namespace hooks.
pub struct CallContext<'a> {
    engine_ctx: &'a EngineContext,
    db: &'a dyn Database,
    alias: String,
    can_mutate: bool,
    is_top_level: bool,
    engine: RecursiveInterpreter,
    logs: LogBuffer,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        engine_ctx: &'a EngineContext,
        db: &'a dyn Database,
        alias: &str,
        can_mutate: bool,
        is_top_level: bool,
        engine: RecursiveInterpreter,
        logs: LogBuffer,
    ) -> Self {
        Self {
            engine_ctx,
            db,
            alias: alias.to_string(),
            can_mutate,
            is_top_level,
            engine,
            logs,
        }
    }

    /// Ambient context of the call
    pub fn engine_ctx(&self) -> &'a EngineContext {
        self.engine_ctx
    }

    /// Caller identifier
    pub fn caller(&self) -> &str {
        &self.engine_ctx.caller
    }

    /// Database handle of the call
    pub fn db(&self) -> &'a dyn Database {
        self.db
    }

    /// Namespace alias the extension is mounted under
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Whether the call may write
    pub fn can_mutate(&self) -> bool {
        self.can_mutate
    }

    /// Whether the method was invoked directly by a top-level call
    pub fn is_top_level(&self) -> bool {
        self.is_top_level
    }

    /// Non-locking handle for calling back into the interpreter.
    pub fn engine(&self) -> &dyn Engine {
        &self.engine
    }

    /// Append a line to the call's logs.
    pub fn log(&self, line: impl Into<String>) {
        self.logs.push(line);
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("alias", &self.alias)
            .field("caller", &self.engine_ctx.caller)
            .field("can_mutate", &self.can_mutate)
            .finish_non_exhaustive()
    }
}

/// Everything an instance receives when the interpreter starts.
///
/// The engine is borrowed for the hook only; an instance cannot keep it:
///
/// ```compile_fail
/// use nsql_interpreter::{App, Engine, Instance, Result};
/// use parking_lot::Mutex;
///
/// struct Keeper(Mutex<Option<&'static dyn Engine>>);
///
/// impl Instance for Keeper {
///     fn on_start(&self, app: &App<'_>) -> Result<()> {
///         *self.0.lock() = Some(app.engine);
///         Ok(())
///     }
/// }
/// ```
pub struct App<'a> {
    /// Node services
    pub service: &'a Service,
    /// Database handle used for construction
    pub db: &'a dyn Database,
    /// Non-locking engine handle, valid only while `on_start` runs
    pub engine: &'a dyn Engine,
    /// Account subsystem, passed through opaquely
    pub accounts: Arc<dyn Any + Send + Sync>,
    /// Validator subsystem, passed through opaquely
    pub validators: Arc<dyn Any + Send + Sync>,
}

/// Lifecycle callbacks of an initialized extension.
pub trait Instance: Send + Sync {
    /// Called once all instances of the interpreter exist.
    fn on_start(&self, _app: &App<'_>) -> Result<()> {
        Ok(())
    }

    /// Called when the extension namespace is deployed.
    fn on_use(&self, _ctx: &CallContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called when the extension namespace is undeployed.
    fn on_unuse(&self, _ctx: &CallContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Instance without lifecycle behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstance;

impl Instance for NoopInstance {}

/// A method exposed by an extension.
#[derive(Clone)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Invocation modifiers
    pub modifiers: Vec<Modifier>,
    /// Parameter types; `None` accepts any arguments
    pub parameters: Option<Vec<DataType>>,
    /// Returned column names; `None` if unchecked
    pub returns: Option<Vec<String>>,
    /// Implementation
    pub handler: MethodHandler,
}

impl Method {
    /// Method with no modifiers and unchecked arguments and results.
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value], &mut MethodSink<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            modifiers: Vec::new(),
            parameters: None,
            returns: None,
            handler: Arc::new(handler),
        }
    }

    /// Set modifiers
    pub fn with_modifiers(mut self, modifiers: impl IntoIterator<Item = Modifier>) -> Self {
        self.modifiers = modifiers.into_iter().collect();
        self
    }

    /// Declare parameter types
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = DataType>) -> Self {
        self.parameters = Some(parameters.into_iter().collect());
        self
    }

    /// Declare returned columns
    pub fn with_returns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.returns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("modifiers", &self.modifiers)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// An initialized extension.
pub struct Precompile {
    /// Exposed methods
    pub methods: Vec<Method>,
    /// Lifecycle callbacks
    pub instance: Arc<dyn Instance>,
}

impl Precompile {
    /// Precompile with no methods.
    pub fn new(instance: Arc<dyn Instance>) -> Self {
        Self {
            methods: Vec::new(),
            instance,
        }
    }

    /// Add a method
    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }
}

/// Factory for precompiles.
pub trait Extension: Send + Sync {
    /// Initialize for namespace `alias` with its stored configuration.
    fn initialize(
        &self,
        alias: &str,
        config: &BTreeMap<String, Value>,
        db: &dyn Database,
    ) -> Result<Precompile>;
}

impl<F> Extension for F
where
    F: Fn(&str, &BTreeMap<String, Value>, &dyn Database) -> Result<Precompile> + Send + Sync,
{
    fn initialize(
        &self,
        alias: &str,
        config: &BTreeMap<String, Value>,
        db: &dyn Database,
    ) -> Result<Precompile> {
        self(alias, config, db)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Named extensions available to interpreters.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<HashMap<String, Arc<dyn Extension>>>,
}

impl ExtensionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `extension` under `name`. Names are case-insensitive and
    /// can be registered once.
    pub fn register(&self, name: &str, extension: impl Extension + 'static) -> Result<()> {
        let name = name.to_lowercase();
        validate_ident(&name)?;

        let mut extensions = self.extensions.write();
        if extensions.contains_key(&name) {
            return Err(Error::invalid_input(format!(
                "extension {} is already registered",
                name
            )));
        }
        extensions.insert(name, Arc::new(extension));
        Ok(())
    }

    /// Look up an extension by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.extensions.read().get(&name.to_lowercase()).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extensions.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.names())
            .finish()
    }
}

/// Process-wide registry used by interpreters built without an explicit one.
static REGISTERED_EXTENSIONS: Lazy<Arc<ExtensionRegistry>> =
    Lazy::new(|| Arc::new(ExtensionRegistry::new()));

/// The process-wide registry.
pub fn global_registry() -> Arc<ExtensionRegistry> {
    Arc::clone(&REGISTERED_EXTENSIONS)
}

/// Register an extension in the process-wide registry.
pub fn register_extension(name: &str, extension: impl Extension + 'static) -> Result<()> {
    REGISTERED_EXTENSIONS.register(name, extension)
}

// =============================================================================
// Namespace construction
// =============================================================================

fn method_executable(alias: &str, method: Method) -> Executable {
    let alias = alias.to_string();
    let name = method.name.to_lowercase();

    Executable::new(name.clone(), ExecutableKind::Precompile, move |ctx, args, sink| {
        let args = match &method.parameters {
            Some(types) => check_arguments(&name, types, args)?,
            None => args.to_vec(),
        };
        check_modifiers(ctx, &alias, &name, &method.modifiers)?;

        let call_ctx = ctx.call_context(&alias);
        match &method.returns {
            Some(columns) => {
                let expected = columns.len();
                (method.handler)(&call_ctx, &args, &mut |row: Row| {
                    if row.len() != expected {
                        return Err(Error::internal(format!(
                            "method {}.{} returned {} columns, declared {}",
                            alias,
                            name,
                            row.len(),
                            expected
                        )));
                    }
                    sink(row)
                })
            }
            None => (method.handler)(&call_ctx, &args, sink),
        }
    })
}

/// Initialize `extension` for `alias` and build its namespace: a copy of
/// the built-ins overridden by the extension's methods, with the instance's
/// use/unuse callbacks as deploy hooks.
pub(crate) fn initialize_extension(
    extension: &dyn Extension,
    alias: &str,
    config: &BTreeMap<String, Value>,
    db: &dyn Database,
) -> Result<(Namespace, Arc<dyn Instance>)> {
    let alias = alias.to_lowercase();
    let precompile = extension.initialize(&alias, config, db)?;

    let mut executables = builtin_executables();
    let mut seen = Vec::with_capacity(precompile.methods.len());
    for method in precompile.methods {
        let name = method.name.to_lowercase();
        validate_ident(&name)?;
        if seen.contains(&name) {
            return Err(Error::invalid_input(format!(
                "extension {} declares method {} twice",
                alias, name
            )));
        }
        seen.push(name.clone());
        executables.insert(name, Arc::new(method_executable(&alias, method)));
    }

    let on_use = Arc::clone(&precompile.instance);
    let on_unuse = Arc::clone(&precompile.instance);
    let namespace = Namespace::new(NamespaceKind::Extension, BTreeMap::new(), executables)
        .with_hooks(
            hook(move |ctx| on_use.on_use(ctx)),
            hook(move |ctx| on_unuse.on_unuse(ctx)),
        );

    Ok((namespace, precompile.instance))
}
