//! Interpreter construction
//!
//! Building an interpreter reads the persisted catalog through a database
//! handle and brings every namespace and extension back to life:
//!
//! 1. **Bootstrap**: if the metadata schema does not exist it is created.
//! 2. **Namespaces**: each persisted namespace gets its tables and a fresh
//!    copy of the built-ins, overridden by its compiled actions.
//! 3. **Extensions**: each persisted extension use is resolved against the
//!    registry and initialized. A namespace already loaded under the same
//!    alias keeps its actions and tables.
//! 4. **Start**: once every instance exists, each is started exactly once.
//!
//! Any failure aborts construction.
//!
//! ```ignore
//! use nsql_interpreter::ThreadSafeInterpreter;
//!
//! let interpreter = ThreadSafeInterpreter::builder()
//!     .config(InterpreterConfig::load(Path::new("nsql.toml"))?)
//!     .build(&db)?;
//! ```

use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use nsql_core::{Error, Result};

use crate::catalog::Catalog;
use crate::config::InterpreterConfig;
use crate::context::Service;
use crate::db::Database;
use crate::interpreter::{build_namespace, merge_persisted, BaseInterpreter};
use crate::meta::Metadata;
use crate::parser::{Parser, SqlParser};
use crate::precompile::{global_registry, initialize_extension, ExtensionRegistry};
use crate::thread_safe::ThreadSafeInterpreter;

/// Builder for [`ThreadSafeInterpreter`].
pub struct InterpreterBuilder {
    config: InterpreterConfig,
    parser: Arc<dyn Parser>,
    registry: Arc<ExtensionRegistry>,
    service: Service,
    accounts: Arc<dyn Any + Send + Sync>,
    validators: Arc<dyn Any + Send + Sync>,
}

impl InterpreterBuilder {
    /// Default configuration, [`SqlParser`] and the process-wide registry.
    pub fn new() -> Self {
        Self {
            config: InterpreterConfig::default(),
            parser: Arc::new(SqlParser),
            registry: global_registry(),
            service: Service::default(),
            accounts: Arc::new(()),
            validators: Arc::new(()),
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use another statement parser
    pub fn parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    /// Resolve extensions against `registry` instead of the process-wide one
    pub fn registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Node services passed to extensions
    pub fn service(mut self, service: Service) -> Self {
        self.service = service;
        self
    }

    /// Account subsystem passed to extensions
    pub fn accounts(mut self, accounts: Arc<dyn Any + Send + Sync>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Validator subsystem passed to extensions
    pub fn validators(mut self, validators: Arc<dyn Any + Send + Sync>) -> Self {
        self.validators = validators;
        self
    }

    /// Load the persisted catalog from `db` and start every extension.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid
    /// - The bootstrap check or any metadata query fails or returns
    ///   malformed rows
    /// - An action body does not parse
    /// - A persisted extension is not registered
    /// - An extension fails to initialize or start
    pub fn build(self, db: &dyn Database) -> Result<ThreadSafeInterpreter> {
        let mut config = self.config;
        config.validate()?;

        let meta = Metadata::new(db, &config.metadata_schema);
        if !meta.is_initialized()? {
            info!(target: "nsql::boot", schema = %config.metadata_schema, "Initializing metadata schema");
            meta.initialize(&[config.default_namespace.as_str(), config.info_namespace.as_str()])?;
        }

        let mut access = meta.access_controller()?;
        let mut catalog = Catalog::new();

        for (name, kind) in meta.namespaces()? {
            let tables = meta.tables(&name)?;
            let actions = meta.actions(&name)?;
            debug!(
                target: "nsql::boot",
                namespace = %name,
                kind = %kind,
                tables = tables.len(),
                actions = actions.len(),
                "Loading namespace"
            );
            let namespace = build_namespace(kind, tables, &actions, self.parser.as_ref())?;
            catalog.insert(&name, namespace);
            access.register_namespace(&name);
        }

        let mut instances = Vec::new();
        for stored in meta.extensions()? {
            let extension =
                self.registry
                    .get(&stored.base_extension)
                    .ok_or_else(|| Error::UnknownExtension {
                        name: stored.base_extension.clone(),
                    })?;

            let (mut namespace, instance) =
                initialize_extension(extension.as_ref(), &stored.alias, &stored.config, db)?;
            if catalog.contains(&stored.alias) {
                let existing = catalog.remove(&stored.alias)?;
                merge_persisted(&mut namespace, existing);
            }

            debug!(
                target: "nsql::boot",
                extension = %stored.base_extension,
                alias = %stored.alias,
                "Extension initialized"
            );
            catalog.insert(&stored.alias, namespace);
            access.register_namespace(&stored.alias);
            instances.push(instance);
        }

        let namespaces = catalog.list().len();
        let inner = Arc::new(BaseInterpreter {
            config,
            parser: self.parser,
            catalog: RwLock::new(catalog),
            access: RwLock::new(access),
            registry: self.registry,
            service: self.service,
            accounts: self.accounts,
            validators: self.validators,
        });

        inner.start_instances(db, &instances)?;

        info!(
            target: "nsql::boot",
            namespaces,
            extensions = instances.len(),
            "Interpreter ready"
        );
        Ok(ThreadSafeInterpreter::new(inner))
    }
}

impl Default for InterpreterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterpreterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
