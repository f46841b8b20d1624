//! Namespace-scoped SQL and action interpreter
//!
//! The interpreter executes statement text and invokes named actions against
//! a caller-supplied [`Database`] handle. State is organized in namespaces,
//! each holding tables and a table of executables:
//!
//! - **Functions**: built-in scalar functions, evaluated by the database
//! - **Actions**: user-defined statement bodies, persisted in the catalog
//! - **Precompiles**: methods of extensions registered with the node
//!
//! # Quick Start
//!
//! ```ignore
//! use nsql_interpreter::{Engine, EngineContext, ThreadSafeInterpreter};
//!
//! let interpreter = ThreadSafeInterpreter::builder().build(&db)?;
//!
//! let ctx = EngineContext::new("alice");
//! let params = [("x".to_string(), serde_json::json!(5))].into();
//! interpreter.execute(&ctx, &db, "SELECT $x + 1;", &params, &mut |row| {
//!     println!("{:?}", row.values);
//!     Ok(())
//! })?;
//! ```
//!
//! # Architecture
//!
//! - [`ThreadSafeInterpreter`]: locking handle for external callers
//! - [`RecursiveInterpreter`]: non-locking handle given to extensions
//! - [`InterpreterBuilder`]: loads the persisted catalog and starts extensions
//! - [`ExtensionRegistry`]: named extensions available to interpreters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod action;
pub mod ast;
mod builder;
mod builtins;
mod catalog;
pub mod config;
pub mod context;
pub mod db;
mod exec_ctx;
mod executable;
mod interpreter;
mod meta;
pub mod parser;
mod planner;
pub mod precompile;
pub mod schema;
mod scope;
mod thread_safe;

pub use access::{AccessController, Privilege, DEFAULT_ROLE, OWNER_ROLE};
pub use action::{ActionDef, ActionParameter, Modifier};
pub use builder::InterpreterBuilder;
pub use builtins::{builtin_names, NOTICE};
pub use catalog::NamespaceKind;
pub use config::{InterpreterConfig, CONFIG_FILE_NAME};
pub use context::{CallResult, CancelToken, EngineContext, Service};
pub use db::{AccessMode, Database, QueryResult};
pub use executable::{ExecutableInfo, ExecutableKind};
pub use interpreter::ResultSink;
pub use parser::{Parser, SqlParser};
pub use precompile::{
    global_registry, register_extension, App, CallContext, Extension, ExtensionRegistry, Instance,
    Method, MethodHandler, MethodSink, NoopInstance, Precompile,
};
pub use schema::{ColumnDef, NamespaceSchema, TableDef};
pub use thread_safe::{Engine, RecursiveInterpreter, ThreadSafeInterpreter};

pub use nsql_core::{
    DataType, Error, ErrorKind, HostValue, ParseError, RawValue, Result, ResultRow, Row, Value,
};
