//! nsql - namespace-scoped SQL and action interpreter
//!
//! nsql executes statement text and invokes named actions against a
//! caller-supplied database handle, with namespaces, user-defined actions,
//! access control and extensions.
//!
//! # Quick Start
//!
//! ```ignore
//! use nsql::{Engine, EngineContext, ThreadSafeInterpreter};
//!
//! let interpreter = ThreadSafeInterpreter::builder().build(&db)?;
//! let result = interpreter.call(&EngineContext::new("alice"), &db, "main", "notice", &["hello".into()], &mut |_| Ok(()))?;
//! assert_eq!(result.logs, vec!["hello"]);
//! ```
//!
//! # Architecture
//!
//! - `nsql-core`: values, types, rows and the error type
//! - `nsql-interpreter`: catalog, parser, planner, actions, extensions and
//!   the locking interpreter handle

// Re-export the public API from nsql-interpreter
pub use nsql_interpreter::*;
