//! Core types for nsql
//!
//! This crate defines the value model shared by every interpreter boundary:
//! - DataType: Type tag (base type + array flag)
//! - Value / RawValue: Typed runtime datum and its payload
//! - HostValue: Untyped caller-side value (JSON) and its strict conversion
//! - Row / ResultRow: Internal and caller-facing result rows
//! - Limits: Identifier and variable name rules
//! - Error: Structured error type and its classification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod limits;
pub mod row;
pub mod types;
pub mod value;

pub use error::{Error, ErrorKind, ParseError, Result};
pub use limits::{
    normalize_var_name, validate_ident, validate_var_name, CONTEXT_SIGIL, MAX_IDENT_NAME_LENGTH,
    VARIABLE_SIGIL,
};
pub use row::{ResultRow, Row};
pub use types::{BaseType, DataType};
pub use value::{HostValue, RawValue, Value};
