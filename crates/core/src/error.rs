//! Error types for interpreter operations.
//!
//! All errors surfaced by the interpreter are represented by the [`Error`]
//! enum. These errors are:
//! - **Structured**: Each variant has typed fields for error details
//! - **Serializable**: Can be converted to/from JSON
//! - **Classified**: [`Error::kind`] tells callers whether a failure is a
//!   deterministic, reportable outcome or a node-local defect

use serde::{Deserialize, Serialize};

/// Result type alias for interpreter operations
pub type Result<T> = std::result::Result<T, Error>;

/// A failure produced by the statement parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    /// Human readable description
    pub message: String,
    /// 1-based line of the offending token
    pub line: usize,
    /// 1-based column of the offending token
    pub column: usize,
}

impl ParseError {
    /// Create a parse error at a position
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        ParseError {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A namespace, action or variable does not exist
    NotFound,
    /// The request itself is malformed
    InvalidInput,
    /// The caller is not allowed to do this
    Denied,
    /// The database handle rejected a query
    Database,
    /// The ambient context was cancelled
    Cancelled,
    /// Persisted state or node invariants are broken
    Internal,
}

impl ErrorKind {
    /// Whether every honest node would produce the same failure for the
    /// same input. Non-deterministic failures must not be reported as a
    /// transaction outcome.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, ErrorKind::Internal | ErrorKind::Cancelled)
    }
}

/// Interpreter errors.
///
/// # Categories
///
/// | Category | Variants | Kind |
/// |----------|----------|------|
/// | Parse | `Parse`, `NoStatements` | InvalidInput |
/// | Resolution | `NamespaceNotFound`, `UnknownAction`, `UnknownVariable` | NotFound |
/// | Resolution | `NotCallable`, `NamespaceExists` | InvalidInput |
/// | Validation | `InvalidVariable`, `UnsupportedHostValue`, `TypeMismatch`, `InvalidArguments`, `InvalidInput`, `Overflow` | InvalidInput |
/// | Access | `ReadOnly`, `PermissionDenied` | Denied |
/// | Database | `Database` | Database |
/// | Cancellation | `Cancelled` | Cancelled |
/// | Consistency | `NodeBug`, `UnknownExtension`, `Initialization`, `AccessModeUnavailable`, `Internal` | Internal |
///
/// `Call` wraps another error with the namespace and action that produced
/// it; its kind is the kind of the wrapped error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    // ==================== Parse ====================
    /// Malformed statement text
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Statement text parsed to nothing
    #[error("no valid statements provided: {statement}")]
    NoStatements { statement: String },

    // ==================== Resolution ====================
    /// Namespace does not exist
    #[error("namespace \"{namespace}\" does not exist")]
    NamespaceNotFound { namespace: String },

    /// Action does not exist in the namespace
    #[error("unknown action: action \"{action}\" does not exist in namespace \"{namespace}\"")]
    UnknownAction { namespace: String, action: String },

    /// Variable referenced before assignment
    #[error("variable \"{name}\" is not defined")]
    UnknownVariable { name: String },

    /// Built-in function invoked as an action
    #[error("action \"{action}\" is a built-in function and cannot be called directly")]
    NotCallable { action: String },

    /// Namespace already exists
    #[error("namespace \"{namespace}\" already exists")]
    NamespaceExists { namespace: String },

    // ==================== Validation ====================
    /// Malformed variable name
    #[error("invalid variable name \"{name}\": {reason}")]
    InvalidVariable { name: String, reason: String },

    /// Host value with no interpreter representation
    #[error("unsupported host value: {reason}")]
    UnsupportedHostValue { reason: String },

    /// Value of the wrong type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Built-in or action rejected its arguments
    #[error("invalid arguments to {function}: {reason}")]
    InvalidArguments { function: String, reason: String },

    /// Generic invalid input
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Integer arithmetic overflow
    #[error("overflow: {reason}")]
    Overflow { reason: String },

    // ==================== Access ====================
    /// Mutation attempted through a read-only handle
    #[error("cannot mutate state in a read-only context: {operation}")]
    ReadOnly { operation: String },

    /// Caller lacks a privilege or modifier requirement
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    // ==================== Database ====================
    /// Error reported by the database handle
    #[error("database error: {reason}")]
    Database { reason: String },

    // ==================== Cancellation ====================
    /// Ambient context cancelled
    #[error("operation cancelled")]
    Cancelled,

    // ==================== Consistency ====================
    /// Invariant of the underlying engine violated
    #[error("node bug: {reason}")]
    NodeBug { reason: String },

    /// Persisted extension unknown to this node
    #[error("the database has an extension in use that is unknown to the system: {name}")]
    UnknownExtension { name: String },

    /// Persisted metadata could not be interpreted
    #[error("initialization failed: {reason}")]
    Initialization { reason: String },

    /// Database handle does not report its access mode
    #[error("database handle does not report an access mode")]
    AccessModeUnavailable,

    /// Internal error (bug or invariant violation)
    #[error("internal error: {reason}")]
    Internal { reason: String },

    // ==================== Context ====================
    /// Failure while executing an action
    #[error("{namespace}.{action}: {source}")]
    Call {
        namespace: String,
        action: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(_)
            | Error::NoStatements { .. }
            | Error::NotCallable { .. }
            | Error::NamespaceExists { .. }
            | Error::InvalidVariable { .. }
            | Error::UnsupportedHostValue { .. }
            | Error::TypeMismatch { .. }
            | Error::InvalidArguments { .. }
            | Error::InvalidInput { .. }
            | Error::Overflow { .. } => ErrorKind::InvalidInput,
            Error::NamespaceNotFound { .. }
            | Error::UnknownAction { .. }
            | Error::UnknownVariable { .. } => ErrorKind::NotFound,
            Error::ReadOnly { .. } | Error::PermissionDenied { .. } => ErrorKind::Denied,
            Error::Database { .. } => ErrorKind::Database,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::NodeBug { .. }
            | Error::UnknownExtension { .. }
            | Error::Initialization { .. }
            | Error::AccessModeUnavailable
            | Error::Internal { .. } => ErrorKind::Internal,
            Error::Call { source, .. } => source.kind(),
        }
    }

    /// The innermost error, looking through any `Call` context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Call { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Attach namespace/action context. Already-wrapped errors for the same
    /// action are left as they are.
    pub fn in_call(self, namespace: &str, action: &str) -> Error {
        match &self {
            Error::Call {
                namespace: ns,
                action: act,
                ..
            } if ns == namespace && act == action => self,
            _ => Error::Call {
                namespace: namespace.to_string(),
                action: action.to_string(),
                source: Box::new(self),
            },
        }
    }

    /// Shorthand for [`Error::InvalidInput`]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Internal`]
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Database`]
    pub fn database(reason: impl Into<String>) -> Self {
        Error::Database {
            reason: reason.into(),
        }
    }
}
