//! Database handle contract
//!
//! The interpreter never talks to storage directly. Every query, including
//! the catalog bootstrap and every scalar built-in, goes through a
//! [`Database`] handle supplied by the caller. The handle also declares its
//! [`AccessMode`], which decides both the lock the interpreter takes and
//! whether executed code may mutate state.

use nsql_core::{Error, Result, Value};

/// Declared capability of a database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Reads only; many may run concurrently
    ReadOnly,
    /// Reads and writes; runs alone
    ReadWrite,
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Column names of every row
    pub columns: Vec<String>,
    /// Row values, each the same length as `columns`
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Empty result (statements that return nothing)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were returned
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A handle to the node database, usually scoped to one transaction.
///
/// Implementations must be usable from several threads at once when they
/// report [`AccessMode::ReadOnly`].
pub trait Database: Send + Sync {
    /// The handle's access mode. `None` means the handle cannot say, which
    /// the interpreter treats as a defect in the surrounding system.
    fn access_mode(&self) -> Option<AccessMode>;

    /// Run a parameterized statement. Parameters are referenced positionally
    /// as `$1..$n`.
    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;
}

/// Access mode of `db`, failing on handles that do not report one.
pub(crate) fn require_access_mode(db: &dyn Database) -> Result<AccessMode> {
    db.access_mode().ok_or(Error::AccessModeUnavailable)
}
