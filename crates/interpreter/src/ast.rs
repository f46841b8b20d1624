//! Statement nodes
//!
//! The parser turns statement text into a list of [`Statement`]s. Statements
//! are consumed through [`StatementVisitor`], which is how the planner turns
//! each node into an executable closure.

use nsql_core::{DataType, Value};

use crate::access::Privilege;

/// Contextual variable (`@name`), read from the [`EngineContext`](crate::EngineContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextVar {
    /// `@caller`
    Caller,
    /// `@signer`
    Signer,
    /// `@height`
    Height,
    /// `@txid`
    TxId,
}

impl ContextVar {
    /// Resolve a name without its sigil, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "caller" => Some(ContextVar::Caller),
            "signer" => Some(ContextVar::Signer),
            "height" => Some(ContextVar::Height),
            "txid" => Some(ContextVar::TxId),
            _ => None,
        }
    }

    /// Name without sigil
    pub fn name(&self) -> &'static str {
        match self {
            ContextVar::Caller => "caller",
            ContextVar::Signer => "signer",
            ContextVar::Height => "height",
            ContextVar::TxId => "txid",
        }
    }
}

/// Reference to a value bound outside a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarRef {
    /// `$name` (stored normalized, sigil included)
    Variable(String),
    /// `@name`
    Context(ContextVar),
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `NOT x`
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `||`
    Concat,
    /// `=`
    Eq,
    /// `<>` / `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `AND`
    And,
    /// `OR`
    Or,
}

impl BinaryOp {
    /// SQL spelling
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "||",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// Expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant
    Literal(Value),
    /// Contextual or user variable
    Var(VarRef),
    /// Unary operation
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Binary operation
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `expr::type`
    Cast { expr: Box<Expr>, to: DataType },
    /// `[namespace.]name(args...)`
    Call {
        namespace: Option<String>,
        name: String,
        args: Vec<Expr>,
    },
}

/// One projected expression of a `SELECT`
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    /// Projected expression
    pub expr: Expr,
    /// `AS alias`
    pub alias: Option<String>,
}

/// `SELECT expr [AS alias], ...` without a FROM clause
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    /// Projection list
    pub items: Vec<SelectItem>,
}

/// SQL forwarded to the database handle
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStmt {
    /// Statement text with variables rewritten to `$1..$n`
    pub sql: String,
    /// Values to bind, in positional order
    pub params: Vec<VarRef>,
    /// Whether the statement writes
    pub mutating: bool,
    /// Privileges the caller needs on the current namespace
    pub privileges: Vec<Privilege>,
}

/// `CALL [namespace.]action(args...)`
#[derive(Debug, Clone, PartialEq)]
pub struct CallStmt {
    /// Target namespace; the current one when absent
    pub namespace: Option<String>,
    /// Action name
    pub action: String,
    /// Arguments
    pub args: Vec<Expr>,
}

/// `$variable := expr`
#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    /// Normalized variable name, sigil included
    pub variable: String,
    /// Assigned expression
    pub expr: Expr,
}

/// Statement node
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Expression-only select
    Select(SelectStmt),
    /// Pass-through SQL
    Sql(SqlStmt),
    /// Action call
    Call(CallStmt),
    /// Variable assignment
    Assign(AssignStmt),
}

/// Visitor over statement nodes.
pub trait StatementVisitor {
    /// Result of visiting one node
    type Output;

    /// Visit an expression-only select
    fn visit_select(&mut self, stmt: &SelectStmt) -> Self::Output;
    /// Visit pass-through SQL
    fn visit_sql(&mut self, stmt: &SqlStmt) -> Self::Output;
    /// Visit an action call
    fn visit_call(&mut self, stmt: &CallStmt) -> Self::Output;
    /// Visit an assignment
    fn visit_assign(&mut self, stmt: &AssignStmt) -> Self::Output;
}

impl Statement {
    /// Dispatch to the matching visitor method.
    pub fn accept<V: StatementVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Statement::Select(s) => visitor.visit_select(s),
            Statement::Sql(s) => visitor.visit_sql(s),
            Statement::Call(s) => visitor.visit_call(s),
            Statement::Assign(s) => visitor.visit_assign(s),
        }
    }
}
