//! Statement planning and expression evaluation
//!
//! The planner visits each statement node once and produces a closure that
//! runs it against an [`ExecutionContext`]. Action bodies are planned when
//! the action is compiled; `execute` plans its statements per call.
//!
//! Expressions are evaluated natively. Operators follow SQL semantics for
//! the supported types: integer arithmetic is checked, NULL propagates
//! through arithmetic and comparisons, and `AND`/`OR` use three-valued
//! logic. Function calls resolve through the current namespace's executable
//! table at run time, so overrides deployed after planning are honored.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use nsql_core::{DataType, Error, RawValue, Result, Row, Value};

use crate::ast::{
    AssignStmt, BinaryOp, CallStmt, Expr, SelectItem, SelectStmt, SqlStmt, Statement,
    StatementVisitor, UnaryOp, VarRef,
};
use crate::db::QueryResult;
use crate::exec_ctx::ExecutionContext;
use crate::executable::RowSink;

/// Planned statement.
pub(crate) type StmtFn =
    Box<dyn Fn(&mut ExecutionContext<'_>, &mut RowSink<'_>) -> Result<()> + Send + Sync>;

fn stmt_fn<F>(f: F) -> StmtFn
where
    F: Fn(&mut ExecutionContext<'_>, &mut RowSink<'_>) -> Result<()> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Plan every statement, preserving order.
pub(crate) fn plan(statements: &[Statement]) -> Vec<StmtFn> {
    let mut planner = Planner;
    statements.iter().map(|s| s.accept(&mut planner)).collect()
}

/// Run planned statements in order, stopping at the first failure.
pub(crate) fn run_statements(
    ctx: &mut ExecutionContext<'_>,
    statements: &[StmtFn],
    sink: &mut RowSink<'_>,
) -> Result<()> {
    for statement in statements {
        ctx.check_cancelled()?;
        statement(ctx, sink)?;
    }
    Ok(())
}

struct Planner;

impl StatementVisitor for Planner {
    type Output = StmtFn;

    fn visit_select(&mut self, stmt: &SelectStmt) -> StmtFn {
        let items = stmt.items.clone();
        let columns = column_names(&items);
        stmt_fn(move |ctx, sink| {
            let mut values = Vec::with_capacity(items.len());
            for item in &items {
                values.push(eval(ctx, &item.expr)?);
            }
            sink(Row::new(columns.clone(), values)?)
        })
    }

    fn visit_sql(&mut self, stmt: &SqlStmt) -> StmtFn {
        let stmt = stmt.clone();
        stmt_fn(move |ctx, sink| {
            if stmt.mutating {
                ctx.require_mutation("statement modifies data")?;
            }
            if ctx.scope.is_top_level() {
                let access = ctx.interpreter.access.read();
                let namespace = ctx.scope.namespace();
                if let Some(missing) = stmt
                    .privileges
                    .iter()
                    .find(|p| !access.has_privilege(ctx.caller(), Some(namespace), **p))
                {
                    return Err(Error::PermissionDenied {
                        reason: format!(
                            "caller {} lacks the {} privilege on namespace {}",
                            ctx.caller(),
                            missing,
                            namespace
                        ),
                    });
                }
            }

            let params = stmt
                .params
                .iter()
                .map(|p| ctx.resolve_var(p))
                .collect::<Result<Vec<_>>>()?;

            let QueryResult { columns, rows } = ctx.db.query(&stmt.sql, &params)?;
            let columns = unique_names(columns);
            for values in rows {
                sink(Row::new(columns.clone(), values)?)?;
            }
            Ok(())
        })
    }

    fn visit_call(&mut self, stmt: &CallStmt) -> StmtFn {
        let stmt = stmt.clone();
        stmt_fn(move |ctx, sink| {
            let args = eval_all(ctx, &stmt.args)?;
            let namespace = stmt
                .namespace
                .clone()
                .unwrap_or_else(|| ctx.scope.namespace().to_string());
            let interpreter = Arc::clone(&ctx.interpreter);
            interpreter.invoke(ctx, &namespace, &stmt.action, &args, sink)
        })
    }

    fn visit_assign(&mut self, stmt: &AssignStmt) -> StmtFn {
        let stmt = stmt.clone();
        stmt_fn(move |ctx, _sink| {
            let value = eval(ctx, &stmt.expr)?;
            ctx.scope.set(&stmt.variable, value)
        })
    }
}

/// Output column names: the alias, else a name derived from the
/// expression.
fn column_names(items: &[SelectItem]) -> Vec<String> {
    unique_names(items.iter().map(|item| {
        item.alias
            .clone()
            .unwrap_or_else(|| default_column_name(&item.expr))
    }))
}

/// Repeated names get a numeric suffix (`id`, `id_1`, ...) so rows stay
/// unique. A suffix never reuses a name already taken.
fn unique_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    names
        .into_iter()
        .map(|base| {
            let mut name = base.clone();
            let mut n = 0;
            while taken.contains(&name) {
                n += 1;
                name = format!("{}_{}", base, n);
            }
            taken.insert(name.clone());
            name
        })
        .collect()
}

fn default_column_name(expr: &Expr) -> String {
    match expr {
        Expr::Call { name, .. } => name.clone(),
        Expr::Var(VarRef::Variable(name)) => name.trim_start_matches('$').to_string(),
        Expr::Var(VarRef::Context(cv)) => cv.name().to_string(),
        Expr::Cast { expr, .. } => default_column_name(expr),
        _ => "?column?".to_string(),
    }
}

// ============================================================================
// Expression evaluation
// ============================================================================

fn eval_all(ctx: &mut ExecutionContext<'_>, exprs: &[Expr]) -> Result<Vec<Value>> {
    exprs.iter().map(|e| eval(ctx, e)).collect()
}

pub(crate) fn eval(ctx: &mut ExecutionContext<'_>, expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(var) => ctx.resolve_var(var),
        Expr::Unary { op, expr } => {
            let value = eval(ctx, expr)?;
            eval_unary(*op, value)
        }
        Expr::Binary { left, op, right } => {
            let l = eval(ctx, left)?;
            let r = eval(ctx, right)?;
            eval_binary(*op, l, r)
        }
        Expr::Cast { expr, to } => eval(ctx, expr)?.cast(*to),
        Expr::Call {
            namespace,
            name,
            args,
        } => {
            let args = eval_all(ctx, args)?;
            let namespace = namespace
                .clone()
                .unwrap_or_else(|| ctx.scope.namespace().to_string());
            let exec = ctx.interpreter.resolve(&namespace, name)?;

            let mut rows: Vec<Row> = Vec::new();
            exec.invoke(ctx, &args, &mut |row: Row| {
                rows.push(row);
                Ok(())
            })
            .map_err(|e| e.in_call(&namespace, name))?;
            scalar_result(name, rows)
        }
    }
}

/// Reduce the rows of a call used as an expression to one value.
fn scalar_result(name: &str, mut rows: Vec<Row>) -> Result<Value> {
    match rows.len() {
        0 => Ok(Value::null(DataType::NULL)),
        1 => {
            let row = rows.remove(0);
            if row.len() != 1 {
                return Err(Error::invalid_input(format!(
                    "{} returns {} columns where a single value is expected",
                    name,
                    row.len()
                )));
            }
            Ok(row.into_values().remove(0))
        }
        n => Err(Error::invalid_input(format!(
            "{} returns {} rows where a single value is expected",
            name, n
        ))),
    }
}

fn type_mismatch(expected: DataType, actual: DataType) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Check that `value` is of `expected` type or an untyped NULL.
fn expect_type(value: &Value, expected: DataType) -> Result<()> {
    if expected.accepts(&value.data_type()) {
        Ok(())
    } else {
        Err(type_mismatch(expected, value.data_type()))
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value> {
    match op {
        UnaryOp::Neg => {
            expect_type(&value, DataType::INT8)?;
            match value.as_int8() {
                None => Ok(Value::null(DataType::INT8)),
                Some(i) => i.checked_neg().map(Value::int8).ok_or_else(|| Error::Overflow {
                    reason: format!("-({})", i),
                }),
            }
        }
        UnaryOp::Not => {
            expect_type(&value, DataType::BOOL)?;
            Ok(match value.as_bool() {
                None => Value::null(DataType::BOOL),
                Some(b) => Value::boolean(!b),
            })
        }
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            expect_type(&l, DataType::BOOL)?;
            expect_type(&r, DataType::BOOL)?;
            let (a, b) = (l.as_bool(), r.as_bool());
            let dominant = op == BinaryOp::Or;
            Ok(if a == Some(dominant) || b == Some(dominant) {
                Value::boolean(dominant)
            } else if a.is_none() || b.is_none() {
                Value::null(DataType::BOOL)
            } else {
                Value::boolean(!dominant)
            })
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            expect_type(&l, DataType::INT8)?;
            expect_type(&r, DataType::INT8)?;
            let (Some(a), Some(b)) = (l.as_int8(), r.as_int8()) else {
                return Ok(Value::null(DataType::INT8));
            };
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
                return Err(Error::invalid_input("division by zero"));
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Value::int8).ok_or_else(|| Error::Overflow {
                reason: format!("{} {} {}", a, op.symbol(), b),
            })
        }
        BinaryOp::Concat => concat(l, r),
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => compare(op, l, r),
    }
}

fn concat(l: Value, r: Value) -> Result<Value> {
    let array_type = [l.data_type(), r.data_type()]
        .into_iter()
        .find(DataType::is_array);

    if let Some(array_type) = array_type {
        expect_type(&l, array_type)?;
        expect_type(&r, array_type)?;
        let mut items = Vec::new();
        for side in [l, r] {
            if let RawValue::Array(raws) = side.into_raw() {
                items.extend(raws);
            }
        }
        return Value::from_parts(array_type, RawValue::Array(items));
    }

    if l.is_null() || r.is_null() {
        return Ok(Value::null(DataType::TEXT));
    }
    let (l, r) = (l.cast(DataType::TEXT)?, r.cast(DataType::TEXT)?);
    Ok(Value::text(format!(
        "{}{}",
        l.as_text().unwrap_or_default(),
        r.as_text().unwrap_or_default()
    )))
}

fn compare(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    if !l.data_type().accepts(&r.data_type()) {
        return Err(type_mismatch(l.data_type(), r.data_type()));
    }
    if l.is_null() || r.is_null() {
        return Ok(Value::null(DataType::BOOL));
    }

    let result = match op {
        BinaryOp::Eq => l.raw() == r.raw(),
        BinaryOp::NotEq => l.raw() != r.raw(),
        _ => {
            let ordering = order_raw(l.raw(), r.raw()).ok_or_else(|| {
                Error::invalid_input(format!("values of type {} cannot be ordered", l.data_type()))
            })?;
            match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
    };
    Ok(Value::boolean(result))
}

fn order_raw(l: &RawValue, r: &RawValue) -> Option<Ordering> {
    match (l, r) {
        (RawValue::Int8(a), RawValue::Int8(b)) => Some(a.cmp(b)),
        (RawValue::Text(a), RawValue::Text(b)) => Some(a.cmp(b)),
        (RawValue::Bool(a), RawValue::Bool(b)) => Some(a.cmp(b)),
        (RawValue::Bytea(a), RawValue::Bytea(b)) => Some(a.cmp(b)),
        (RawValue::Uuid(a), RawValue::Uuid(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
