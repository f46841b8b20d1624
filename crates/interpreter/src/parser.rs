//! Statement parser
//!
//! [`Parser`] is the seam the interpreter consumes; [`SqlParser`] is the
//! default implementation, built on `sqlparser` with the PostgreSQL dialect.
//! It recognizes four statement shapes:
//!
//! | Input | Node |
//! |-------|------|
//! | `SELECT expr [AS alias], ...` (no FROM/WHERE/...) | [`Statement::Select`] |
//! | `CALL [ns.]action(args)` | [`Statement::Call`] |
//! | `$var := expr` | [`Statement::Assign`] |
//! | any other query, INSERT, UPDATE, DELETE, DDL, GRANT/REVOKE | [`Statement::Sql`] |
//!
//! The dialect already reads `$name` as a placeholder. Before handing tokens
//! to it, two extensions are resolved on the token stream: `@name` becomes a
//! placeholder token, and a leading `$var :=` splits the statement into an
//! assignment whose right-hand side is parsed as a bare expression.
//!
//! Pass-through statements keep their `sqlparser` AST long enough to be
//! classified by variant and to have placeholders renumbered to `$1..$n`,
//! then they are rendered back to text.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use nsql_core::{DataType, ParseError, Value};
use sqlparser::ast::{
    BinaryOperator, Expr as SqlExpr, Function, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, ObjectNamePart, Query, SelectItem as SqlSelectItem, SetExpr, Spanned,
    Statement as SqlStatement, UnaryOperator, Value as SqlValue, ValueWithSpan, Visit, VisitMut,
    Visitor, VisitorMut,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser as AstParser, ParserError};
use sqlparser::tokenizer::{Location, Span, Token, TokenWithSpan, Tokenizer};

use crate::access::Privilege;
use crate::ast::{
    AssignStmt, BinaryOp, CallStmt, ContextVar, Expr, SelectItem, SelectStmt, SqlStmt,
    Statement, UnaryOp, VarRef,
};

static DIALECT: PostgreSqlDialect = PostgreSqlDialect {};

/// Turns statement text into statement nodes.
pub trait Parser: Send + Sync {
    /// Parse `text`, which may hold several `;`-separated statements.
    /// Text with no statements yields an empty list.
    fn parse(&self, text: &str) -> Result<Vec<Statement>, ParseError>;
}

/// Default parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlParser;

impl Parser for SqlParser {
    fn parse(&self, text: &str) -> Result<Vec<Statement>, ParseError> {
        let tokens = Tokenizer::new(&DIALECT, text)
            .tokenize_with_location()
            .map_err(|e| ParseError::new(e.message, e.location.line as usize, e.location.column as usize))?;

        split_statements(resolve_sigils(tokens)?)
            .into_iter()
            .map(parse_statement)
            .collect()
    }
}

// ============================================================================
// Token pre-scan
// ============================================================================

fn is_trivia(token: &TokenWithSpan) -> bool {
    matches!(token.token, Token::Whitespace(_))
}

fn position(at: Location) -> (usize, usize) {
    (at.line as usize, at.column as usize)
}

fn error_at(at: Location, message: impl Into<String>) -> ParseError {
    let (line, column) = position(at);
    ParseError::new(message, line, column)
}

/// Folds `@name` into a single placeholder token and normalizes `$name`
/// placeholders. Positional `$1` parameters are rejected here.
fn resolve_sigils(tokens: Vec<TokenWithSpan>) -> Result<Vec<TokenWithSpan>, ParseError> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();

    while let Some(current) = iter.next() {
        match &current.token {
            Token::AtSign => {
                let Some(TokenWithSpan { token: Token::Word(word), span }) = iter.peek() else {
                    out.push(current);
                    continue;
                };
                let var = ContextVar::from_name(&word.value).ok_or_else(|| {
                    error_at(current.span.start, format!("unknown contextual variable @{}", word.value))
                })?;
                let span = Span::new(current.span.start, span.end);
                iter.next();
                out.push(TokenWithSpan::new(
                    Token::Placeholder(format!("@{}", var.name())),
                    span,
                ));
            }
            Token::Placeholder(raw) if raw.starts_with('$') => {
                match raw[1..].chars().next() {
                    Some(c) if c.is_ascii_alphabetic() => {
                        let normalized = raw.to_lowercase();
                        out.push(TokenWithSpan::new(Token::Placeholder(normalized), current.span));
                    }
                    Some(c) if c.is_ascii_digit() => {
                        return Err(error_at(
                            current.span.start,
                            "positional parameters are not supported, use named variables",
                        ))
                    }
                    _ => return Err(error_at(current.span.start, format!("invalid variable {}", raw))),
                }
            }
            _ => out.push(current),
        }
    }
    Ok(out)
}

/// Splits on top-level `;`, dropping segments that hold only whitespace
/// and comments.
fn split_statements(tokens: Vec<TokenWithSpan>) -> Vec<Vec<TokenWithSpan>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token.token == Token::SemiColon {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(token);
        }
    }
    segments.push(current);
    segments.retain(|segment| !segment.iter().all(is_trivia));
    segments
}

/// `$var :=` at the head of a segment: the variable and the index of the
/// `:=` token.
fn assignment_head(tokens: &[TokenWithSpan]) -> Option<(String, usize)> {
    let mut significant = tokens.iter().enumerate().filter(|(_, t)| !is_trivia(t));
    let (_, first) = significant.next()?;
    let (at, second) = significant.next()?;
    match (&first.token, &second.token) {
        (Token::Placeholder(variable), Token::Assignment) if variable.starts_with('$') => {
            Some((variable.clone(), at))
        }
        _ => None,
    }
}

// ============================================================================
// Statements
// ============================================================================

fn ast_parser(tokens: Vec<TokenWithSpan>) -> AstParser<'static> {
    AstParser::new(&DIALECT).with_tokens_with_locations(tokens)
}

fn parser_error(err: ParserError, fallback: Location) -> ParseError {
    let message = match err {
        ParserError::TokenizerError(message) | ParserError::ParserError(message) => message,
        other => other.to_string(),
    };
    let (line, column) = reported_position(&message).unwrap_or_else(|| position(fallback));
    ParseError::new(message, line, column)
}

/// Position `sqlparser` appends to its messages (`... at Line: 2, Column: 3`).
fn reported_position(message: &str) -> Option<(usize, usize)> {
    let (_, tail) = message.rsplit_once("Line: ")?;
    let (line, rest) = tail.split_once(", Column: ")?;
    let column: String = rest.chars().take_while(char::is_ascii_digit).collect();
    Some((line.parse().ok()?, column.parse().ok()?))
}

fn expect_end(parser: &AstParser<'_>) -> Result<(), ParseError> {
    let next = parser.peek_token();
    if next.token == Token::EOF {
        Ok(())
    } else {
        Err(error_at(next.span.start, format!("unexpected '{}'", next.token)))
    }
}

fn parse_statement(tokens: Vec<TokenWithSpan>) -> Result<Statement, ParseError> {
    let Some(lead) = tokens.iter().find(|t| !is_trivia(t)).cloned() else {
        return Err(ParseError::new("expected a statement", 1, 1));
    };
    let lower = Lowering { start: lead.span.start };

    if let Some((variable, at)) = assignment_head(&tokens) {
        let mut parser = ast_parser(tokens[at + 1..].to_vec());
        let expr = parser
            .parse_expr()
            .map_err(|e| parser_error(e, lead.span.start))?;
        expect_end(&parser)?;
        let expr = lower.expr(&expr)?;
        return Ok(Statement::Assign(AssignStmt { variable, expr }));
    }

    let mut parser = ast_parser(tokens);
    let statement = parser
        .parse_statement()
        .map_err(|e| parser_error(e, lead.span.start))?;
    expect_end(&parser)?;

    if let SqlStatement::Query(query) = &statement {
        if let Some(items) = projection_only(query) {
            let items = items
                .iter()
                .map(|item| lower.select_item(item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Statement::Select(SelectStmt { items }));
        }
    }

    match statement {
        SqlStatement::Call(function) => {
            let (namespace, action, args) = lower.function(&function, Span::empty())?;
            Ok(Statement::Call(CallStmt {
                namespace,
                action,
                args,
            }))
        }
        other => pass_through(other, &lead),
    }
}

/// Projection of a `SELECT` with no other clause, which the interpreter
/// evaluates itself.
fn projection_only(query: &Query) -> Option<&[SqlSelectItem]> {
    if query.with.is_some()
        || query.order_by.is_some()
        || query.limit_clause.is_some()
        || query.fetch.is_some()
    {
        return None;
    }
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let bare = select.from.is_empty()
        && select.into.is_none()
        && select.selection.is_none()
        && select.having.is_none()
        && select.distinct.is_none()
        && matches!(&select.group_by, GroupByExpr::Expressions(exprs, _) if exprs.is_empty());
    bare.then_some(select.projection.as_slice())
}

fn pass_through(mut statement: SqlStatement, lead: &TokenWithSpan) -> Result<Statement, ParseError> {
    let privileges = classify(&statement).ok_or_else(|| {
        error_at(lead.span.start, format!("unsupported statement '{}'", lead.token))
    })?;

    let mut binder = PlaceholderBinder::default();
    if let ControlFlow::Break(err) = VisitMut::visit(&mut statement, &mut binder) {
        return Err(err);
    }

    let mutating = privileges.iter().any(|p| *p != Privilege::Select);
    Ok(Statement::Sql(SqlStmt {
        sql: statement.to_string(),
        params: binder.params,
        mutating,
        privileges,
    }))
}

// ============================================================================
// Classification
// ============================================================================

/// Privileges a pass-through statement needs, or `None` when the statement
/// kind is not forwarded at all.
fn classify(statement: &SqlStatement) -> Option<Vec<Privilege>> {
    let forwarded = matches!(
        statement,
        SqlStatement::Query { .. }
            | SqlStatement::Insert { .. }
            | SqlStatement::Update { .. }
            | SqlStatement::Delete { .. }
            | SqlStatement::Truncate { .. }
            | SqlStatement::CreateTable { .. }
            | SqlStatement::CreateView { .. }
            | SqlStatement::CreateIndex { .. }
            | SqlStatement::CreateSchema { .. }
            | SqlStatement::Drop { .. }
            | SqlStatement::AlterTable { .. }
            | SqlStatement::Grant { .. }
            | SqlStatement::Revoke { .. }
    );
    if !forwarded {
        return None;
    }

    let mut classifier = Classifier::default();
    let _ = Visit::visit(statement, &mut classifier);
    Some(classifier.privileges.into_iter().collect())
}

/// Collects privileges from every statement and query node, so writes
/// nested in a `WITH` and `SELECT ... INTO` are seen.
#[derive(Default)]
struct Classifier {
    privileges: BTreeSet<Privilege>,
}

impl Classifier {
    fn set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                self.privileges.insert(Privilege::Select);
                if select.into.is_some() {
                    self.privileges.insert(Privilege::Create);
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left);
                self.set_expr(right);
            }
            SetExpr::Table(_) => {
                self.privileges.insert(Privilege::Select);
            }
            _ => {}
        }
    }
}

impl Visitor for Classifier {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &SqlStatement) -> ControlFlow<()> {
        let privilege = match statement {
            SqlStatement::Insert { .. } => Privilege::Insert,
            SqlStatement::Update { .. } => Privilege::Update,
            SqlStatement::Delete { .. } | SqlStatement::Truncate { .. } => Privilege::Delete,
            SqlStatement::CreateTable { .. }
            | SqlStatement::CreateView { .. }
            | SqlStatement::CreateIndex { .. }
            | SqlStatement::CreateSchema { .. } => Privilege::Create,
            SqlStatement::Drop { .. } => Privilege::Drop,
            SqlStatement::AlterTable { .. } => Privilege::Alter,
            SqlStatement::Grant { .. } | SqlStatement::Revoke { .. } => Privilege::Roles,
            _ => return ControlFlow::Continue(()),
        };
        self.privileges.insert(privilege);
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        self.set_expr(&query.body);
        ControlFlow::Continue(())
    }
}

// ============================================================================
// Placeholders
// ============================================================================

fn var_ref(raw: &str, at: Location) -> Result<VarRef, ParseError> {
    if let Some(name) = raw.strip_prefix('@') {
        return ContextVar::from_name(name)
            .map(VarRef::Context)
            .ok_or_else(|| error_at(at, format!("unknown contextual variable {}", raw)));
    }
    if raw.starts_with('$') {
        return Ok(VarRef::Variable(raw.to_string()));
    }
    Err(error_at(at, format!("unsupported placeholder {}", raw)))
}

/// Rewrites `$name` / `@name` placeholders to `$1..$n` in order of first
/// appearance. Repeated references share an index.
#[derive(Default)]
struct PlaceholderBinder {
    params: Vec<VarRef>,
}

impl VisitorMut for PlaceholderBinder {
    type Break = ParseError;

    fn post_visit_expr(&mut self, expr: &mut SqlExpr) -> ControlFlow<ParseError> {
        let SqlExpr::Value(ValueWithSpan {
            value: SqlValue::Placeholder(raw),
            span,
        }) = expr
        else {
            return ControlFlow::Continue(());
        };

        let var = match var_ref(raw, span.start) {
            Ok(var) => var,
            Err(err) => return ControlFlow::Break(err),
        };
        let index = match self.params.iter().position(|p| *p == var) {
            Some(i) => i,
            None => {
                self.params.push(var);
                self.params.len() - 1
            }
        };
        *raw = format!("${}", index + 1);
        ControlFlow::Continue(())
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Lowers `sqlparser` expressions into interpreter expressions. Nodes
/// without a span report the statement start.
struct Lowering {
    start: Location,
}

impl Lowering {
    fn error(&self, span: Span, message: impl Into<String>) -> ParseError {
        let at = if span.start.line == 0 { self.start } else { span.start };
        error_at(at, message)
    }

    fn select_item(&self, item: &SqlSelectItem) -> Result<SelectItem, ParseError> {
        match item {
            SqlSelectItem::UnnamedExpr(expr) => Ok(SelectItem {
                expr: self.expr(expr)?,
                alias: None,
            }),
            SqlSelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem {
                expr: self.expr(expr)?,
                alias: Some(alias.value.to_lowercase()),
            }),
            _ => Err(self.error(Span::empty(), "'*' requires a FROM clause")),
        }
    }

    fn expr(&self, expr: &SqlExpr) -> Result<Expr, ParseError> {
        match expr {
            SqlExpr::Value(ValueWithSpan { value, span }) => self.value(value, *span),
            SqlExpr::Nested(inner) => self.expr(inner),
            SqlExpr::UnaryOp {
                op: UnaryOperator::Minus,
                expr: inner,
            } => {
                // fold so that i64::MIN is representable
                if let SqlExpr::Value(ValueWithSpan {
                    value: SqlValue::Number(digits, _),
                    span,
                }) = inner.as_ref()
                {
                    return self.integer(&format!("-{}", digits), *span);
                }
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.expr(inner)?),
                })
            }
            SqlExpr::UnaryOp {
                op: UnaryOperator::Plus,
                expr: inner,
            } => self.expr(inner),
            SqlExpr::UnaryOp {
                op: UnaryOperator::Not,
                expr: inner,
            } => Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(self.expr(inner)?),
            }),
            SqlExpr::BinaryOp { left, op, right } => {
                let op = binary_op(op)
                    .ok_or_else(|| self.error(expr.span(), format!("unsupported operator {}", op)))?;
                Ok(Expr::Binary {
                    left: Box::new(self.expr(left)?),
                    op,
                    right: Box::new(self.expr(right)?),
                })
            }
            SqlExpr::Cast {
                expr: inner,
                data_type,
                ..
            } => {
                let to = data_type
                    .to_string()
                    .parse::<DataType>()
                    .map_err(|e| self.error(expr.span(), e.to_string()))?;
                Ok(Expr::Cast {
                    expr: Box::new(self.expr(inner)?),
                    to,
                })
            }
            SqlExpr::Function(function) => {
                let (namespace, name, args) = self.function(function, expr.span())?;
                Ok(Expr::Call {
                    namespace,
                    name,
                    args,
                })
            }
            // built-ins the dialect parses with dedicated syntax
            SqlExpr::Substring {
                expr: inner,
                substring_from,
                substring_for,
                ..
            } => {
                let mut args = vec![self.expr(inner)?];
                for extra in [substring_from, substring_for].into_iter().flatten() {
                    args.push(self.expr(extra)?);
                }
                Ok(builtin("substring", args))
            }
            SqlExpr::Trim {
                expr: inner,
                trim_where: None,
                trim_what: None,
                trim_characters: None,
                ..
            } => Ok(builtin("trim", vec![self.expr(inner)?])),
            SqlExpr::Identifier(ident) => Err(self.error(
                ident.span,
                format!("column reference '{}' requires a FROM clause", ident.value.to_lowercase()),
            )),
            SqlExpr::CompoundIdentifier(parts) => {
                let name: Vec<String> = parts.iter().map(|p| p.value.to_lowercase()).collect();
                Err(self.error(
                    expr.span(),
                    format!("column reference '{}' requires a FROM clause", name.join(".")),
                ))
            }
            other => Err(self.error(other.span(), format!("unsupported expression '{}'", other))),
        }
    }

    fn value(&self, value: &SqlValue, span: Span) -> Result<Expr, ParseError> {
        match value {
            SqlValue::Number(digits, _) => self.integer(digits, span),
            SqlValue::SingleQuotedString(s) | SqlValue::EscapedStringLiteral(s) => {
                Ok(Expr::Literal(Value::text(s.clone())))
            }
            SqlValue::Boolean(b) => Ok(Expr::Literal(Value::boolean(*b))),
            SqlValue::Null => Ok(Expr::Literal(Value::null(DataType::NULL))),
            SqlValue::Placeholder(raw) => {
                let at = if span.start.line == 0 { self.start } else { span.start };
                Ok(Expr::Var(var_ref(raw, at)?))
            }
            other => Err(self.error(span, format!("unsupported literal {}", other))),
        }
    }

    fn integer(&self, digits: &str, span: Span) -> Result<Expr, ParseError> {
        if digits.contains(['.', 'e', 'E']) {
            return Err(self.error(span, format!("decimal literal {} is not supported", digits)));
        }
        digits
            .parse::<i64>()
            .map(|n| Expr::Literal(Value::int8(n)))
            .map_err(|_| self.error(span, format!("integer literal {} is out of range", digits)))
    }

    /// `[namespace.]name(args)`, names lower-cased.
    fn function(
        &self,
        function: &Function,
        span: Span,
    ) -> Result<(Option<String>, String, Vec<Expr>), ParseError> {
        let mut parts = Vec::with_capacity(function.name.0.len());
        for part in &function.name.0 {
            let ObjectNamePart::Identifier(ident) = part else {
                return Err(self.error(span, format!("invalid name {}", function.name)));
            };
            parts.push(ident.value.to_lowercase());
        }
        let (namespace, name) = match parts.as_slice() {
            [name] => (None, name.clone()),
            [namespace, name] => (Some(namespace.clone()), name.clone()),
            _ => return Err(self.error(span, format!("invalid name {}", function.name))),
        };

        if function.over.is_some() || function.filter.is_some() {
            return Err(self.error(span, format!("{}: window and filter clauses are not supported", name)));
        }

        let args = match &function.args {
            FunctionArguments::None => Vec::new(),
            FunctionArguments::List(list) => {
                if list.duplicate_treatment.is_some() || !list.clauses.is_empty() {
                    return Err(self.error(span, format!("{}: unsupported argument clause", name)));
                }
                list.args
                    .iter()
                    .map(|arg| match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => self.expr(expr),
                        _ => Err(self.error(span, format!("{}: only positional arguments are supported", name))),
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            FunctionArguments::Subquery(_) => {
                return Err(self.error(span, format!("{}: subquery arguments are not supported", name)))
            }
        };
        Ok((namespace, name, args))
    }
}

fn builtin(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        namespace: None,
        name: name.to_string(),
        args,
    }
}

fn binary_op(op: &BinaryOperator) -> Option<BinaryOp> {
    Some(match op {
        BinaryOperator::Plus => BinaryOp::Add,
        BinaryOperator::Minus => BinaryOp::Sub,
        BinaryOperator::Multiply => BinaryOp::Mul,
        BinaryOperator::Divide => BinaryOp::Div,
        BinaryOperator::Modulo => BinaryOp::Mod,
        BinaryOperator::StringConcat => BinaryOp::Concat,
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::NotEq => BinaryOp::NotEq,
        BinaryOperator::Lt => BinaryOp::Lt,
        BinaryOperator::LtEq => BinaryOp::LtEq,
        BinaryOperator::Gt => BinaryOp::Gt,
        BinaryOperator::GtEq => BinaryOp::GtEq,
        BinaryOperator::And => BinaryOp::And,
        BinaryOperator::Or => BinaryOp::Or,
        _ => return None,
    })
}
