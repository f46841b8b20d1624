//! Built-in scalar functions
//!
//! Each built-in is described by a [`ScalarFunctionDefinition`]: an argument
//! validator that computes the return type, and a formatter that renders the
//! call as a parameterized SQL expression. The executable built from a
//! definition asks the database to evaluate `SELECT <expr>;` with the
//! arguments bound as `$1..$n`, so every node computes results with the same
//! engine the data lives in.
//!
//! The table is built once per process and shared. Namespaces receive a copy
//! of the map (the executables themselves are shared) which user actions and
//! extension methods may then override.
//!
//! `notice` is the one built-in that never reaches the database: it appends
//! its message to the call's log buffer.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

use nsql_core::{DataType, Error, Result, Row, Value};

use crate::executable::{Executable, ExecutableKind};

/// Name of the logging built-in
pub const NOTICE: &str = "notice";

/// Descriptor of a scalar built-in.
pub(crate) struct ScalarFunctionDefinition {
    pub(crate) name: &'static str,
    /// Checks argument types and returns the result type
    pub(crate) validate_args: fn(&[DataType]) -> Result<DataType>,
    /// Renders the call given its positional placeholders
    pub(crate) pg_format: fn(&[String]) -> Result<String>,
}

// ============================================================================
// Argument validation helpers
// ============================================================================

fn invalid(function: &str, reason: impl Into<String>) -> Error {
    Error::InvalidArguments {
        function: function.to_string(),
        reason: reason.into(),
    }
}

fn arity(function: &str, args: &[DataType], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(invalid(
            function,
            format!("expected {} arguments, got {}", expected, args.len()),
        ));
    }
    Ok(())
}

fn expect_arg(function: &str, args: &[DataType], index: usize, expected: DataType) -> Result<()> {
    let actual = args[index];
    if actual.is_null() || actual == expected {
        Ok(())
    } else {
        Err(invalid(
            function,
            format!("argument {} must be {}, got {}", index + 1, expected, actual),
        ))
    }
}

/// Common type of `args`, ignoring untyped NULLs; `text` if all are NULL.
fn common_type(function: &str, args: &[DataType]) -> Result<DataType> {
    let mut common: Option<DataType> = None;
    for (i, t) in args.iter().enumerate() {
        if t.is_null() {
            continue;
        }
        match common {
            None => common = Some(*t),
            Some(c) if c != *t => {
                return Err(invalid(
                    function,
                    format!("argument {} has type {}, expected {}", i + 1, t, c),
                ))
            }
            Some(_) => {}
        }
    }
    Ok(common.unwrap_or(DataType::TEXT))
}

fn call_expr(function: &str, params: &[String]) -> String {
    format!("{}({})", function, params.join(", "))
}

// ============================================================================
// Definitions
// ============================================================================

macro_rules! unary_text {
    ($name:literal, $ret:expr) => {
        ScalarFunctionDefinition {
            name: $name,
            validate_args: |args| {
                arity($name, args, 1, 1)?;
                expect_arg($name, args, 0, DataType::TEXT)?;
                Ok($ret)
            },
            pg_format: |params| Ok(call_expr($name, params)),
        }
    };
}

static SCALAR_FUNCTIONS: Lazy<Vec<ScalarFunctionDefinition>> = Lazy::new(|| {
    vec![
        ScalarFunctionDefinition {
            name: "abs",
            validate_args: |args| {
                arity("abs", args, 1, 1)?;
                expect_arg("abs", args, 0, DataType::INT8)?;
                Ok(DataType::INT8)
            },
            pg_format: |params| Ok(call_expr("abs", params)),
        },
        unary_text!("upper", DataType::TEXT),
        unary_text!("lower", DataType::TEXT),
        unary_text!("trim", DataType::TEXT),
        unary_text!("length", DataType::INT8),
        unary_text!("octet_length", DataType::INT8),
        ScalarFunctionDefinition {
            name: "substring",
            validate_args: |args| {
                arity("substring", args, 2, 3)?;
                expect_arg("substring", args, 0, DataType::TEXT)?;
                expect_arg("substring", args, 1, DataType::INT8)?;
                if args.len() == 3 {
                    expect_arg("substring", args, 2, DataType::INT8)?;
                }
                Ok(DataType::TEXT)
            },
            pg_format: |params| match params {
                [s, from] => Ok(format!("substring({} FROM {})", s, from)),
                [s, from, len] => Ok(format!("substring({} FROM {} FOR {})", s, from, len)),
                _ => Err(invalid("substring", "expected 2 or 3 arguments")),
            },
        },
        ScalarFunctionDefinition {
            name: "replace",
            validate_args: |args| {
                arity("replace", args, 3, 3)?;
                for i in 0..3 {
                    expect_arg("replace", args, i, DataType::TEXT)?;
                }
                Ok(DataType::TEXT)
            },
            pg_format: |params| Ok(call_expr("replace", params)),
        },
        ScalarFunctionDefinition {
            name: "starts_with",
            validate_args: |args| {
                arity("starts_with", args, 2, 2)?;
                expect_arg("starts_with", args, 0, DataType::TEXT)?;
                expect_arg("starts_with", args, 1, DataType::TEXT)?;
                Ok(DataType::BOOL)
            },
            pg_format: |params| Ok(call_expr("starts_with", params)),
        },
        ScalarFunctionDefinition {
            name: "format",
            validate_args: |args| {
                arity("format", args, 1, usize::MAX)?;
                expect_arg("format", args, 0, DataType::TEXT)?;
                Ok(DataType::TEXT)
            },
            pg_format: |params| Ok(call_expr("format", params)),
        },
        ScalarFunctionDefinition {
            name: "coalesce",
            validate_args: |args| {
                arity("coalesce", args, 1, usize::MAX)?;
                common_type("coalesce", args)
            },
            pg_format: |params| Ok(call_expr("coalesce", params)),
        },
        ScalarFunctionDefinition {
            name: "nullif",
            validate_args: |args| {
                arity("nullif", args, 2, 2)?;
                common_type("nullif", args)
            },
            pg_format: |params| Ok(call_expr("nullif", params)),
        },
        ScalarFunctionDefinition {
            name: "greatest",
            validate_args: |args| {
                arity("greatest", args, 1, usize::MAX)?;
                common_type("greatest", args)
            },
            pg_format: |params| Ok(call_expr("greatest", params)),
        },
        ScalarFunctionDefinition {
            name: "least",
            validate_args: |args| {
                arity("least", args, 1, usize::MAX)?;
                common_type("least", args)
            },
            pg_format: |params| Ok(call_expr("least", params)),
        },
        ScalarFunctionDefinition {
            name: "array_length",
            validate_args: |args| {
                arity("array_length", args, 1, 1)?;
                if !args[0].is_null() && !args[0].is_array() {
                    return Err(invalid("array_length", format!("expected an array, got {}", args[0])));
                }
                Ok(DataType::INT8)
            },
            pg_format: |params| Ok(format!("array_length({}, 1)", params[0])),
        },
        ScalarFunctionDefinition {
            name: "encode",
            validate_args: |args| {
                arity("encode", args, 2, 2)?;
                expect_arg("encode", args, 0, DataType::BYTEA)?;
                expect_arg("encode", args, 1, DataType::TEXT)?;
                Ok(DataType::TEXT)
            },
            pg_format: |params| Ok(call_expr("encode", params)),
        },
        ScalarFunctionDefinition {
            name: "decode",
            validate_args: |args| {
                arity("decode", args, 2, 2)?;
                expect_arg("decode", args, 0, DataType::TEXT)?;
                expect_arg("decode", args, 1, DataType::TEXT)?;
                Ok(DataType::BYTEA)
            },
            pg_format: |params| Ok(call_expr("decode", params)),
        },
    ]
});

// ============================================================================
// Executables
// ============================================================================

fn scalar_executable(def: &'static ScalarFunctionDefinition) -> Executable {
    Executable::new(
        def.name,
        ExecutableKind::Function,
        move |ctx, args, sink| {
            let params: Vec<String> = (1..=args.len()).map(|i| format!("${}", i)).collect();
            let arg_types: Vec<DataType> = args.iter().map(Value::data_type).collect();

            let return_type = (def.validate_args)(&arg_types)?;
            let expr = (def.pg_format)(&params)?;

            let result = ctx.db.query(&format!("SELECT {};", expr), args)?;
            let value = match result.rows.as_slice() {
                [row] if row.len() == 1 => row[0].clone(),
                [row] => {
                    return Err(Error::NodeBug {
                        reason: format!(
                            "built-in {} returned {} columns, expected 1",
                            def.name,
                            row.len()
                        ),
                    })
                }
                rows => {
                    return Err(Error::NodeBug {
                        reason: format!(
                            "built-in {} returned {} rows, expected 1",
                            def.name,
                            rows.len()
                        ),
                    })
                }
            };

            let value = if value.is_null() {
                Value::null(return_type)
            } else if value.data_type() != return_type {
                value.cast(return_type)?
            } else {
                value
            };
            sink(Row::single(def.name, value))
        },
    )
}

fn notice_executable() -> Executable {
    Executable::new(
        NOTICE,
        ExecutableKind::Action,
        |ctx, args, _sink| match args {
            [message] => match message.as_text() {
                Some(text) => {
                    ctx.logs.push(text);
                    Ok(())
                }
                None if message.is_null() && message.data_type().accepts(&DataType::TEXT) => {
                    Err(invalid(NOTICE, "message cannot be NULL"))
                }
                None => Err(invalid(
                    NOTICE,
                    format!("argument 1 must be text, got {}", message.data_type()),
                )),
            },
            _ => Err(invalid(
                NOTICE,
                format!("expected 1 arguments, got {}", args.len()),
            )),
        },
    )
}

static BUILTINS: Lazy<Arc<HashMap<String, Arc<Executable>>>> = Lazy::new(|| {
    let mut map: HashMap<String, Arc<Executable>> = SCALAR_FUNCTIONS
        .iter()
        .map(|def| (def.name.to_string(), Arc::new(scalar_executable(def))))
        .collect();
    map.insert(NOTICE.to_string(), Arc::new(notice_executable()));
    Arc::new(map)
});

/// A fresh copy of the built-in table for one namespace.
pub(crate) fn builtin_executables() -> HashMap<String, Arc<Executable>> {
    BUILTINS.as_ref().clone()
}

/// Whether `exec` is the shared built-in of its name (not an override).
pub(crate) fn is_builtin(exec: &Arc<Executable>) -> bool {
    BUILTINS
        .get(&exec.name)
        .is_some_and(|builtin| Arc::ptr_eq(builtin, exec))
}

/// Names of every built-in, sorted.
pub fn builtin_names() -> Vec<String> {
    let mut names: Vec<String> = BUILTINS.keys().cloned().collect();
    names.sort();
    names
}
