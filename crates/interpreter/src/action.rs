//! User-defined actions
//!
//! An action is a named, parameterized statement body stored in the
//! metadata schema. The body is parsed and planned once, when the action is
//! loaded or deployed, and runs in a nested context of its own namespace.
//!
//! Modifiers gate who may invoke an action and how:
//!
//! | Modifier | Effect |
//! |----------|--------|
//! | `PUBLIC` | callable from a top-level call (the default) |
//! | `PRIVATE` | only callable from other actions |
//! | `SYSTEM` | only callable from other actions or extensions |
//! | `OWNER` | caller must hold the owner role |
//! | `VIEW` | read-only; may run on a read-only handle, needs no `call` grant |

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use nsql_core::{normalize_var_name, validate_ident, validate_var_name, DataType, Error, Result, Value};

use crate::access::Privilege;
use crate::exec_ctx::ExecutionContext;
use crate::executable::{Executable, ExecutableKind};
use crate::parser::Parser;
use crate::planner::{plan, run_statements};

/// Action modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modifier {
    /// Callable at top level
    Public,
    /// Callable only from other actions
    Private,
    /// Callable only from actions or extensions
    System,
    /// Requires the owner role
    Owner,
    /// Read-only
    View,
}

/// Declared action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParameter {
    /// Name, bound in the body as a `$` variable
    pub name: String,
    /// Declared type
    pub data_type: DataType,
}

impl ActionParameter {
    /// Build a parameter
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Persisted action definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    /// Action name
    pub name: String,
    /// Owning namespace
    #[serde(default)]
    pub namespace: String,
    /// Parameters in call order
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
    /// Modifiers
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Statement text
    pub body: String,
}

impl ActionDef {
    /// Public action without parameters.
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            parameters: Vec::new(),
            modifiers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a parameter
    pub fn with_parameter(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.parameters.push(ActionParameter::new(name, data_type));
        self
    }

    /// Add a modifier
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Whether the action carries `modifier`
    pub fn has_modifier(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }

    /// Normalize names for `namespace` and check the definition.
    pub fn normalize(&mut self, namespace: &str) -> Result<()> {
        self.name = self.name.to_lowercase();
        validate_ident(&self.name)?;
        self.namespace = namespace.to_lowercase();

        let mut seen = HashSet::new();
        for param in &mut self.parameters {
            param.name = normalize_var_name(&param.name);
            validate_var_name(&param.name)?;
            if param.data_type.is_null() {
                return Err(Error::invalid_input(format!(
                    "parameter {} of action {} has no type",
                    param.name, self.name
                )));
            }
            if !seen.insert(param.name.clone()) {
                return Err(Error::invalid_input(format!(
                    "duplicate parameter {} in action {}",
                    param.name, self.name
                )));
            }
        }

        if self.has_modifier(Modifier::Public) && self.has_modifier(Modifier::Private) {
            return Err(Error::invalid_input(format!(
                "action {} cannot be both PUBLIC and PRIVATE",
                self.name
            )));
        }
        Ok(())
    }
}

/// Enforce invocation modifiers shared by actions and extension methods.
pub(crate) fn check_modifiers(
    ctx: &ExecutionContext<'_>,
    namespace: &str,
    name: &str,
    modifiers: &[Modifier],
) -> Result<()> {
    let top_level = ctx.scope.is_top_level();
    let denied = |reason: String| Error::PermissionDenied { reason };

    if top_level && modifiers.contains(&Modifier::Private) {
        return Err(denied(format!("action {} is private", name)));
    }
    if top_level && modifiers.contains(&Modifier::System) {
        return Err(denied(format!(
            "action {} is a system action and cannot be called directly",
            name
        )));
    }

    let view = modifiers.contains(&Modifier::View);
    let owner_only = modifiers.contains(&Modifier::Owner);
    if owner_only || (!view && top_level) {
        let access = ctx.interpreter.access.read();
        if owner_only && !access.is_owner(ctx.caller()) {
            return Err(denied(format!("action {} can only be called by the owner", name)));
        }
        if !view && top_level && !access.has_privilege(ctx.caller(), Some(namespace), Privilege::Call) {
            return Err(denied(format!(
                "caller {} lacks the call privilege on namespace {}",
                ctx.caller(),
                namespace
            )));
        }
    }

    if !view {
        ctx.require_mutation(&format!("action {} is not a VIEW", name))?;
    }
    Ok(())
}

/// Check argument count and types against declared parameter types,
/// re-typing untyped NULLs.
pub(crate) fn check_arguments(name: &str, declared: &[DataType], args: &[Value]) -> Result<Vec<Value>> {
    if declared.len() != args.len() {
        return Err(Error::InvalidArguments {
            function: name.to_string(),
            reason: format!("expected {} arguments, got {}", declared.len(), args.len()),
        });
    }

    declared
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (expected, arg))| {
            if arg.data_type() == *expected {
                Ok(arg.clone())
            } else if arg.data_type().is_null() {
                Ok(Value::null(*expected))
            } else {
                Err(Error::InvalidArguments {
                    function: name.to_string(),
                    reason: format!(
                        "argument {} must be {}, got {}",
                        i + 1,
                        expected,
                        arg.data_type()
                    ),
                })
            }
        })
        .collect()
}

/// Compile a (normalized) action definition into an executable.
pub(crate) fn compile(def: &ActionDef, parser: &dyn Parser) -> Result<Executable> {
    let statements = parser.parse(&def.body).map_err(|e| {
        Error::invalid_input(format!("action {}.{}: {}", def.namespace, def.name, e))
    })?;
    let planned = Arc::new(plan(&statements));

    let namespace = def.namespace.clone();
    let name = def.name.clone();
    let modifiers = def.modifiers.clone();
    let param_names: Vec<String> = def.parameters.iter().map(|p| p.name.clone()).collect();
    let param_types: Vec<DataType> = def.parameters.iter().map(|p| p.data_type).collect();

    Ok(Executable::new(
        def.name.clone(),
        ExecutableKind::Action,
        move |ctx, args, sink| {
            let args = check_arguments(&name, &param_types, args)?;
            check_modifiers(ctx, &namespace, &name, &modifiers)?;

            let mut child = ctx.child(&namespace);
            for (param, value) in param_names.iter().zip(args) {
                child.scope.set(param, value)?;
            }
            run_statements(&mut child, &planned, sink)
        },
    ))
}
