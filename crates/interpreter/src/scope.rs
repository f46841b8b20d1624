//! Variable scope of one invocation

use std::collections::HashMap;

use nsql_core::{validate_var_name, Error, Result, Value};

/// Variable bindings of an execution context.
///
/// Keys are normalized variable names, sigil included. Once a variable
/// holds a typed value its type is fixed; assigning an untyped NULL keeps
/// the type.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    vars: HashMap<String, Value>,
    namespace: String,
    is_top_level: bool,
}

impl Scope {
    pub(crate) fn new(namespace: impl Into<String>, is_top_level: bool) -> Self {
        Self {
            vars: HashMap::new(),
            namespace: namespace.into(),
            is_top_level,
        }
    }

    /// Empty nested scope bound to `namespace`.
    pub(crate) fn child(&self, namespace: impl Into<String>) -> Self {
        Self::new(namespace, false)
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn is_top_level(&self) -> bool {
        self.is_top_level
    }

    pub(crate) fn get(&self, name: &str) -> Result<&Value> {
        self.vars.get(name).ok_or_else(|| Error::UnknownVariable {
            name: name.to_string(),
        })
    }

    pub(crate) fn set(&mut self, name: &str, value: Value) -> Result<()> {
        validate_var_name(name)?;

        let value = match self.vars.get(name) {
            Some(existing) if !existing.data_type().is_null() => {
                let declared = existing.data_type();
                if value.data_type().is_null() {
                    Value::null(declared)
                } else if value.data_type() != declared {
                    return Err(Error::TypeMismatch {
                        expected: declared.to_string(),
                        actual: value.data_type().to_string(),
                    });
                } else {
                    value
                }
            }
            _ => value,
        };

        self.vars.insert(name.to_string(), value);
        Ok(())
    }
}
