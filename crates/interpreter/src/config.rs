//! Interpreter configuration via `nsql.toml`
//!
//! The interpreter reads a handful of naming settings at construction. All of
//! them have defaults, so a missing file is the same as an empty one.

use nsql_core::{validate_ident, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name conventionally placed next to the node's data.
pub const CONFIG_FILE_NAME: &str = "nsql.toml";

/// Interpreter configuration.
///
/// # Example
///
/// ```toml
/// default_namespace = "main"
/// metadata_schema = "nsql_engine"
/// info_namespace = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Namespace used by `execute` and by `call` with an empty namespace.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    /// Database schema holding the persisted catalog.
    #[serde(default = "default_metadata_schema")]
    pub metadata_schema: String,
    /// System namespace exposing catalog information.
    #[serde(default = "default_info_namespace")]
    pub info_namespace: String,
}

fn default_namespace() -> String {
    "main".to_string()
}

fn default_metadata_schema() -> String {
    "nsql_engine".to_string()
}

fn default_info_namespace() -> String {
    "info".to_string()
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            default_namespace: default_namespace(),
            metadata_schema: default_metadata_schema(),
            info_namespace: default_info_namespace(),
        }
    }
}

impl InterpreterConfig {
    /// Check every configured name. Names are lower-cased first, the same
    /// normalization applied to every catalog lookup.
    pub fn validate(&mut self) -> Result<()> {
        for (field, name) in [
            ("default_namespace", &mut self.default_namespace),
            ("metadata_schema", &mut self.metadata_schema),
            ("info_namespace", &mut self.info_namespace),
        ] {
            *name = name.to_lowercase();
            validate_ident(name).map_err(|e| {
                Error::invalid_input(format!("invalid {} in {}: {}", field, CONFIG_FILE_NAME, e))
            })?;
        }

        if self.default_namespace == self.info_namespace {
            return Err(Error::invalid_input(
                "default_namespace and info_namespace must differ",
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: InterpreterConfig = toml::from_str(content).map_err(|e| {
            Error::invalid_input(format!("Failed to parse {}: {}", CONFIG_FILE_NAME, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read config from a file path. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# nsql interpreter configuration
#
# Namespace used when a statement or call does not name one.
default_namespace = "main"

# Schema in the node database that stores namespaces, tables, actions,
# extensions and grants.
metadata_schema = "nsql_engine"

# Read-only system namespace describing the catalog.
info_namespace = "info"
"#
    }
}
