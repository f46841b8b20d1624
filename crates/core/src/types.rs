//! Data types for interpreter values
//!
//! A [`DataType`] is a base type plus an array flag. The set of base types is
//! deliberately small: every type must have an exact, deterministic
//! representation on every node, so floating point is not supported.
//!
//! ## Text form
//!
//! | Base type | Canonical | Accepted aliases |
//! |-----------|-----------|------------------|
//! | Null | `null` | |
//! | Text | `text` | `varchar`, `string` |
//! | Int8 | `int8` | `int`, `integer`, `bigint`, `int4` |
//! | Bool | `bool` | `boolean` |
//! | Bytea | `bytea` | `blob`, `bytes` |
//! | Uuid | `uuid` | |
//!
//! A trailing `[]` marks an array type, e.g. `int8[]`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Base (element) type of a [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    /// Type of an untyped NULL
    Null,
    /// UTF-8 text
    Text,
    /// 64-bit signed integer
    Int8,
    /// Boolean
    Bool,
    /// Raw bytes
    Bytea,
    /// 128-bit UUID
    Uuid,
}

impl BaseType {
    /// Canonical lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            BaseType::Null => "null",
            BaseType::Text => "text",
            BaseType::Int8 => "int8",
            BaseType::Bool => "bool",
            BaseType::Bytea => "bytea",
            BaseType::Uuid => "uuid",
        }
    }
}

/// Data type tag carried by every [`Value`](crate::Value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    base: BaseType,
    is_array: bool,
}

impl DataType {
    /// Type of an untyped NULL
    pub const NULL: DataType = DataType::scalar(BaseType::Null);
    /// `text`
    pub const TEXT: DataType = DataType::scalar(BaseType::Text);
    /// `int8`
    pub const INT8: DataType = DataType::scalar(BaseType::Int8);
    /// `bool`
    pub const BOOL: DataType = DataType::scalar(BaseType::Bool);
    /// `bytea`
    pub const BYTEA: DataType = DataType::scalar(BaseType::Bytea);
    /// `uuid`
    pub const UUID: DataType = DataType::scalar(BaseType::Uuid);

    /// A scalar type
    pub const fn scalar(base: BaseType) -> Self {
        DataType {
            base,
            is_array: false,
        }
    }

    /// An array of `base`
    pub const fn array(base: BaseType) -> Self {
        DataType {
            base,
            is_array: true,
        }
    }

    /// The element type
    pub fn base(&self) -> BaseType {
        self.base
    }

    /// Whether this is an array type
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Whether this is the untyped NULL type
    pub fn is_null(&self) -> bool {
        self.base == BaseType::Null && !self.is_array
    }

    /// Element type of an array type (the type itself for scalars)
    pub fn element(&self) -> DataType {
        DataType::scalar(self.base)
    }

    /// Array type whose elements are of this (scalar) type
    pub fn as_array(&self) -> DataType {
        DataType::array(self.base)
    }

    /// Whether `self` and `other` are the same type, treating the untyped
    /// NULL as compatible with everything.
    pub fn accepts(&self, other: &DataType) -> bool {
        other.is_null() || self.is_null() || self == other
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array {
            write!(f, "{}[]", self.base.name())
        } else {
            f.write_str(self.base.name())
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (name, is_array) = match lowered.strip_suffix("[]") {
            Some(name) => (name.trim_end(), true),
            None => (lowered.as_str(), false),
        };

        let base = match name {
            "null" => BaseType::Null,
            "text" | "varchar" | "string" => BaseType::Text,
            "int8" | "int" | "integer" | "bigint" | "int4" => BaseType::Int8,
            "bool" | "boolean" => BaseType::Bool,
            "bytea" | "blob" | "bytes" => BaseType::Bytea,
            "uuid" => BaseType::Uuid,
            _ => {
                return Err(Error::InvalidInput {
                    reason: format!("unknown data type: {}", s),
                })
            }
        };

        if base == BaseType::Null && is_array {
            return Err(Error::InvalidInput {
                reason: "null[] is not a valid data type".to_string(),
            });
        }

        Ok(DataType { base, is_array })
    }
}

// Types are persisted in their text form so metadata rows stay readable.
impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
