//! Runtime values
//!
//! A [`Value`] is an immutable pair of a [`DataType`] tag and a [`RawValue`].
//! Constructors keep the two consistent: a `Value` of type `int8` always
//! holds `RawValue::Int8` or `RawValue::Null`.
//!
//! ## Host values
//!
//! Values enter the interpreter from callers as untyped JSON
//! ([`HostValue`]). The mapping is strict:
//!
//! | Host | Value |
//! |------|-------|
//! | `null` | untyped NULL |
//! | `true` / `false` | `bool` |
//! | integer in i64 range | `int8` |
//! | string | `text` |
//! | `{"$bytes": "<base64>"}` | `bytea` |
//! | `{"$uuid": "<uuid>"}` | `uuid` |
//! | array of one scalar type | array of that type |
//!
//! Floats, integers outside i64, other objects, nested arrays and arrays
//! mixing types are rejected.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{BaseType, DataType};

/// Untyped caller-side value
pub type HostValue = serde_json::Value;

/// Raw payload of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawValue {
    /// SQL NULL
    Null,
    /// UTF-8 text
    Text(String),
    /// 64-bit signed integer
    Int8(i64),
    /// Boolean
    Bool(bool),
    /// Raw bytes
    Bytea(Vec<u8>),
    /// UUID
    Uuid(Uuid),
    /// Array elements (scalars or NULL)
    Array(Vec<RawValue>),
}

impl RawValue {
    fn base_type(&self) -> Option<BaseType> {
        match self {
            RawValue::Null | RawValue::Array(_) => None,
            RawValue::Text(_) => Some(BaseType::Text),
            RawValue::Int8(_) => Some(BaseType::Int8),
            RawValue::Bool(_) => Some(BaseType::Bool),
            RawValue::Bytea(_) => Some(BaseType::Bytea),
            RawValue::Uuid(_) => Some(BaseType::Uuid),
        }
    }
}

/// Typed, immutable runtime datum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    data_type: DataType,
    raw: RawValue,
}

impl Value {
    /// NULL of the given type
    pub fn null(data_type: DataType) -> Self {
        Value {
            data_type,
            raw: RawValue::Null,
        }
    }

    /// `text` value
    pub fn text(s: impl Into<String>) -> Self {
        Value {
            data_type: DataType::TEXT,
            raw: RawValue::Text(s.into()),
        }
    }

    /// `int8` value
    pub fn int8(i: i64) -> Self {
        Value {
            data_type: DataType::INT8,
            raw: RawValue::Int8(i),
        }
    }

    /// `bool` value
    pub fn boolean(b: bool) -> Self {
        Value {
            data_type: DataType::BOOL,
            raw: RawValue::Bool(b),
        }
    }

    /// `bytea` value
    pub fn bytea(b: impl Into<Vec<u8>>) -> Self {
        Value {
            data_type: DataType::BYTEA,
            raw: RawValue::Bytea(b.into()),
        }
    }

    /// `uuid` value
    pub fn uuid(u: Uuid) -> Self {
        Value {
            data_type: DataType::UUID,
            raw: RawValue::Uuid(u),
        }
    }

    /// Array of `element` values. Every element must be NULL or of the
    /// element type.
    pub fn array(element: DataType, items: Vec<Value>) -> Result<Self> {
        if element.is_array() || element.is_null() {
            return Err(Error::invalid_input(format!(
                "invalid array element type: {}",
                element
            )));
        }

        let mut raws = Vec::with_capacity(items.len());
        for item in items {
            if !element.accepts(&item.data_type) {
                return Err(Error::TypeMismatch {
                    expected: element.to_string(),
                    actual: item.data_type.to_string(),
                });
            }
            raws.push(item.raw);
        }

        Ok(Value {
            data_type: element.as_array(),
            raw: RawValue::Array(raws),
        })
    }

    /// Rebuild a value from a type tag and raw payload, checking that the
    /// two agree.
    pub fn from_parts(data_type: DataType, raw: RawValue) -> Result<Self> {
        let consistent = match (&raw, data_type.is_array()) {
            (RawValue::Null, _) => true,
            (RawValue::Array(items), true) => items.iter().all(|item| match item {
                RawValue::Null => true,
                other => other.base_type() == Some(data_type.base()),
            }),
            (RawValue::Array(_), false) => false,
            (scalar, false) => scalar.base_type() == Some(data_type.base()),
            (_, true) => false,
        };

        if !consistent {
            return Err(Error::TypeMismatch {
                expected: data_type.to_string(),
                actual: format!("{:?}", raw),
            });
        }

        Ok(Value { data_type, raw })
    }

    /// Type tag
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Raw payload
    pub fn raw(&self) -> &RawValue {
        &self.raw
    }

    /// Consume into the raw payload
    pub fn into_raw(self) -> RawValue {
        self.raw
    }

    /// Whether this value is SQL NULL (of any type)
    pub fn is_null(&self) -> bool {
        matches!(self.raw, RawValue::Null)
    }

    /// Get as i64 if this is a non-null `int8`
    pub fn as_int8(&self) -> Option<i64> {
        match self.raw {
            RawValue::Int8(i) => Some(i),
            _ => None,
        }
    }

    /// Get as &str if this is a non-null `text`
    pub fn as_text(&self) -> Option<&str> {
        match &self.raw {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as bool if this is a non-null `bool`
    pub fn as_bool(&self) -> Option<bool> {
        match self.raw {
            RawValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Get as bytes if this is a non-null `bytea`
    pub fn as_bytea(&self) -> Option<&[u8]> {
        match &self.raw {
            RawValue::Bytea(b) => Some(b),
            _ => None,
        }
    }

    /// Get as Uuid if this is a non-null `uuid`
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self.raw {
            RawValue::Uuid(u) => Some(u),
            _ => None,
        }
    }

    // ========================================================================
    // Host conversion
    // ========================================================================

    /// Convert an untyped host value.
    pub fn from_host(host: &HostValue) -> Result<Value> {
        match host {
            HostValue::Array(items) => host_array(items),
            scalar => host_scalar(scalar),
        }
    }

    /// Convert back to an untyped host value. Inverse of [`Value::from_host`]
    /// for every value it accepts.
    pub fn to_host(&self) -> HostValue {
        raw_to_host(&self.raw)
    }

    // ========================================================================
    // Casting
    // ========================================================================

    /// Convert to `target`, following SQL cast rules for the supported
    /// types.
    pub fn cast(&self, target: DataType) -> Result<Value> {
        if self.data_type == target {
            return Ok(self.clone());
        }
        if self.is_null() {
            return Ok(Value::null(target));
        }

        match (&self.raw, target.is_array()) {
            (RawValue::Array(items), true) => {
                let mut cast = Vec::with_capacity(items.len());
                for item in items {
                    let elem = Value {
                        data_type: self.data_type.element(),
                        raw: item.clone(),
                    };
                    cast.push(elem.cast(target.element())?);
                }
                Value::array(target.element(), cast)
            }
            (RawValue::Array(_), false) | (_, true) => Err(self.cast_error(target)),
            (raw, false) => cast_scalar(raw, target.base()).ok_or_else(|| self.cast_error(target)),
        }
    }

    fn cast_error(&self, target: DataType) -> Error {
        Error::InvalidInput {
            reason: format!("cannot cast {} value {} to {}", self.data_type, self, target),
        }
    }
}

fn cast_scalar(raw: &RawValue, target: BaseType) -> Option<Value> {
    match (raw, target) {
        (RawValue::Int8(i), BaseType::Text) => Some(Value::text(i.to_string())),
        (RawValue::Int8(i), BaseType::Bool) => Some(Value::boolean(*i != 0)),
        (RawValue::Bool(b), BaseType::Text) => Some(Value::text(b.to_string())),
        (RawValue::Bool(b), BaseType::Int8) => Some(Value::int8(i64::from(*b))),
        (RawValue::Uuid(u), BaseType::Text) => Some(Value::text(u.to_string())),
        (RawValue::Text(s), BaseType::Int8) => s.trim().parse().ok().map(Value::int8),
        (RawValue::Text(s), BaseType::Bool) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Some(Value::boolean(true)),
            "false" | "f" | "no" | "0" => Some(Value::boolean(false)),
            _ => None,
        },
        (RawValue::Text(s), BaseType::Uuid) => Uuid::parse_str(s.trim()).ok().map(Value::uuid),
        (RawValue::Text(s), BaseType::Bytea) => Some(Value::bytea(s.as_bytes().to_vec())),
        _ => None,
    }
}

fn host_scalar(host: &HostValue) -> Result<Value> {
    match host {
        HostValue::Null => Ok(Value::null(DataType::NULL)),
        HostValue::Bool(b) => Ok(Value::boolean(*b)),
        HostValue::Number(n) => n.as_i64().map(Value::int8).ok_or_else(|| {
            Error::UnsupportedHostValue {
                reason: format!("number {} is not a 64-bit signed integer", n),
            }
        }),
        HostValue::String(s) => Ok(Value::text(s.clone())),
        HostValue::Object(obj) => {
            if obj.len() == 1 {
                if let Some(HostValue::String(encoded)) = obj.get("$bytes") {
                    let decoded = BASE64.decode(encoded).map_err(|e| Error::UnsupportedHostValue {
                        reason: format!("invalid base64: {}", e),
                    })?;
                    return Ok(Value::bytea(decoded));
                }
                if let Some(HostValue::String(s)) = obj.get("$uuid") {
                    let u = Uuid::parse_str(s).map_err(|e| Error::UnsupportedHostValue {
                        reason: format!("invalid uuid: {}", e),
                    })?;
                    return Ok(Value::uuid(u));
                }
            }
            Err(Error::UnsupportedHostValue {
                reason: "objects are not supported".to_string(),
            })
        }
        HostValue::Array(_) => Err(Error::UnsupportedHostValue {
            reason: "nested arrays are not supported".to_string(),
        }),
    }
}

fn host_array(items: &[HostValue]) -> Result<Value> {
    let mut values = Vec::with_capacity(items.len());
    let mut element: Option<DataType> = None;

    for item in items {
        let value = host_scalar(item)?;
        if !value.is_null() {
            match element {
                None => element = Some(value.data_type),
                Some(t) if t != value.data_type => {
                    return Err(Error::UnsupportedHostValue {
                        reason: format!(
                            "array mixes element types {} and {}",
                            t, value.data_type
                        ),
                    })
                }
                Some(_) => {}
            }
        }
        values.push(value);
    }

    // an array with no typed element defaults to text[]
    Value::array(element.unwrap_or(DataType::TEXT), values)
}

fn raw_to_host(raw: &RawValue) -> HostValue {
    match raw {
        RawValue::Null => HostValue::Null,
        RawValue::Text(s) => HostValue::String(s.clone()),
        RawValue::Int8(i) => HostValue::Number((*i).into()),
        RawValue::Bool(b) => HostValue::Bool(*b),
        RawValue::Bytea(b) => serde_json::json!({ "$bytes": BASE64.encode(b) }),
        RawValue::Uuid(u) => serde_json::json!({ "$uuid": u.to_string() }),
        RawValue::Array(items) => HostValue::Array(items.iter().map(raw_to_host).collect()),
    }
}

fn fmt_raw(raw: &RawValue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match raw {
        RawValue::Null => f.write_str("NULL"),
        RawValue::Text(s) => write!(f, "'{}'", s),
        RawValue::Int8(i) => write!(f, "{}", i),
        RawValue::Bool(b) => write!(f, "{}", b),
        RawValue::Bytea(b) => write!(f, "{:?}", b),
        RawValue::Uuid(u) => write!(f, "{}", u),
        RawValue::Array(items) => {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_raw(item, f)?;
            }
            f.write_str("]")
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_raw(&self.raw, f)
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::int8(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::uuid(u)
    }
}
