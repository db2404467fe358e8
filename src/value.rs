//! Column values and typed decoding.

use crate::error::{Error, Result};

/// A single column value or statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean / BIT
    Bool(bool),
    /// Any integer column, widened to 64 bits
    Int(i64),
    /// Any floating point or approximate numeric column
    Float(f64),
    /// Character data
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }
}

/// Trait for decoding a [`Value`] into a Rust type.
pub trait FromValue<'a>: Sized {
    /// Decode from NULL.
    ///
    /// Default implementation returns an error. `Option<T>` overrides it.
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Decode from a non-NULL value.
    fn from_value(value: &'a Value) -> Result<Self>;

    /// Decode any value, dispatching NULL to [`FromValue::from_null`].
    fn decode(value: &'a Value) -> Result<Self> {
        match value {
            Value::Null => Self::from_null(),
            other => Self::from_value(other),
        }
    }
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(Error::Decode(format!(
        "cannot decode {} value as {}",
        value.kind(),
        target
    )))
}

impl<'a, T: FromValue<'a>> FromValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_value(value: &'a Value) -> Result<Self> {
        T::from_value(value).map(Some)
    }
}

impl FromValue<'_> for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => mismatch(other, "bool"),
        }
    }
}

impl FromValue<'_> for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| Error::Decode(format!("invalid i64: {}", e))),
            other => mismatch(other, "i64"),
        }
    }
}

impl FromValue<'_> for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|e| Error::Decode(format!("i32 overflow: {} ({})", wide, e)))
    }
}

impl FromValue<'_> for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| Error::Decode(format!("invalid f64: {}", e))),
            other => mismatch(other, "f64"),
        }
    }
}

impl FromValue<'_> for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => mismatch(other, "String"),
        }
    }
}

impl<'a> FromValue<'a> for &'a str {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.as_str()),
            other => mismatch(other, "&str"),
        }
    }
}

impl FromValue<'_> for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => mismatch(other, "Vec<u8>"),
        }
    }
}

impl FromValue<'_> for Value {
    fn from_null() -> Result<Self> {
        Ok(Value::Null)
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

// === Parameter conversions ===

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
