//! Runtime values produced by expressions.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use super::{ExprError, ExprType};
use crate::request::MetaValue;

/// A scalar produced by evaluating an expression.
///
/// Values are used as split keys, so they implement `Eq` and `Hash`; floats
/// compare by bit pattern for that purpose.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::Bool(_) => "bool",
        }
    }

    pub fn as_bool(&self) -> Result<bool, ExprError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(ExprError::eval(format!("expected bool, got {}", other.type_name()))),
        }
    }

    pub fn as_str(&self) -> Result<&str, ExprError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(ExprError::eval(format!("expected string, got {}", other.type_name()))),
        }
    }

    /// Numeric view, promoting integers to floats.
    pub fn as_f64(&self) -> Result<f64, ExprError> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(n) => Ok(*n),
            other => Err(ExprError::eval(format!("expected number, got {}", other.type_name()))),
        }
    }

    /// Numeric view, truncating floats toward zero.
    pub fn as_i64(&self) -> Result<i64, ExprError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(n) if n.is_finite() => Ok(n.trunc() as i64),
            Value::Float(n) => Err(ExprError::eval(format!("{n} is not representable as int"))),
            other => Err(ExprError::eval(format!("expected number, got {}", other.type_name()))),
        }
    }

    pub fn expr_type(&self) -> ExprType {
        match self {
            Value::String(_) => ExprType::String,
            Value::Int(_) | Value::Float(_) => ExprType::Number,
            Value::Bool(_) => ExprType::Bool,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Float(n) => n.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&MetaValue> for Value {
    fn from(v: &MetaValue) -> Self {
        match v {
            MetaValue::String(s) => Value::String(s.clone()),
            MetaValue::Int(n) => Value::Int(*n),
            MetaValue::Bool(b) => Value::Bool(*b),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
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

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
