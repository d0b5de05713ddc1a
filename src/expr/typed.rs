//! Typed expression fields for module configuration.
//!
//! Each wrapper deserializes from a JSON/TOML scalar: strings are parsed as
//! templates, numbers and booleans become literals. The result type is checked
//! during deserialization, so a mismatch is reported while the module is being
//! constructed.

use serde::de::{self, Deserialize, Deserializer};

use super::{Expr, ExprError, ExprType, Value, parse_template};
use crate::request::Request;

fn from_json(value: serde_json::Value) -> Result<Expr, String> {
    match value {
        serde_json::Value::String(s) => parse_template(&s).map_err(|e| e.to_string()),
        serde_json::Value::Bool(b) => Ok(Expr::Literal(Value::Bool(b))),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Expr::Literal(Value::Int(i))),
            None => n
                .as_f64()
                .map(|f| Expr::Literal(Value::Float(f)))
                .ok_or_else(|| format!("number {n} is out of range")),
        },
        other => Err(format!(
            "expected a string, number or bool expression, got {other}"
        )),
    }
}

fn expect(expr: Expr, expected: ExprType) -> Result<Expr, ExprError> {
    let found = expr.ty();
    if found != expected {
        return Err(ExprError::Mismatch { expected, found });
    }
    Ok(expr)
}

/// Expression of any result type, used for split keys.
#[derive(Debug, Clone)]
pub struct AnyExpr(Expr);

impl AnyExpr {
    pub fn parse(template: &str) -> Result<Self, ExprError> {
        parse_template(template).map(Self)
    }

    pub fn eval(&self, req: &Request) -> Result<Value, ExprError> {
        self.0.eval(req)
    }

    pub fn is_static(&self) -> bool {
        self.0.is_static()
    }
}

impl<'de> Deserialize<'de> for AnyExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        from_json(value).map(Self).map_err(de::Error::custom)
    }
}

macro_rules! typed_expr {
    ($name:ident, $ty:expr) => {
        impl $name {
            pub fn parse(template: &str) -> Result<Self, ExprError> {
                expect(parse_template(template)?, $ty).map(Self)
            }

            pub fn is_static(&self) -> bool {
                self.0.is_static()
            }
        }

        impl TryFrom<Expr> for $name {
            type Error = ExprError;

            fn try_from(expr: Expr) -> Result<Self, ExprError> {
                expect(expr, $ty).map(Self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = serde_json::Value::deserialize(deserializer)?;
                let expr = from_json(value).map_err(de::Error::custom)?;
                Self::try_from(expr).map_err(de::Error::custom)
            }
        }
    };
}

/// Expression that must produce a string.
#[derive(Debug, Clone)]
pub struct StringExpr(Expr);

typed_expr!(StringExpr, ExprType::String);

impl StringExpr {
    pub fn eval(&self, req: &Request) -> Result<String, ExprError> {
        match self.0.eval(req)? {
            Value::String(s) => Ok(s),
            other => Err(ExprError::eval(format!("expected string, got {}", other.type_name()))),
        }
    }

    pub fn static_value(&self) -> Option<&str> {
        match self.0.static_value() {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Expression that must produce a number.
#[derive(Debug, Clone)]
pub struct NumberExpr(Expr);

typed_expr!(NumberExpr, ExprType::Number);

impl NumberExpr {
    /// Evaluate, truncating a float result toward zero.
    pub fn eval_int(&self, req: &Request) -> Result<i64, ExprError> {
        self.0.eval(req)?.as_i64()
    }

    pub fn eval_float(&self, req: &Request) -> Result<f64, ExprError> {
        self.0.eval(req)?.as_f64()
    }

    pub fn static_value(&self) -> Option<f64> {
        self.0.static_value().and_then(|v| v.as_f64().ok())
    }
}

/// Expression that must produce a bool.
#[derive(Debug, Clone)]
pub struct BoolExpr(Expr);

typed_expr!(BoolExpr, ExprType::Bool);

impl BoolExpr {
    pub fn eval(&self, req: &Request) -> Result<bool, ExprError> {
        self.0.eval(req)?.as_bool()
    }
}
