//! Expression and template engine
//!
//! Module configurations reference request data through small Rhai
//! expressions (`req.header("Host")`, `req.method == POST`,
//! `req.meta.shard.int % 4`), usually embedded in template strings
//! (`"http://{req.header(\"Host\")}{req.path}"`).
//!
//! ## Data Flow
//! ```text
//! template ──► {…} spans ──► rhai AST ──► static / trial evaluation ──► Expr
//! ```
//!
//! ## Design Decisions
//! - Every expression gets its result type when it is built, so a
//!   configuration error surfaces while the pipeline is constructed rather
//!   than on the first request.
//! - Request-independent expressions are evaluated once and kept as
//!   [`Expr::Literal`]; callers check [`Expr::is_static`] to cache results.

mod engine;
pub mod error;
mod template;
pub mod typed;
pub mod value;

use std::fmt;
use std::sync::Arc;

use rhai::AST;

pub use error::ExprError;
pub use template::parse_template;
pub use typed::{AnyExpr, BoolExpr, NumberExpr, StringExpr};
pub use value::Value;

use crate::request::Request;

/// Result type of an expression as seen by module configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    String,
    Number,
    Bool,
    /// Resolved only at evaluation time (untyped request metadata).
    Any,
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExprType::String => "string",
            ExprType::Number => "number",
            ExprType::Bool => "bool",
            ExprType::Any => "dyn",
        })
    }
}

/// A parsed expression: either a folded constant or compiled code.
#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Value),
    Compiled(CompiledExpr),
}

#[derive(Clone)]
pub struct CompiledExpr {
    source: String,
    ty: ExprType,
    plan: Plan,
}

#[derive(Clone)]
enum Plan {
    Script(Arc<AST>),
    /// Parts rendered and concatenated.
    Template(Arc<[Expr]>),
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("source", &self.source)
            .field("ty", &self.ty)
            .finish()
    }
}

impl Expr {
    pub fn ty(&self) -> ExprType {
        match self {
            Expr::Literal(v) => v.expr_type(),
            Expr::Compiled(c) => c.ty,
        }
    }

    /// True when the result does not depend on the request.
    pub fn is_static(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    pub fn static_value(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            Expr::Compiled(_) => None,
        }
    }

    pub fn eval(&self, req: &Request) -> Result<Value, ExprError> {
        let compiled = match self {
            Expr::Literal(v) => return Ok(v.clone()),
            Expr::Compiled(c) => c,
        };
        match &compiled.plan {
            Plan::Script(ast) => engine::eval(ast, req),
            Plan::Template(parts) => {
                let mut out = String::new();
                for part in parts.iter() {
                    out.push_str(&part.eval(req)?.to_string());
                }
                Ok(Value::String(out))
            }
        }
    }
}

/// Compile a bare expression (no `{}` delimiters).
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    engine::compile(src)
}
