//! Rhai environment shared by every compiled expression.
//!
//! Scripts see a single variable, `req`, and the method and protocol version
//! constants (`GET` ... `TRACE`, `HTTP1_0`, `HTTP1_1`, `HTTP2`). On top of
//! Rhai's standard packages the engine registers:
//!
//! - `req.path`, `req.method`, `req.http_version`, `req.body`
//! - `req.header(name)`: first value of the header, or `""`
//! - `req.meta.<key>` / `req.meta["key"]`, with `.string`, `.int` and `.bool`
//!   accessors that read a missing or differently typed entry as the zero value
//! - `size(s)`: length of a string in characters
//!
//! # Design Decisions
//! - Compilation evaluates the script once without `req` in scope. If that
//!   succeeds the expression is request independent and is folded into a
//!   literal; a missing `req` variable means it must run per request.
//! - The result type of a request-dependent script is taken from a trial run
//!   against an empty request. Every accessor is total on such a request, so
//!   a failing trial run is a configuration error, except for arithmetic
//!   failures (division by a zero meta value) which leave the type open.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use rhai::{AST, Dynamic, Engine, EvalAltResult, ImmutableString, Scope};

use super::value::Value;
use super::{CompiledExpr, Expr, ExprError, ExprType, Plan};
use crate::request::{HttpVersion, MetaValue, Method, Request};

/// `req.meta` as seen by scripts.
#[derive(Clone)]
struct Meta(HashMap<String, MetaValue>);

/// One `req.meta` entry; `value` is `None` when the key is absent.
#[derive(Clone)]
struct MetaEntry {
    key: String,
    value: Option<MetaValue>,
}

impl MetaEntry {
    fn into_value(self) -> Result<Value, ExprError> {
        self.value
            .as_ref()
            .map(Value::from)
            .ok_or_else(|| ExprError::eval(format!("no such key: {}", self.key)))
    }
}

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(build_engine)
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();

    engine.set_strict_variables(true);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(16);
    engine.set_max_operations(10_000);

    engine
        .register_type_with_name::<Request>("Request")
        .register_get("path", |r: &mut Request| r.path.clone())
        .register_get("method", |r: &mut Request| r.method.code())
        .register_get("http_version", |r: &mut Request| r.http_version.code())
        .register_get("body", |r: &mut Request| {
            String::from_utf8_lossy(&r.body).into_owned()
        })
        .register_get("meta", |r: &mut Request| Meta(r.meta.clone()))
        .register_fn("header", |r: &mut Request, name: ImmutableString| {
            r.header(&name).unwrap_or_default().to_string()
        });

    // `req.meta.key` falls back to the string indexer
    engine
        .register_type_with_name::<Meta>("Meta")
        .register_indexer_get(|m: &mut Meta, key: ImmutableString| MetaEntry {
            value: m.0.get(key.as_str()).cloned(),
            key: key.to_string(),
        });

    engine
        .register_type_with_name::<MetaEntry>("MetaEntry")
        .register_get("string", |e: &mut MetaEntry| match &e.value {
            Some(MetaValue::String(s)) => s.clone(),
            _ => String::new(),
        })
        .register_get("int", |e: &mut MetaEntry| match e.value {
            Some(MetaValue::Int(n)) => n,
            _ => 0,
        })
        .register_get("bool", |e: &mut MetaEntry| {
            matches!(e.value, Some(MetaValue::Bool(true)))
        });

    engine.register_fn("size", |s: ImmutableString| s.chars().count() as i64);

    engine
}

fn scope(req: Option<Request>) -> Scope<'static> {
    let mut scope = Scope::new();
    for method in Method::ALL {
        scope.push_constant(method.as_str(), method.code());
    }
    for (version, name) in HttpVersion::ALL {
        scope.push_constant(name, version.code());
    }
    if let Some(req) = req {
        scope.push("req", req);
    }
    scope
}

fn to_value(value: Dynamic) -> Result<Value, ExprError> {
    let type_name = value.type_name();
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(n) = value.as_int() {
        return Ok(Value::Int(n));
    }
    if let Ok(n) = value.as_float() {
        return Ok(Value::Float(n));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Value::String(c.to_string()));
    }
    if value.is_string() {
        return value
            .into_string()
            .map(Value::String)
            .map_err(|found| ExprError::eval(format!("expected string, got {found}")));
    }
    match value.try_cast::<MetaEntry>() {
        Some(entry) => entry.into_value(),
        None => Err(ExprError::eval(format!("unsupported result type {type_name}"))),
    }
}

fn type_of(value: Dynamic) -> Result<ExprType, ExprError> {
    if value.is::<MetaEntry>() {
        return Ok(ExprType::Any);
    }
    let type_name = value.type_name();
    to_value(value)
        .map(|v| v.expr_type())
        .map_err(|_| ExprError::type_error(format!("`{type_name}` is not a scalar value")))
}

/// Compile a bare expression (no `{}` delimiters).
pub(crate) fn compile(src: &str) -> Result<Expr, ExprError> {
    let engine = engine();
    let ast = engine
        .compile_expression_with_scope(&scope(Some(Request::default())), src)
        .map_err(|e| ExprError::syntax(src, e.to_string()))?;

    match engine.eval_ast_with_scope::<Dynamic>(&mut scope(None), &ast) {
        Ok(value) => return to_value(value).map(Expr::Literal),
        Err(e) if matches!(*e, EvalAltResult::ErrorVariableNotFound(..)) => {}
        Err(e) => return Err(ExprError::eval(e.to_string())),
    }

    let trial = engine.eval_ast_with_scope::<Dynamic>(&mut scope(Some(Request::default())), &ast);
    let ty = match trial {
        Ok(value) => type_of(value)?,
        Err(e) if matches!(*e, EvalAltResult::ErrorArithmetic(..)) => ExprType::Any,
        Err(e) => return Err(ExprError::type_error(e.to_string())),
    };

    Ok(Expr::Compiled(CompiledExpr {
        source: src.to_string(),
        ty,
        plan: Plan::Script(Arc::new(ast)),
    }))
}

pub(crate) fn eval(ast: &AST, req: &Request) -> Result<Value, ExprError> {
    engine()
        .eval_ast_with_scope::<Dynamic>(&mut scope(Some(req.clone())), ast)
        .map_err(|e| ExprError::eval(e.to_string()))
        .and_then(to_value)
}
