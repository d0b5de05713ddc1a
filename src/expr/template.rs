//! Template strings: literal text interleaved with `{expression}` spans.

use super::value::Value;
use super::{CompiledExpr, Expr, ExprError, ExprType, Plan, engine};

/// Parse a template such as `"http://{req.header(\"Host\")}{req.path}"`.
///
/// A template made of a single part keeps the native type of that part, so
/// `"{1}"` is the number 1 and `"{req.method == GET}"` is a bool. Several parts
/// are rendered and concatenated into a string.
pub fn parse_template(src: &str) -> Result<Expr, ExprError> {
    let mut parts: Vec<Expr> = Vec::new();
    let mut rest = src;

    while !rest.is_empty() {
        let Some(open) = rest.find('{') else {
            parts.push(text(rest));
            break;
        };
        if open > 0 {
            parts.push(text(&rest[..open]));
        }
        rest = &rest[open + 1..];

        let close = rest
            .find('}')
            .ok_or_else(|| ExprError::Unterminated(src.to_string()))?;
        parts.push(engine::compile(&rest[..close])?);
        rest = &rest[close + 1..];
    }

    if parts.len() <= 1 {
        return Ok(parts.pop().unwrap_or_else(|| text("")));
    }
    if parts.iter().all(Expr::is_static) {
        let rendered: String = parts
            .iter()
            .filter_map(Expr::static_value)
            .map(ToString::to_string)
            .collect();
        return Ok(Expr::Literal(Value::String(rendered)));
    }
    Ok(Expr::Compiled(CompiledExpr {
        source: src.to_string(),
        ty: ExprType::String,
        plan: Plan::Template(parts.into()),
    }))
}

fn text(s: &str) -> Expr {
    Expr::Literal(Value::String(s.to_string()))
}
