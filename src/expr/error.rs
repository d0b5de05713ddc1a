//! Expression errors.

use thiserror::Error;

use super::ExprType;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    /// The source text is not a valid expression.
    #[error("syntax error in {source_text:?}: {message}")]
    Syntax { source_text: String, message: String },

    /// The template has a `{` with no matching `}`.
    #[error("{0:?} unterminated expression, missing '}}'")]
    Unterminated(String),

    /// The expression cannot produce a value for any request.
    #[error("type error: {0}")]
    Type(String),

    /// A typed expression wrapper received an expression of another type.
    #[error("unexpected type {found}, expected {expected}")]
    Mismatch { expected: ExprType, found: ExprType },

    /// Evaluation failed against a specific request.
    #[error("evaluation failed: {0}")]
    Eval(String),
}

impl ExprError {
    pub(crate) fn syntax(source_text: &str, message: impl Into<String>) -> Self {
        Self::Syntax {
            source_text: source_text.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}
