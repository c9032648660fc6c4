//! Expression-engine error type.

use thiserror::Error;

/// Errors produced while evaluating an expression or template.
#[derive(Debug, Error, Clone)]
pub enum ExprError {
    /// The underlying JEXL parser/evaluator rejected the expression.
    #[error("failed to evaluate expression '{expr}': {message}")]
    Eval { expr: String, message: String },

    /// Evaluation did not finish before the per-evaluation timeout.
    #[error("expression '{0}' timed out")]
    Timeout(String),

    /// A `test` expression evaluated to something other than a JSON boolean.
    #[error("expression '{expr}' must evaluate to a boolean, got {got}")]
    NotBoolean { expr: String, got: String },

    /// The context passed to the evaluator was not a JSON object.
    #[error("evaluation context must be a JSON object")]
    InvalidContext,
}
