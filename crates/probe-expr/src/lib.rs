//! Expression and template evaluation for workflow definitions.
//!
//! `{{ vars.name }}` templates and bare `status == 0` expressions both run
//! through [`Evaluator`], a thin JEXL layer (see `evaluator` module) with a
//! fixed set of [`builtins`] and a hard per-evaluation timeout. Builtins may
//! be written as ordinary function calls (`contains(a, b)`); see [`rewrite`]
//! for how that gets translated to the pipe-transform syntax JEXL expects.

pub mod builtins;
pub mod error;
mod evaluator;
pub mod rewrite;

pub use error::ExprError;
pub use evaluator::Evaluator;
