//! Action-runner error type.

use thiserror::Error;

/// Errors returned by an [`crate::ActionRunner`]'s `run_action`.
///
/// Every variant is a *hard* failure from the step executor's point of view:
/// unlike a failed `test` assertion (which is recorded but does not stop the
/// job), any `Err` returned here stops the owning job immediately.
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    /// The action ran but failed to do its job (bad response, non-zero exit,
    /// connection refused, ...).
    #[error("action '{name}' failed: {message}")]
    Failed { name: String, message: String },

    /// No runner is registered for this action name.
    #[error("no action runner registered for '{0}'")]
    NotFound(String),

    /// The action panicked; the panic payload was caught and converted here
    /// rather than unwinding across the executor.
    #[error("action '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}
