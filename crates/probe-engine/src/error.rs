//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine — validation and execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Two or more jobs share the same id (explicit collision, or the
    /// auto-slug dedup safety bound was exceeded).
    #[error("duplicate job id: '{0}'")]
    DuplicateJobId(String),

    /// A `needs` entry references a job id that doesn't exist.
    #[error("job '{job}' needs non-existent job '{dependency}'")]
    UnknownJobReference { job: String, dependency: String },

    /// Topological sort over `needs` detected a cycle.
    #[error("workflow graph contains a circular dependency involving '{0}'")]
    CycleDetected(String),

    /// A step declares `outputs` without an `id` — there'd be nothing to
    /// publish them under.
    #[error("step '{0}' declares outputs but has no id")]
    MissingStepId(String),

    /// Referenced a job id the scheduler doesn't know about.
    #[error("unknown job id: '{0}'")]
    UnknownJobId(String),

    /// Any other structural problem caught before dispatch.
    #[error("invalid workflow: {0}")]
    Validation(String),

    /// Failed to parse the workflow YAML.
    #[error("failed to parse workflow: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Workflow-level `vars` failed to evaluate at run start — unlike a
    /// per-step expression failure, this aborts the run rather than
    /// degrading into a recorded step error.
    #[error(transparent)]
    Expr(#[from] probe_expr::ExprError),
}
