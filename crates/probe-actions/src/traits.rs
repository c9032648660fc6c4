//! The `ActionRunner` trait — the contract every action backend must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ActionError;

/// Runs a single named action (`uses:` in a step) and returns its outputs.
///
/// A workflow process wires exactly one `ActionRunner` (often one that
/// dispatches to several concrete backends by action name) into the engine;
/// the engine never knows whether an action ran a shell command, hit a
/// plugin, or is a test double.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Run the action named `name`.
    ///
    /// `args` are the step's positional `with.args` (already template
    /// evaluated); `params` are the step's keyed `with` parameters (already
    /// template evaluated). `verbose` mirrors the CLI's `--verbose` flag so
    /// runners can decide whether to echo their own diagnostics.
    async fn run_action(
        &self,
        name: &str,
        args: &[String],
        params: &Map<String, Value>,
        verbose: bool,
    ) -> Result<Map<String, Value>, ActionError>;
}
