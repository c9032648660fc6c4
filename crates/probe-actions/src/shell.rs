//! `ShellActionRunner` — runs an action as a child process.
//!
//! The action name is the program to execute; `args` become its argv and
//! `with.env`/`with.cwd` (if present in `params`) configure the child's
//! environment and working directory. Useful as the default runner for
//! workflows whose steps shell out directly (`uses: shell`, `with: {cmd:
//! ...}` style actions are expected to be modeled as one step per program).

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::{ActionError, ActionRunner};

/// Runs actions as child processes via `tokio::process::Command`.
#[derive(Debug, Default, Clone)]
pub struct ShellActionRunner;

impl ShellActionRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionRunner for ShellActionRunner {
    async fn run_action(
        &self,
        name: &str,
        args: &[String],
        params: &Map<String, Value>,
        verbose: bool,
    ) -> Result<Map<String, Value>, ActionError> {
        let mut command = Command::new(name);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            command.current_dir(cwd);
        }
        if let Some(env) = params.get("env").and_then(Value::as_object) {
            for (key, value) in env {
                if let Some(value) = value.as_str() {
                    command.env(key, value);
                }
            }
        }

        if verbose {
            tracing::debug!(action = name, ?args, "spawning shell action");
        }

        let output = command
            .output()
            .await
            .map_err(|e| ActionError::Failed {
                name: name.to_string(),
                message: format!("failed to spawn: {e}"),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let status = output.status.code().unwrap_or(-1);

        let mut outputs = Map::new();
        outputs.insert("stdout".into(), json!(stdout));
        outputs.insert("stderr".into(), json!(stderr));
        outputs.insert("status".into(), json!(status));
        outputs.insert("success".into(), json!(output.status.success()));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_successful_command() {
        let runner = ShellActionRunner::new();
        let result = runner
            .run_action("echo", &["hello".to_string()], &Map::new(), false)
            .await
            .unwrap();
        assert_eq!(result["stdout"], json!("hello\n"));
        assert_eq!(result["status"], json!(0));
        assert_eq!(result["success"], json!(true));
    }

    #[tokio::test]
    async fn reports_nonzero_exit_as_unsuccessful_but_not_an_error() {
        let runner = ShellActionRunner::new();
        let result = runner
            .run_action("false", &[], &Map::new(), false)
            .await
            .unwrap();
        assert_eq!(result["success"], json!(false));
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_action() {
        let runner = ShellActionRunner::new();
        let err = runner
            .run_action("definitely-not-a-real-binary", &[], &Map::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Failed { .. }));
    }
}
