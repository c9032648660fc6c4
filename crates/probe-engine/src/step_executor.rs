//! The step executor — prepare → execute (with retry) → process → finalize.
//!
//! Retries a step by looping on the action result's `status == 0` field
//! rather than on the error type returned, since `ActionRunner` surfaces
//! only hard failures as `Err` — the rest is data for `test` to judge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use probe_actions::{ActionError, ActionRunner};
use probe_expr::{Evaluator, ExprError};
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::instrument;

use crate::context::StepContext;
use crate::models::{Retry, Step};
use crate::outputs::OutputsStore;
use crate::results::{StepResult, StepStatus};

/// What the job executor should do after one logical step execution.
pub enum StepOutcome {
    /// Record the result and move on to the next step.
    Continue(StepResult),
    /// A hard action-runner error occurred: record the result and stop
    /// the job immediately, without running its remaining steps.
    Stop(StepResult),
}

pub struct StepExecutor {
    action_runner: Arc<dyn ActionRunner>,
    evaluator: Arc<Evaluator>,
    outputs: Arc<OutputsStore>,
    verbose: bool,
}

impl StepExecutor {
    pub fn new(
        action_runner: Arc<dyn ActionRunner>,
        evaluator: Arc<Evaluator>,
        outputs: Arc<OutputsStore>,
        verbose: bool,
    ) -> Self {
        Self {
            action_runner,
            evaluator,
            outputs,
            verbose,
        }
    }

    /// Run `step`, expanding `iteration` entries sequentially. Returns one
    /// outcome per logical execution — a single-element vector unless
    /// `iteration` is declared.
    #[instrument(skip_all, fields(step = %step.uses))]
    pub async fn run(
        &self,
        index: usize,
        step: &Step,
        job_defaults: &Map<String, Value>,
        ctx: &mut StepContext,
    ) -> Vec<StepOutcome> {
        let entries = step
            .iteration
            .clone()
            .unwrap_or_else(|| vec![Map::new()]);
        let base_vars = ctx.vars.clone();
        let mut outcomes = Vec::with_capacity(entries.len());

        for entry in &entries {
            ctx.vars = StepContext::with_override(&base_vars, entry);
            let outcome = self.run_single(index, step, job_defaults, ctx).await;
            let stop = matches!(outcome, StepOutcome::Stop(_));
            outcomes.push(outcome);
            if stop {
                break;
            }
        }

        ctx.vars = base_vars;
        outcomes
    }

    async fn run_single(
        &self,
        index: usize,
        step: &Step,
        job_defaults: &Map<String, Value>,
        ctx: &mut StepContext,
    ) -> StepOutcome {
        // --- Phase 1: prepare ---------------------------------------------
        let outputs_snapshot = self.outputs.snapshot().await;
        let raw_name = step
            .name
            .clone()
            .unwrap_or_else(|| "Unknown Step".to_string());
        let name = self
            .evaluator
            .eval_template(&raw_name, &ctx.to_value(outputs_snapshot.clone()))
            .unwrap_or(raw_name);

        if let Some(skipif) = &step.skipif {
            match self
                .evaluator
                .eval_bool(skipif, &ctx.to_value(outputs_snapshot.clone()))
            {
                Ok(true) => {
                    return StepOutcome::Continue(StepResult::skipped(
                        index,
                        format!("{name} (SKIPPED)"),
                    ));
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "skipif failed to evaluate; treating as not-skipped");
                }
            }
        }

        let mut wait_display = None;
        if let Some(wait) = &step.wait {
            wait_display = Some(format!("🕐 {}", humantime::format_duration(wait.0)));
            sleep(wait.0).await;
        }

        // --- Phase 2: execute (with retry) --------------------------------
        let ctx_value = ctx.to_value(outputs_snapshot.clone());
        let params = match self.build_params(step, job_defaults, &ctx_value) {
            Ok(p) => p,
            Err(e) => {
                return StepOutcome::Stop(self.error_result(
                    index,
                    &name,
                    wait_display,
                    format!("failed to evaluate 'with': {e}"),
                ));
            }
        };
        let args = match self.build_args(step, &ctx_value) {
            Ok(a) => a,
            Err(e) => {
                return StepOutcome::Stop(self.error_result(
                    index,
                    &name,
                    wait_display,
                    format!("failed to evaluate args: {e}"),
                ));
            }
        };

        let retry = step.retry.clone().unwrap_or(Retry {
            max_attempts: 1,
            interval: None,
            initial_delay: None,
        });
        let max_attempts = retry.max_attempts.max(1);

        if let Some(delay) = retry.initial_delay {
            sleep(delay.0).await;
        }

        let started = Instant::now();
        let mut last: Result<Map<String, Value>, ActionError> = Err(ActionError::Failed {
            name: step.uses.clone(),
            message: "no attempts made".to_string(),
        });

        for attempt in 1..=max_attempts {
            let result = self
                .action_runner
                .run_action(&step.uses, &args, &params, self.verbose)
                .await;
            let succeeded = matches!(&result, Ok(map) if status_of(map) == 0);
            last = result;
            if succeeded || attempt == max_attempts {
                break;
            }
            if let Some(interval) = retry.interval {
                sleep(interval.0).await;
            }
        }
        let elapsed = started.elapsed();

        let action_result = match last {
            Err(e) => {
                return StepOutcome::Stop(self.error_result(
                    index,
                    &name,
                    wait_display,
                    format!("action '{}' failed: {e}", step.uses),
                ));
            }
            Ok(map) => map,
        };

        // --- Phase 3: process result ---------------------------------------
        self.process_result(ctx, &action_result, elapsed);

        // --- Phase 4: finalize -----------------------------------------------
        let value_ctx = ctx.to_value(self.outputs.snapshot().await);

        let (status, has_test, test_output) = if let Some(test_expr) = &step.test {
            match self.evaluator.eval_test(test_expr, &value_ctx) {
                Ok(true) => (StepStatus::Success, true, None),
                Ok(false) => (
                    StepStatus::Error,
                    true,
                    Some(format!(
                        "req: {}\nres: {}",
                        Value::Object(ctx.req.clone()),
                        Value::Object(ctx.res.clone())
                    )),
                ),
                Err(ExprError::NotBoolean { expr, got }) => (
                    StepStatus::Error,
                    true,
                    Some(format!(
                        "test '{expr}' must evaluate to a boolean, got {got}"
                    )),
                ),
                Err(e) => (StepStatus::Error, true, Some(e.to_string())),
            }
        } else {
            (StepStatus::Warning, false, None)
        };

        let echo_output = step.echo.as_ref().map(|echo| {
            self.evaluator
                .eval_template(echo, &value_ctx)
                .unwrap_or_else(|e| format!("error: {e}"))
        });

        if let (Some(outputs_decl), Some(step_id)) = (&step.outputs, &step.id) {
            for (output_name, expr_value) in outputs_decl {
                let Some(expr) = expr_value.as_str() else {
                    continue;
                };
                match self.evaluator.eval(expr, &value_ctx) {
                    Ok(value) => self.outputs.publish(step_id, output_name, value).await,
                    Err(e) => {
                        tracing::warn!(error = %e, output = output_name, "output expression failed to evaluate");
                    }
                }
            }
        }

        StepOutcome::Continue(StepResult {
            index,
            name,
            status,
            rt_display: Some(ctx.rt_display.clone()),
            rt_secs: Some(ctx.rt_secs),
            wait_display,
            test_output,
            echo_output,
            report: ctx.report.clone(),
            has_test,
            repeat_counter: None,
        })
    }

    fn build_params(
        &self,
        step: &Step,
        job_defaults: &Map<String, Value>,
        ctx_value: &Value,
    ) -> Result<Map<String, Value>, ExprError> {
        let mut merged = job_defaults.clone();
        for (k, v) in &step.with {
            merged.insert(k.clone(), v.clone());
        }
        let templated = self
            .evaluator
            .eval_template_map(&Value::Object(merged), ctx_value)?;
        Ok(templated.as_object().cloned().unwrap_or_default())
    }

    fn build_args(&self, step: &Step, ctx_value: &Value) -> Result<Vec<String>, ExprError> {
        step.args
            .iter()
            .map(|arg| self.evaluator.eval_template(arg, ctx_value))
            .collect()
    }

    fn process_result(&self, ctx: &mut StepContext, map: &Map<String, Value>, elapsed: Duration) {
        ctx.req = map
            .get("req")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut res = map
            .get("res")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(Value::String(body)) = res.get("body").cloned() {
            let trimmed = body.trim();
            let looks_json = matches!(
                (trimmed.chars().next(), trimmed.chars().last()),
                (Some('{'), Some('}')) | (Some('['), Some(']'))
            );
            if looks_json {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed) => {
                        res.insert("rawbody".into(), Value::String(body));
                        res.insert("body".into(), parsed);
                    }
                    Err(e) => {
                        res.insert("rawbody".into(), Value::String(body));
                        res.insert("body".into(), json!({ "error_message": e.to_string() }));
                    }
                }
            }
        }
        ctx.report = res.get("report").and_then(Value::as_str).map(String::from);
        ctx.res = res;

        let rt_str = map
            .get("rt")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| humantime::format_duration(elapsed).to_string());
        let rt_secs = humantime::parse_duration(&rt_str)
            .map(|d| d.as_secs_f64())
            .unwrap_or_else(|_| elapsed.as_secs_f64());
        ctx.rt_display = rt_str;
        ctx.rt_secs = rt_secs;

        ctx.status = map.get("status").and_then(Value::as_i64).unwrap_or(0);
    }

    fn error_result(
        &self,
        index: usize,
        name: &str,
        wait_display: Option<String>,
        message: String,
    ) -> StepResult {
        StepResult {
            index,
            name: name.to_string(),
            status: StepStatus::Error,
            rt_display: None,
            rt_secs: None,
            wait_display,
            test_output: Some(message),
            echo_output: None,
            report: None,
            has_test: false,
            repeat_counter: None,
        }
    }
}

fn status_of(map: &Map<String, Value>) -> i64 {
    map.get("status").and_then(Value::as_i64).unwrap_or(0)
}
