//! The job executor — runs one job's steps in order, including its whole
//! repeat loop, and folds the result into the shared `ResultStore`.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::time::sleep;
use tracing::instrument;

use crate::context::StepContext;
use crate::models::Job;
use crate::results::{RepeatCounter, ResultStore, StepResult, StepStatus};
use crate::step_executor::{StepExecutor, StepOutcome};

/// Per-step-index accumulator across a repeating job's iterations.
struct StepAggregate {
    index: usize,
    name: String,
    success: u32,
    failure: u32,
    last_status: StepStatus,
    has_test: bool,
}

impl StepAggregate {
    fn into_result(self) -> StepResult {
        let total = self.success + self.failure;
        StepResult {
            index: self.index,
            name: format!("{} (repeating {total} times)", self.name),
            status: self.last_status,
            rt_display: None,
            rt_secs: None,
            wait_display: None,
            test_output: None,
            echo_output: None,
            report: None,
            has_test: self.has_test,
            repeat_counter: Some(RepeatCounter {
                success: self.success,
                failure: self.failure,
                last_status: self.last_status,
            }),
        }
    }
}

pub struct JobExecutor {
    step_executor: Arc<StepExecutor>,
    results: Arc<ResultStore>,
}

impl JobExecutor {
    pub fn new(step_executor: Arc<StepExecutor>, results: Arc<ResultStore>) -> Self {
        Self {
            step_executor,
            results,
        }
    }

    /// Run `job` to completion, seeding every iteration's context with
    /// `vars` (the already-templated workflow-level variables). Returns
    /// whether every step's assertions held across every iteration.
    #[instrument(skip_all, fields(job = %job.id.as_deref().unwrap_or(&job.name)))]
    pub async fn run(&self, job: &Job, vars: Map<String, Value>) -> bool {
        let id = job.id.clone().unwrap_or_else(|| job.name.clone());
        self.results.start_job(&id, &job.name).await;

        let target = job.repeat.as_ref().map(|r| r.count).unwrap_or(1);
        let repeating = job.repeat.is_some();
        let mut aggregates: Vec<Option<StepAggregate>> = Vec::new();
        let mut job_success = true;
        let mut stopped = false;

        'iterations: for iteration in 0..target {
            let mut ctx = StepContext::new(vars.clone());
            ctx.repeat_index = iteration;

            for (index, step) in job.steps.iter().enumerate() {
                let outcomes = self
                    .step_executor
                    .run(index, step, &job.defaults, &mut ctx)
                    .await;

                for outcome in outcomes {
                    let (result, stop) = match outcome {
                        StepOutcome::Continue(r) => (r, false),
                        StepOutcome::Stop(r) => (r, true),
                    };

                    if result.status == StepStatus::Error {
                        job_success = false;
                    }

                    if repeating {
                        fold_into_aggregate(&mut aggregates, index, &result);
                    } else {
                        self.results.append_step(&id, result).await;
                    }

                    if stop {
                        stopped = true;
                        break 'iterations;
                    }
                }
            }

            if iteration + 1 < target {
                if let Some(interval) = job.repeat.as_ref().and_then(|r| r.interval) {
                    sleep(interval.0).await;
                }
            }
        }

        if repeating {
            for agg in aggregates.into_iter().flatten() {
                self.results.append_step(&id, agg.into_result()).await;
            }
        }

        if stopped {
            job_success = false;
        }

        let status = if job_success { "Completed" } else { "Failed" };
        self.results.finish_job(&id, job_success, status).await;
        job_success
    }
}

fn fold_into_aggregate(aggregates: &mut Vec<Option<StepAggregate>>, index: usize, result: &StepResult) {
    if aggregates.len() <= index {
        aggregates.resize_with(index + 1, || None);
    }
    let slot = &mut aggregates[index];
    let agg = slot.get_or_insert_with(|| StepAggregate {
        index,
        name: result.name.clone(),
        success: 0,
        failure: 0,
        last_status: result.status,
        has_test: false,
    });
    agg.name = result.name.clone();
    agg.has_test = agg.has_test || result.has_test;
    match result.status {
        StepStatus::Error => agg.failure += 1,
        StepStatus::Success | StepStatus::Warning | StepStatus::Skipped => agg.success += 1,
    }
    agg.last_status = result.status;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Repeat, Step};
    use crate::outputs::OutputsStore;
    use probe_actions::MockActionRunner;
    use probe_expr::Evaluator;
    use serde_json::json;

    fn step(uses: &str, test: Option<&str>) -> Step {
        Step {
            name: None,
            id: None,
            uses: uses.to_string(),
            args: Vec::new(),
            with: Map::new(),
            test: test.map(String::from),
            skipif: None,
            echo: None,
            wait: None,
            iteration: None,
            outputs: None,
            retry: None,
        }
    }

    fn job_executor(runner: MockActionRunner) -> (JobExecutor, Arc<ResultStore>) {
        let results = Arc::new(ResultStore::new());
        let step_executor = Arc::new(StepExecutor::new(
            Arc::new(runner),
            Arc::new(Evaluator::new()),
            Arc::new(OutputsStore::new()),
            false,
        ));
        (JobExecutor::new(step_executor, results.clone()), results)
    }

    #[tokio::test]
    async fn non_repeating_job_appends_each_step_individually() {
        let runner =
            MockActionRunner::new().on_return("noop", json!({"status": 0}).as_object().unwrap().clone());
        let (executor, results) = job_executor(runner);
        let job = Job {
            name: "job".to_string(),
            id: Some("job".to_string()),
            needs: Vec::new(),
            defaults: Map::new(),
            repeat: None,
            steps: vec![step("noop", Some("status == 0")), step("noop", None)],
        };

        let success = executor.run(&job, Map::new()).await;
        assert!(success);

        let snap = results.ordered_snapshot(&["job".to_string()]).await;
        assert_eq!(snap[0].steps.len(), 2);
        assert!(snap[0].steps[0].repeat_counter.is_none());
    }

    #[tokio::test]
    async fn repeating_job_aggregates_into_one_result_per_step() {
        let runner =
            MockActionRunner::new().on_return("noop", json!({"status": 0}).as_object().unwrap().clone());
        let (executor, results) = job_executor(runner);
        let job = Job {
            name: "job".to_string(),
            id: Some("job".to_string()),
            needs: Vec::new(),
            defaults: Map::new(),
            repeat: Some(Repeat {
                count: 3,
                interval: None,
            }),
            steps: vec![step("noop", Some("status == 0"))],
        };

        let success = executor.run(&job, Map::new()).await;
        assert!(success);

        let snap = results.ordered_snapshot(&["job".to_string()]).await;
        assert_eq!(snap[0].steps.len(), 1);
        let counter = snap[0].steps[0].repeat_counter.as_ref().unwrap();
        assert_eq!(counter.success, 3);
        assert_eq!(counter.failure, 0);
        assert!(snap[0].steps[0].name.contains("repeating 3 times"));
    }

    #[tokio::test]
    async fn repeat_count_zero_skips_the_job_without_running_any_step() {
        let runner =
            MockActionRunner::new().on_return("noop", json!({"status": 0}).as_object().unwrap().clone());
        let (executor, results) = job_executor(runner);
        let job = Job {
            name: "job".to_string(),
            id: Some("job".to_string()),
            needs: Vec::new(),
            defaults: Map::new(),
            repeat: Some(Repeat {
                count: 0,
                interval: None,
            }),
            steps: vec![step("noop", Some("status == 0"))],
        };

        let success = executor.run(&job, Map::new()).await;
        assert!(success);

        let snap = results.ordered_snapshot(&["job".to_string()]).await;
        assert_eq!(snap[0].status, "Completed");
        assert!(snap[0].steps.is_empty());
    }

    #[tokio::test]
    async fn hard_error_stops_the_job_and_marks_it_failed() {
        let runner = MockActionRunner::new().on_fail("broken", "boom");
        let (executor, results) = job_executor(runner);
        let job = Job {
            name: "job".to_string(),
            id: Some("job".to_string()),
            needs: Vec::new(),
            defaults: Map::new(),
            repeat: None,
            steps: vec![step("broken", None), step("broken", None)],
        };

        let success = executor.run(&job, Map::new()).await;
        assert!(!success);

        let snap = results.ordered_snapshot(&["job".to_string()]).await;
        assert_eq!(snap[0].status, "Failed");
        // second step never ran
        assert_eq!(snap[0].steps.len(), 1);
    }
}
