//! Drives a whole workflow to completion.
//!
//! Evaluates workflow-level `vars` once against an environment snapshot,
//! then takes the flat-parallel path (every job spawned at once, no `needs`
//! in the workflow) or the DAG/scheduler path (dispatch loop driven by
//! `Scheduler::runnable`) to run every job to completion.

use std::env;
use std::sync::Arc;

use probe_actions::ActionRunner;
use probe_expr::Evaluator;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tracing::{info, instrument};

use crate::dag::validate_step_ids;
use crate::job_executor::JobExecutor;
use crate::models::{Job, Workflow};
use crate::outputs::OutputsStore;
use crate::results::{JobResult, ResultStore};
use crate::scheduler::Scheduler;
use crate::step_executor::StepExecutor;
use crate::EngineError;

/// The complete outcome of a workflow run: per-job results in declared
/// order, the overall success flag that decides the process exit code, and
/// the run's correlation id for log lookups.
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub jobs: Vec<JobResult>,
    pub success: bool,
}

pub struct WorkflowDriver {
    action_runner: Arc<dyn ActionRunner>,
    evaluator: Arc<Evaluator>,
    verbose: bool,
}

impl WorkflowDriver {
    pub fn new(action_runner: Arc<dyn ActionRunner>, verbose: bool) -> Self {
        Self {
            action_runner,
            evaluator: Arc::new(Evaluator::new()),
            verbose,
        }
    }

    /// Override the expression evaluator's per-evaluation timeout (the
    /// CLI's `--timeout-secs`).
    pub fn with_timeout(
        action_runner: Arc<dyn ActionRunner>,
        verbose: bool,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            action_runner,
            evaluator: Arc::new(Evaluator::with_timeout(timeout)),
            verbose,
        }
    }

    #[instrument(skip_all, fields(workflow = %workflow.name, run_id = tracing::field::Empty))]
    pub async fn run(&self, workflow: Workflow) -> Result<RunReport, EngineError> {
        let run_id = uuid::Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        validate_step_ids(&workflow.jobs)?;

        let env_snapshot: Map<String, Value> =
            env::vars().map(|(k, v)| (k, Value::String(v))).collect();
        let vars_ctx = json!({ "env": env_snapshot });
        let vars = self
            .evaluator
            .eval_template_map(&Value::Object(workflow.vars.clone()), &vars_ctx)?
            .as_object()
            .cloned()
            .unwrap_or_default();

        let outputs = Arc::new(OutputsStore::new());
        let results = Arc::new(ResultStore::new());
        let step_executor = Arc::new(StepExecutor::new(
            self.action_runner.clone(),
            self.evaluator.clone(),
            outputs,
            self.verbose,
        ));
        let job_executor = Arc::new(JobExecutor::new(step_executor, results.clone()));

        let is_flat = workflow.is_flat();
        let declared_order: Vec<String> = workflow
            .jobs
            .iter()
            .map(|j| {
                j.id.clone()
                    .unwrap_or_else(|| crate::models::slugify(&j.name))
            })
            .collect();

        let success = if is_flat {
            run_flat(workflow.jobs, job_executor, vars).await
        } else {
            run_dag(workflow.jobs, job_executor, results.clone(), vars).await?
        };

        let jobs = results.ordered_snapshot(&declared_order).await;
        info!(success, job_count = jobs.len(), "workflow run finished");
        Ok(RunReport {
            run_id,
            jobs,
            success,
        })
    }
}

async fn run_flat(jobs: Vec<Job>, job_executor: Arc<JobExecutor>, vars: Map<String, Value>) -> bool {
    let mut set: JoinSet<bool> = JoinSet::new();
    for job in jobs {
        let job_executor = job_executor.clone();
        let vars = vars.clone();
        set.spawn(async move { job_executor.run(&job, vars).await });
    }

    let mut success = true;
    while let Some(res) = set.join_next().await {
        success &= res.unwrap_or(false);
    }
    success
}

async fn run_dag(
    jobs: Vec<Job>,
    job_executor: Arc<JobExecutor>,
    results: Arc<ResultStore>,
    vars: Map<String, Value>,
) -> Result<bool, EngineError> {
    let scheduler = Arc::new(Scheduler::new(jobs)?);
    let mut set: JoinSet<(String, bool)> = JoinSet::new();
    // join_next_with_id's Err(JoinError) arm (a panicking job task) carries
    // the tokio task id but not our job id, so track that mapping ourselves.
    let mut task_jobs: std::collections::HashMap<tokio::task::Id, String> =
        std::collections::HashMap::new();

    loop {
        for id in scheduler.runnable().await {
            scheduler.mark_running(&id).await;
            let job = scheduler
                .job(&id)
                .cloned()
                .expect("runnable id is always registered");
            let job_executor = job_executor.clone();
            let vars = vars.clone();
            let job_id = id.clone();
            let handle = set.spawn(async move {
                let success = job_executor.run(&job, vars).await;
                (job_id, success)
            });
            task_jobs.insert(handle.id(), id);
        }

        if let Some(done) = set.join_next_with_id().await {
            match done {
                Ok((task_id, (id, success))) => {
                    task_jobs.remove(&task_id);
                    scheduler.mark_terminal(&id, success).await;
                }
                Err(join_err) => {
                    // A job's task panicked. Tokio already isolated the
                    // unwind to that task; convert it into a clean failure
                    // instead of leaving the job (and the scheduler) stuck
                    // pending forever. The panic may have struck before the
                    // job ever recorded a `start_job`, so ensure an entry
                    // exists before finishing it.
                    if let Some(id) = task_jobs.remove(&join_err.id()) {
                        tracing::error!(job = %id, error = %join_err, "job task panicked");
                        if let Some(job) = scheduler.job(&id) {
                            results.start_job_if_absent(&id, &job.name).await;
                        }
                        results.finish_job(&id, false, "Panicked").await;
                        scheduler.mark_terminal(&id, false).await;
                    }
                }
            }
            continue;
        }

        // Nothing in flight and nothing runnable: either failed
        // dependencies need propagating, or the run is complete. Jobs
        // skipped this way never reach `JobExecutor::run`, so they get a
        // result entry recorded here instead, rendered distinctly from a
        // job that actually ran and failed.
        let newly_failed = scheduler.mark_jobs_with_failed_dependencies().await;
        for id in &newly_failed {
            if let Some(job) = scheduler.job(id) {
                results.start_job(id, &job.name).await;
                results
                    .finish_job(id, false, "Skipped (dependency failed)")
                    .await;
            }
        }
        if scheduler.all_terminal().await {
            break;
        }
        if newly_failed.is_empty() {
            scheduler.idle_backoff().await;
        }
    }

    Ok(scheduler.overall_success().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Step;
    use probe_actions::MockActionRunner;
    use serde_json::json;

    fn ok_step(uses: &str) -> Step {
        Step {
            name: None,
            id: None,
            uses: uses.to_string(),
            args: Vec::new(),
            with: Map::new(),
            test: Some("status == 0".to_string()),
            skipif: None,
            echo: None,
            wait: None,
            iteration: None,
            outputs: None,
            retry: None,
        }
    }

    fn job(name: &str, needs: &[&str]) -> Job {
        Job {
            name: name.to_string(),
            id: Some(name.to_string()),
            needs: needs.iter().map(|s| s.to_string()).collect(),
            defaults: Map::new(),
            repeat: None,
            steps: vec![ok_step("noop")],
        }
    }

    fn runner() -> Arc<dyn ActionRunner> {
        Arc::new(MockActionRunner::new().on_return(
            "noop",
            json!({"status": 0}).as_object().unwrap().clone(),
        ))
    }

    #[tokio::test]
    async fn flat_workflow_runs_all_independent_jobs() {
        let workflow = Workflow {
            name: "wf".to_string(),
            description: None,
            vars: Map::new(),
            jobs: vec![job("a", &[]), job("b", &[])],
        };
        let driver = WorkflowDriver::new(runner(), false);
        let report = driver.run(workflow).await.unwrap();
        assert!(report.success);
        assert_eq!(report.jobs.len(), 2);
    }

    #[tokio::test]
    async fn dag_workflow_respects_declared_order_in_the_report() {
        let workflow = Workflow {
            name: "wf".to_string(),
            description: None,
            vars: Map::new(),
            jobs: vec![job("b", &["a"]), job("a", &[])],
        };
        let driver = WorkflowDriver::new(runner(), false);
        let report = driver.run(workflow).await.unwrap();
        assert!(report.success);
        assert_eq!(report.jobs[0].id, "b");
        assert_eq!(report.jobs[1].id, "a");
    }

    #[tokio::test]
    async fn failed_dependency_fails_the_dependent_job_without_running_it() {
        let runner = Arc::new(MockActionRunner::new().on_fail("noop", "boom"));
        let workflow = Workflow {
            name: "wf".to_string(),
            description: None,
            vars: Map::new(),
            jobs: vec![job("a", &[]), job("b", &["a"])],
        };
        let driver = WorkflowDriver::new(runner, false);
        let report = driver.run(workflow).await.unwrap();
        assert!(!report.success);
        let b = report.jobs.iter().find(|j| j.id == "b").unwrap();
        assert!(b.steps.is_empty());
    }

    #[tokio::test]
    async fn panicking_job_fails_cleanly_instead_of_hanging() {
        // `b` depends on `a` so the workflow takes the DAG/scheduler path
        // (`is_flat` is false) rather than the flat-parallel one.
        let runner = Arc::new(
            MockActionRunner::new()
                .on_panic("broken", "kaboom")
                .on_return("noop", json!({"status": 0}).as_object().unwrap().clone()),
        );
        let mut panics = job("a", &[]);
        panics.steps = vec![ok_step("broken")];
        let workflow = Workflow {
            name: "wf".to_string(),
            description: None,
            vars: Map::new(),
            jobs: vec![panics, job("b", &["a"])],
        };
        let driver = WorkflowDriver::new(runner, false);
        let report = tokio::time::timeout(std::time::Duration::from_secs(5), driver.run(workflow))
            .await
            .expect("run_dag must not hang when a job task panics")
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.jobs.len(), 2);
        let a = report.jobs.iter().find(|j| j.id == "a").unwrap();
        assert_eq!(a.status, "Panicked");
        assert!(!a.success);
        let b = report.jobs.iter().find(|j| j.id == "b").unwrap();
        assert!(!b.success);
        assert!(b.steps.is_empty());
    }
}
