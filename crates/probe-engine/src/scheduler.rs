//! Live scheduler state: per-job status, success flag, and repeat counters,
//! guarded by a `tokio::sync::RwLock` the way `boternity-core`'s
//! `scheduler.rs`/`executor.rs` guard shared run state — jobs here run
//! concurrently, so the readiness-query-then-mutate pattern needs a lock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::dag::{assign_job_ids, validate};
use crate::models::Job;
use crate::EngineError;

/// Busy-wait back-off when no job is runnable and none can be failed yet.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    success: bool,
}

/// Registers jobs, validates the `needs` DAG, and exposes the live
/// readiness API that drives the DAG path of the workflow driver. A job's
/// own repeat loop (if any) runs entirely inside `JobExecutor::run` — the
/// scheduler only ever sees a job as a single pending/running/terminal
/// unit, regardless of how many times it repeats internally.
pub struct Scheduler {
    jobs: HashMap<String, Job>,
    declared_order: Vec<String>,
    state: RwLock<HashMap<String, JobState>>,
}

impl Scheduler {
    /// Assign ids, validate the DAG, and build the initial (all-pending)
    /// state. Declared order is preserved for report rendering, independent
    /// of the topological order validation computes.
    pub fn new(jobs: Vec<Job>) -> Result<Self, EngineError> {
        let jobs = assign_job_ids(jobs)?;
        validate(&jobs)?;

        let declared_order: Vec<String> = jobs.iter().map(|j| j.id.clone().unwrap()).collect();
        let mut state = HashMap::new();
        let mut by_id = HashMap::new();

        for job in jobs {
            let id = job.id.clone().unwrap();
            state.insert(
                id.clone(),
                JobState {
                    status: JobStatus::Pending,
                    success: true,
                },
            );
            by_id.insert(id, job);
        }

        Ok(Self {
            jobs: by_id,
            declared_order,
            state: RwLock::new(state),
        })
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn declared_order(&self) -> &[String] {
        &self.declared_order
    }

    /// Jobs that are pending and whose every dependency has fully completed
    /// successfully.
    pub async fn runnable(&self) -> Vec<String> {
        let state = self.state.read().await;
        self.declared_order
            .iter()
            .filter(|id| {
                let Some(s) = state.get(id.as_str()) else {
                    return false;
                };
                if s.status != JobStatus::Pending {
                    return false;
                }
                self.jobs[id.as_str()].needs.iter().all(|dep| {
                    state
                        .get(dep.as_str())
                        .map(|d| d.status == JobStatus::Completed && d.success)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect()
    }

    pub async fn mark_running(&self, id: &str) {
        if let Some(s) = self.state.write().await.get_mut(id) {
            s.status = JobStatus::Running;
        }
    }

    pub async fn mark_terminal(&self, id: &str, success: bool) {
        if let Some(s) = self.state.write().await.get_mut(id) {
            s.status = if success {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            s.success = success;
        }
    }

    /// Transition every pending job with a failed/unsuccessful dependency
    /// straight to failed, returning the ids that were transitioned.
    pub async fn mark_jobs_with_failed_dependencies(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        let mut skipped = Vec::new();
        for id in &self.declared_order {
            let is_pending = state
                .get(id.as_str())
                .map(|s| s.status == JobStatus::Pending)
                .unwrap_or(false);
            if !is_pending {
                continue;
            }
            let has_failed_dep = self.jobs[id.as_str()].needs.iter().any(|dep| {
                state
                    .get(dep.as_str())
                    .map(|d| d.status == JobStatus::Failed || (d.status == JobStatus::Completed && !d.success))
                    .unwrap_or(false)
            });
            if has_failed_dep {
                if let Some(s) = state.get_mut(id.as_str()) {
                    s.status = JobStatus::Failed;
                    s.success = false;
                }
                skipped.push(id.clone());
            }
        }
        skipped
    }

    pub async fn all_terminal(&self) -> bool {
        let state = self.state.read().await;
        state
            .values()
            .all(|s| matches!(s.status, JobStatus::Completed | JobStatus::Failed))
    }

    /// Outcome recorded by `mark_terminal`, read back for exit-code purposes.
    pub async fn overall_success(&self) -> bool {
        let state = self.state.read().await;
        state.values().all(|s| s.success)
    }

    /// Sleep the scheduler's idle back-off — called by the driver when no
    /// job was runnable and none could be failed-propagated this tick.
    pub async fn idle_backoff(&self) {
        sleep(IDLE_BACKOFF).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn job(name: &str, needs: &[&str]) -> Job {
        Job {
            name: name.to_string(),
            id: None,
            needs: needs.iter().map(|s| s.to_string()).collect(),
            defaults: Map::new(),
            repeat: None,
            steps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn independent_jobs_are_all_runnable_immediately() {
        let scheduler = Scheduler::new(vec![job("a", &[]), job("b", &[])]).unwrap();
        let runnable = scheduler.runnable().await;
        assert_eq!(runnable.len(), 2);
    }

    #[tokio::test]
    async fn dependent_job_becomes_runnable_only_after_dependency_completes() {
        let scheduler = Scheduler::new(vec![job("setup", &[]), job("test", &["setup"])]).unwrap();
        assert_eq!(scheduler.runnable().await, vec!["setup".to_string()]);

        scheduler.mark_running("setup").await;
        assert!(scheduler.runnable().await.is_empty());

        scheduler.mark_terminal("setup", true).await;
        assert_eq!(scheduler.runnable().await, vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn failed_dependency_propagates_to_dependent() {
        let scheduler = Scheduler::new(vec![job("a", &[]), job("b", &["a"])]).unwrap();
        scheduler.mark_running("a").await;
        scheduler.mark_terminal("a", false).await;

        let skipped = scheduler.mark_jobs_with_failed_dependencies().await;
        assert_eq!(skipped, vec!["b".to_string()]);
        assert!(!scheduler.overall_success().await);
    }
}
