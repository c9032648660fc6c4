//! Per-job result buffers — the data the printer renders into a report.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Outcome of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Error,
    Warning,
    Skipped,
}

/// `success`/`failure` counts across a repeating job's iterations for one
/// step index, plus the most recent iteration's status.
#[derive(Debug, Clone)]
pub struct RepeatCounter {
    pub success: u32,
    pub failure: u32,
    pub last_status: StepStatus,
}

/// The recorded outcome of one step execution (or, for a repeating job, one
/// step index's aggregate across all iterations).
#[derive(Debug, Clone)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub rt_display: Option<String>,
    pub rt_secs: Option<f64>,
    pub wait_display: Option<String>,
    pub test_output: Option<String>,
    pub echo_output: Option<String>,
    pub report: Option<String>,
    pub has_test: bool,
    pub repeat_counter: Option<RepeatCounter>,
}

impl StepResult {
    pub fn skipped(index: usize, name: String) -> Self {
        Self {
            index,
            name,
            status: StepStatus::Skipped,
            rt_display: None,
            rt_secs: None,
            wait_display: None,
            test_output: None,
            echo_output: None,
            report: None,
            has_test: false,
            repeat_counter: None,
        }
    }
}

/// One job's complete outcome: identity, timing, and its ordered step
/// results.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub id: String,
    pub name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub steps: Vec<StepResult>,
}

impl JobResult {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: "Running".to_string(),
            started_at: Utc::now(),
            ended_at: None,
            success: true,
            steps: Vec::new(),
        }
    }
}

/// Thread-safe per-job buffers, keyed by job id. A per-job lock protects
/// append and snapshot (in practice: one `RwLock` over the whole map, since
/// jobs never contend on each other's buffers in this engine's dispatch
/// model — only the map structure itself is shared).
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: RwLock<HashMap<String, JobResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start_job(&self, id: &str, name: &str) {
        self.inner
            .write()
            .await
            .insert(id.to_string(), JobResult::new(id, name));
    }

    /// Like `start_job`, but leaves an already-started job's buffered steps
    /// alone. Used where a job may need a result entry recorded without
    /// knowing whether it ever got to call `start_job` itself (e.g. a task
    /// that panicked before reaching its first line).
    pub async fn start_job_if_absent(&self, id: &str, name: &str) {
        self.inner
            .write()
            .await
            .entry(id.to_string())
            .or_insert_with(|| JobResult::new(id, name));
    }

    pub async fn append_step(&self, job_id: &str, step: StepResult) {
        if let Some(job) = self.inner.write().await.get_mut(job_id) {
            job.steps.push(step);
        }
    }

    pub async fn finish_job(&self, job_id: &str, success: bool, status: &str) {
        if let Some(job) = self.inner.write().await.get_mut(job_id) {
            job.success = success;
            job.status = status.to_string();
            job.ended_at = Some(Utc::now());
        }
    }

    /// Snapshot jobs in the order given by `declared_order`, regardless of
    /// the order they finished in.
    pub async fn ordered_snapshot(&self, declared_order: &[String]) -> Vec<JobResult> {
        let guard = self.inner.read().await;
        declared_order
            .iter()
            .filter_map(|id| guard.get(id).cloned())
            .collect()
    }
}
