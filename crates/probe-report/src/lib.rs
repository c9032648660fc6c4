//! `probe-report` — renders a finished workflow run into the printed report:
//! header, per-job blocks in declared order with tree-glyph-prefixed step
//! lines, footer.
//!
//! A `PrintSink` is threaded through instead of writing straight to stdout,
//! so the renderer stays deterministic and testable without a global
//! stdout redirect.

use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use probe_engine::{JobResult, RepeatCounter, StepResult, StepStatus};

/// Destination for one rendered line of the report. Implementations decide
/// whether/how to buffer — the printer itself renders deterministically in
/// declared-job order regardless of execution interleaving.
pub trait PrintSink: Send + Sync {
    fn line(&self, text: &str);
}

/// Writes every line straight to stdout via `println!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl PrintSink for StdoutSink {
    fn line(&self, text: &str) {
        println!("{text}");
    }
}

/// Renders a `RunReport`'s jobs into the printed report format.
pub struct Printer {
    show_rt: bool,
}

impl Printer {
    pub fn new(show_rt: bool) -> Self {
        Self { show_rt }
    }

    pub fn render(
        &self,
        sink: &dyn PrintSink,
        workflow_name: &str,
        description: Option<&str>,
        jobs: &[JobResult],
        elapsed: Duration,
    ) {
        sink.line(&workflow_name.bold().to_string());
        if let Some(desc) = description {
            sink.line(&desc.dimmed().to_string());
        }
        sink.line("");

        let mut failures = 0usize;
        for job in jobs {
            if !job.success {
                failures += 1;
            }
            self.render_job(sink, job);
        }

        sink.line("");
        let footer = if failures == 0 {
            "All jobs succeeded".green().bold().to_string()
        } else {
            format!("{failures} job(s) failed").red().bold().to_string()
        };
        sink.line(&format!(
            "{footer} ({})",
            format_duration(elapsed)
        ));
    }

    fn render_job(&self, sink: &dyn PrintSink, job: &JobResult) {
        let icon = job_icon(job);
        let elapsed = job
            .ended_at
            .map(|end| job_duration(job.started_at, end))
            .unwrap_or_default();
        sink.line(&format!(
            "{icon} {} ({} in {})",
            job.name.bold(),
            job.status,
            format_duration(elapsed)
        ));

        let last = job.steps.len().saturating_sub(1);
        for (i, step) in job.steps.iter().enumerate() {
            let glyph = if i == last { "└─" } else { "├─" };
            let continuation = if i == last { "   " } else { "│  " };
            for (line_idx, line) in self.render_step(step).into_iter().enumerate() {
                if line_idx == 0 {
                    sink.line(&format!("{glyph} {line}"));
                } else {
                    sink.line(&format!("{continuation}{line}"));
                }
            }
        }
    }

    fn render_step(&self, step: &StepResult) -> Vec<String> {
        let icon = step_icon(step.status);
        let wait = step
            .wait_display
            .as_ref()
            .map(|w| format!("{w} → "))
            .unwrap_or_default();
        let rt = if self.show_rt {
            step.rt_display
                .as_ref()
                .map(|rt| format!(" ({rt})"))
                .unwrap_or_default()
        } else {
            String::new()
        };

        let mut lines = vec![format!(
            "{}. {icon} {wait}{}{rt}",
            step.index + 1,
            step.name
        )];

        if let Some(counter) = &step.repeat_counter {
            lines.push(render_repeat_summary(counter));
        }
        if let Some(test_output) = &step.test_output {
            lines.extend(test_output.lines().map(String::from));
        }
        if let Some(echo) = &step.echo_output {
            lines.extend(echo.lines().map(String::from));
        }

        lines
    }
}

fn render_repeat_summary(counter: &RepeatCounter) -> String {
    let total = counter.success + counter.failure;
    match counter.last_status {
        StepStatus::Warning => format!("{}/{total} completed (no test)", counter.success),
        _ => {
            let pct = if total == 0 {
                0.0
            } else {
                (counter.success as f64 / total as f64) * 100.0
            };
            format!("{}/{total} success ({pct:.0}%)", counter.success)
        }
    }
}

fn job_icon(job: &JobResult) -> colored::ColoredString {
    if job.success {
        "✔".green()
    } else if job.status.starts_with("Skipped") {
        "⏭".blue()
    } else {
        "✘".red()
    }
}

fn step_icon(status: StepStatus) -> colored::ColoredString {
    match status {
        StepStatus::Success => "✔".green(),
        StepStatus::Error => "✘".red(),
        StepStatus::Warning => "⚠".yellow(),
        StepStatus::Skipped => "⏭".blue(),
    }
}

fn job_duration(started: DateTime<Utc>, ended: DateTime<Utc>) -> Duration {
    (ended - started).to_std().unwrap_or_default()
}

fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_engine::{JobResult, StepResult, StepStatus};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        lines: Mutex<Vec<String>>,
    }

    impl PrintSink for CapturingSink {
        fn line(&self, text: &str) {
            self.lines.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn renders_header_job_block_and_footer() {
        let mut job = JobResult::new("auth", "Authenticate");
        job.success = true;
        job.status = "Completed".to_string();
        job.ended_at = Some(job.started_at);
        job.steps.push(StepResult {
            index: 0,
            name: "login".to_string(),
            status: StepStatus::Success,
            rt_display: Some("12ms".to_string()),
            rt_secs: Some(0.012),
            wait_display: None,
            test_output: None,
            echo_output: None,
            report: None,
            has_test: true,
            repeat_counter: None,
        });

        let sink = CapturingSink::default();
        let printer = Printer::new(false);
        printer.render(&sink, "wf", Some("desc"), &[job], Duration::from_secs(1));

        let lines = sink.lines.lock().unwrap();
        assert!(lines.iter().any(|l| l.contains("wf")));
        assert!(lines.iter().any(|l| l.contains("login")));
        assert!(lines.iter().any(|l| l.contains("All jobs succeeded")));
    }

    #[test]
    fn failed_job_produces_failure_footer() {
        let mut job = JobResult::new("a", "Job A");
        job.success = false;
        job.status = "Failed".to_string();
        job.ended_at = Some(job.started_at);

        let sink = CapturingSink::default();
        let printer = Printer::new(false);
        printer.render(&sink, "wf", None, &[job], Duration::from_secs(1));

        let lines = sink.lines.lock().unwrap();
        assert!(lines.iter().any(|l| l.contains("job(s) failed")));
    }

    #[test]
    fn repeat_counter_renders_aggregate_summary() {
        let counter = RepeatCounter {
            success: 2,
            failure: 1,
            last_status: StepStatus::Error,
        };
        assert_eq!(render_repeat_summary(&counter), "2/3 success (67%)");
    }
}
