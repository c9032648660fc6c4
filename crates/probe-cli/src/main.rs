//! `probe` CLI entry point.
//!
//! ```text
//! probe <workflow-path> [--verbose] [--rt] [--env-file PATH] [--timeout-secs N]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use probe_actions::ShellActionRunner;
use probe_engine::{Workflow, WorkflowDriver};
use probe_report::{Printer, StdoutSink};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "probe", about = "YAML-driven workflow automation engine", version)]
struct Cli {
    /// Path to the workflow YAML file.
    workflow_path: PathBuf,

    /// Raise logging to debug and pass a verbose flag through to the action
    /// runner.
    #[arg(long)]
    verbose: bool,

    /// Include per-step response time in the rendered report.
    #[arg(long)]
    rt: bool,

    /// Optional `.env`-style file loaded before workflow `vars` are
    /// evaluated, merged under the process environment (lower precedence).
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Override the expression evaluator's per-evaluation timeout.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(path) = &cli.env_file {
        if let Err(e) = load_env_file(path) {
            eprintln!("failed to load env file {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    }

    let source = match std::fs::read_to_string(&cli.workflow_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read {}: {e}", cli.workflow_path.display());
            return ExitCode::FAILURE;
        }
    };

    let workflow: Workflow = match Workflow::from_yaml(&source) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("invalid workflow: {e}");
            return ExitCode::FAILURE;
        }
    };

    let action_runner = Arc::new(ShellActionRunner);
    let driver = match cli.timeout_secs {
        Some(secs) => {
            WorkflowDriver::with_timeout(action_runner, cli.verbose, Duration::from_secs(secs))
        }
        None => WorkflowDriver::new(action_runner, cli.verbose),
    };

    let started = Instant::now();
    let report = match driver.run(workflow.clone()).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("workflow run failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let printer = Printer::new(cli.rt);
    let sink = StdoutSink;
    printer.render(
        &sink,
        &workflow.name,
        workflow.description.as_deref(),
        &report.jobs,
        started.elapsed(),
    );

    if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "probe=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parse a minimal `.env`-style file (`KEY=VALUE` per line, `#` comments),
/// setting variables only where the process environment doesn't already
/// have them — the file is lower precedence than the real environment.
fn load_env_file(path: &std::path::Path) -> std::io::Result<()> {
    let content = std::fs::read_to_string(path)?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if std::env::var_os(key).is_none() {
                std::env::set_var(key, value.trim());
            }
        }
    }
    Ok(())
}
