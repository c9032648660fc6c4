//! Core domain models for a workflow definition.
//!
//! These types are the source of truth for what a workflow looks like once
//! loaded from YAML. Unknown top-level keys are rejected via
//! `#[serde(deny_unknown_fields)]`, the idiomatic stand-in for a bespoke
//! "unknown keys are rejected by the parser" grammar.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Interval
// ---------------------------------------------------------------------------

/// A duration parsed from either a bare integer (seconds) or a duration
/// string (`"500ms"`, `"2m"`, `"1h30m"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval(pub Duration);

impl Interval {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IntervalVisitor;

        impl<'de> Visitor<'de> for IntervalVisitor {
            type Value = Interval;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer number of seconds or a duration string like '500ms'")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Interval, E> {
                Ok(Interval(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Interval, E> {
                Ok(Interval(Duration::from_secs(v.max(0) as u64)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Interval, E>
            where
                E: de::Error,
            {
                humantime::parse_duration(v)
                    .map(Interval)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IntervalVisitor)
    }
}

impl Serialize for Interval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

// ---------------------------------------------------------------------------
// Repeat / Retry
// ---------------------------------------------------------------------------

/// Whole-job repetition: run the step sequence `count` times, sleeping
/// `interval` between iterations. `count: 0` runs the job zero times — a
/// trivially successful no-op, not a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Repeat {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub interval: Option<Interval>,
}

/// Step-local retry until the action's returned `status == 0`, or a maximum
/// attempt count is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Retry {
    pub max_attempts: u32,
    #[serde(default)]
    pub interval: Option<Interval>,
    #[serde(default)]
    pub initial_delay: Option<Interval>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single action invocation plus its surrounding policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Display name; may itself be a `{{…}}` template. Defaults to "Unknown
    /// Step" if absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Required iff `outputs` is declared (enforced by `Workflow::validate`).
    #[serde(default)]
    pub id: Option<String>,
    /// Action identifier dispatched through `ActionRunner::run_action`.
    pub uses: String,
    /// Positional arguments, each template-evaluated before dispatch.
    #[serde(default)]
    pub args: Vec<String>,
    /// Keyed parameters; leaf values may be templates.
    #[serde(default)]
    pub with: Map<String, Value>,
    /// Assertion expression; must evaluate to a JSON boolean.
    #[serde(default)]
    pub test: Option<String>,
    /// Skip predicate; truthy (JS-like coercion) skips the step entirely.
    #[serde(default)]
    pub skipif: Option<String>,
    /// Diagnostic template, evaluated and recorded regardless of `test`.
    #[serde(default)]
    pub echo: Option<String>,
    /// Sleep before execution.
    #[serde(default)]
    pub wait: Option<Interval>,
    /// Expands this step into one logical execution per entry; each entry's
    /// map is merged into `vars` as an override layer.
    #[serde(default)]
    pub iteration: Option<Vec<Map<String, Value>>>,
    /// Name → expression. Requires `id` to be set.
    #[serde(default)]
    pub outputs: Option<Map<String, Value>>,
    #[serde(default)]
    pub retry: Option<Retry>,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A named, ordered sequence of steps that share a context and a repeat
/// schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    pub name: String,
    /// Unique within the workflow. Auto-generated from `name` (slugified,
    /// deduplicated with a numeric suffix) when absent — see
    /// [`crate::scheduler::assign_job_ids`].
    #[serde(default)]
    pub id: Option<String>,
    /// Job ids this job depends on.
    #[serde(default)]
    pub needs: Vec<String>,
    /// Per-action default parameters, merged under each step's `with`.
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub repeat: Option<Repeat>,
    pub steps: Vec<Step>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition, as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Workflow-level variables; values may be `{{…}}` expressions,
    /// evaluated once against the environment snapshot.
    #[serde(default)]
    pub vars: Map<String, Value>,
    pub jobs: Vec<Job>,
}

impl Workflow {
    /// Parse a workflow from its YAML source text.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// `true` iff no job declares `needs` — the flat-parallel path applies.
    pub fn is_flat(&self) -> bool {
        self.jobs.iter().all(|j| j.needs.is_empty())
    }
}

/// Lowercase-ASCII, non-alphanumeric-collapsed-to-`-` slug of `name`, used to
/// auto-generate a job id when one isn't declared explicitly.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}
