//! The step context — everything an expression can see while evaluating
//! `test`, `skipif`, `echo`, `with`, or `outputs`.

use serde_json::{json, Map, Value};

/// Mutable state carried across the steps of a single job iteration.
///
/// `req`/`res`/`rt`/`status`/`report` reflect the *most recent* step's
/// action result; they are overwritten after each step's process phase.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub vars: Map<String, Value>,
    pub req: Map<String, Value>,
    pub res: Map<String, Value>,
    pub rt_display: String,
    pub rt_secs: f64,
    pub status: i64,
    pub report: Option<String>,
    pub repeat_index: u32,
}

impl StepContext {
    pub fn new(vars: Map<String, Value>) -> Self {
        Self {
            vars,
            ..Default::default()
        }
    }

    /// Assemble the JSON object expressions evaluate against, given a fresh
    /// snapshot of the outputs store.
    pub fn to_value(&self, outputs_snapshot: Value) -> Value {
        json!({
            "vars": self.vars,
            "req": self.req,
            "res": self.res,
            "rt": { "duration": self.rt_display, "sec": self.rt_secs },
            "status": self.status,
            "outputs": outputs_snapshot,
            "repeat_index": self.repeat_index,
            "report": self.report,
        })
    }

    /// Layer `overrides` on top of `base` (later/overrides wins) for an
    /// iteration entry's `vars` merge.
    pub fn with_override(base: &Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = base.clone();
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}
