//! `MockActionRunner` — a test double for `ActionRunner`.
//!
//! A test double that can stand in for an entire workflow's worth of
//! actions at once, with a distinct scripted behaviour per action name.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{ActionError, ActionRunner};

/// Behaviour injected into `MockActionRunner` for a given action name.
pub enum MockBehaviour {
    /// Return a specific set of outputs.
    Return(Map<String, Value>),
    /// Fail with an `ActionError::Failed`.
    Fail(String),
    /// Panic instead of returning, to exercise a caller's panic recovery.
    Panic(String),
}

#[derive(Default)]
struct Recorded {
    calls: Vec<(Vec<String>, Map<String, Value>)>,
}

/// A runner that dispatches to a programmer-specified behaviour per action
/// name and records every call it receives.
#[derive(Default)]
pub struct MockActionRunner {
    behaviours: Mutex<HashMap<String, MockBehaviour>>,
    calls: Mutex<HashMap<String, Recorded>>,
}

impl MockActionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `name` to always return `outputs`.
    pub fn on_return(self, name: impl Into<String>, outputs: Map<String, Value>) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.into(), MockBehaviour::Return(outputs));
        self
    }

    /// Script `name` to always fail with `message`.
    pub fn on_fail(self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.into(), MockBehaviour::Fail(message.into()));
        self
    }

    /// Script `name` to always panic with `message`.
    pub fn on_panic(self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.into(), MockBehaviour::Panic(message.into()));
        self
    }

    /// Number of times `name` was invoked.
    pub fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.calls.len())
            .unwrap_or(0)
    }

    /// All `(args, params)` pairs `name` was invoked with, in call order.
    pub fn calls_for(&self, name: &str) -> Vec<(Vec<String>, Map<String, Value>)> {
        self.calls
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActionRunner for MockActionRunner {
    async fn run_action(
        &self,
        name: &str,
        args: &[String],
        params: &Map<String, Value>,
        _verbose: bool,
    ) -> Result<Map<String, Value>, ActionError> {
        self.calls
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .calls
            .push((args.to_vec(), params.clone()));

        let behaviour = {
            let behaviours = self.behaviours.lock().unwrap();
            match behaviours.get(name) {
                Some(MockBehaviour::Return(outputs)) => Some(Ok(outputs.clone())),
                Some(MockBehaviour::Fail(message)) => Some(Err(ActionError::Failed {
                    name: name.to_string(),
                    message: message.clone(),
                })),
                Some(MockBehaviour::Panic(message)) => {
                    let message = message.clone();
                    drop(behaviours);
                    panic!("{message}");
                }
                None => None,
            }
        };
        behaviour.unwrap_or_else(|| Err(ActionError::NotFound(name.to_string())))
    }
}
