//! The outputs store — process-wide `step-id → name → value` mapping.
//!
//! Writes are serialized by an exclusive lock; reads take a shared lock and
//! return a deep copy so expression evaluation never races a writer.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct OutputsStore {
    inner: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl OutputsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name = value` under `step_id`. First writer wins: if `name`
    /// is already present under `step_id`, the write is dropped and a
    /// warning is logged rather than treated as fatal.
    pub async fn publish(&self, step_id: &str, name: &str, value: Value) {
        let mut guard = self.inner.write().await;
        let bucket = guard.entry(step_id.to_string()).or_default();
        if bucket.contains_key(name) {
            tracing::warn!(
                step_id,
                name,
                "output already published under this step id and name; keeping first writer"
            );
            return;
        }
        bucket.insert(name.to_string(), value);
    }

    /// Deep-copy snapshot of the whole store, shaped as
    /// `{ "<step_id>": { "<name>": value, ... }, ... }` for use as the
    /// `outputs` key in an expression context.
    pub async fn snapshot(&self) -> Value {
        let guard = self.inner.read().await;
        let mut out = serde_json::Map::new();
        for (step_id, names) in guard.iter() {
            let mut inner = serde_json::Map::new();
            for (name, value) in names {
                inner.insert(name.clone(), value.clone());
            }
            out.insert(step_id.clone(), Value::Object(inner));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_then_snapshot_round_trips() {
        let store = OutputsStore::new();
        store.publish("login", "token", json!("abc123")).await;
        let snap = store.snapshot().await;
        assert_eq!(snap["login"]["token"], json!("abc123"));
    }

    #[tokio::test]
    async fn first_writer_wins_on_conflict() {
        let store = OutputsStore::new();
        store.publish("login", "token", json!("first")).await;
        store.publish("login", "token", json!("second")).await;
        let snap = store.snapshot().await;
        assert_eq!(snap["login"]["token"], json!("first"));
    }

    #[tokio::test]
    async fn snapshot_of_empty_store_is_empty_object() {
        let store = OutputsStore::new();
        assert_eq!(store.snapshot().await, json!({}));
    }
}
