use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use dagcore::NodeError;

/// Per-run mapping from node id to its completed output object.
///
/// A given id is written at most once per run, and only by the worker that
/// owns that node's execution. Downstream readers observe the write before
/// they become ready, because readiness requires the upstream terminal
/// event, which is published after the store write.
#[derive(Debug, Default)]
pub struct OutputStore {
    entries: RwLock<HashMap<String, Arc<Value>>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with ambient entries (e.g. the reserved `global` or
    /// `loop` ids) before any node runs.
    pub fn seeded<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.entries.write().expect("output store poisoned");
            for (id, value) in entries {
                map.insert(id.into(), Arc::new(value));
            }
        }
        store
    }

    /// Write-once insert. A second write for the same id is an internal
    /// error: the scheduler must never run a node twice within one run.
    pub fn insert(&self, id: &str, value: Value) -> Result<(), NodeError> {
        let mut map = self.entries.write().expect("output store poisoned");
        if map.contains_key(id) {
            return Err(NodeError::Internal(format!(
                "output for node '{id}' written twice"
            )));
        }
        map.insert(id.to_string(), Arc::new(value));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Value>> {
        self.entries
            .read()
            .expect("output store poisoned")
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .expect("output store poisoned")
            .contains_key(id)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries
            .read()
            .expect("output store poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), (**v).clone()))
            .collect()
    }
}
