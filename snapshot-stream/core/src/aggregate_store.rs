use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-reducer running counts, shared by every channel handler of that reducer
///
/// All reads and writes go through one lock. Counts only grow between
/// checkpoints; checkpointing copies the map and never clears it.
#[derive(Clone, Default)]
pub struct AggregateStore {
    counts: Arc<Mutex<HashMap<String, i64>>>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `store[key] += value`, inserting the key when absent
    pub fn apply(&self, key: &str, value: i64) {
        let mut counts = self.lock();
        match counts.get_mut(key) {
            Some(count) => *count = count.saturating_add(value),
            None => {
                counts.insert(key.to_string(), value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.lock().get(key).copied()
    }

    /// Stable copy of every count, ordered by key
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.lock()
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
