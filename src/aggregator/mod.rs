use dashmap::DashMap;
use std::sync::Arc;

/// Pending per-key increments waiting for the next flush.
///
/// `increment` only takes the shard lock for its key. `drain` removes keys one
/// at a time, so an increment racing a drain either lands in the removed entry
/// or recreates the key for the following drain. Nothing is counted twice.
#[derive(Debug, Default)]
pub struct CounterAggregator {
    pending: DashMap<String, u64>,
}

impl CounterAggregator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    pub fn increment(&self, key: &str) {
        if let Some(mut delta) = self.pending.get_mut(key) {
            *delta += 1;
            return;
        }
        *self.pending.entry(key.to_owned()).or_insert(0) += 1;
    }

    /// Removes every pending entry and hands the deltas to the caller.
    pub fn drain(&self) -> Vec<(String, u64)> {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();

        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .filter(|(_, delta)| *delta > 0)
            .collect()
    }

    pub fn pending_keys(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_total(&self) -> u64 {
        self.pending.iter().map(|e| *e.value()).sum()
    }
}

pub type SharedAggregator = Arc<CounterAggregator>;
