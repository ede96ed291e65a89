use super::{CounterStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    pub fn count(&self, key: &str) -> Option<u64> {
        self.counters.get(key).map(|c| *c)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn upsert_increment(&self, key: &str, delta: u64) -> Result<(), StoreError> {
        self.counters
            .entry(key.to_owned())
            .and_modify(|c| *c += delta)
            .or_insert(delta);
        Ok(())
    }

    fn write_concurrency(&self) -> usize {
        64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_creates_then_adds() {
        let store = MemoryStore::new();
        assert_eq!(store.count("x"), None);

        store.upsert_increment("x", 3).await.unwrap();
        store.upsert_increment("x", 2).await.unwrap();

        assert_eq!(store.count("x"), Some(5));
        assert_eq!(store.len(), 1);
    }
}
