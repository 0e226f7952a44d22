use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::KeyValueStore;

/// In-memory store
///
/// Clones share the same map, which lets tests run two engines against one
/// store the way two processes share a file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all entries, for assertions
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let entries = self.lock();
        Ok(keys.iter().map(|key| entries.get(*key).cloned()).collect())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let a = MemoryStore::new();
        let b = a.clone();

        a.set("schedule.bedtime", "22:00").unwrap();
        assert_eq!(b.get("schedule.bedtime").unwrap().as_deref(), Some("22:00"));

        b.remove("schedule.bedtime").unwrap();
        assert!(a.get("schedule.bedtime").unwrap().is_none());
    }

    #[test]
    fn test_set_many_applies_removals() {
        let store = MemoryStore::new();
        store.set("unlock.day", "2025-03-10").unwrap();

        store
            .set_many(&[("unlock.day", None), ("schedule.wake", Some("07:00"))])
            .unwrap();

        let snapshot = store.snapshot();
        assert!(!snapshot.contains_key("unlock.day"));
        assert_eq!(snapshot.get("schedule.wake").map(String::as_str), Some("07:00"));
    }
}
