use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::KeyValueStore;
use crate::platform::common::{FileLock, atomic_write};

/// Store persisted as a single JSON object on disk
///
/// Every read goes to disk so writes from another process are picked up.
/// Writes are read-modify-write under an exclusive lock on `<file>.lock`,
/// followed by an atomic rename. Writers in other processes wait for the
/// lock, so only keys written by both resolve as last-write-wins.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)
            .context("Failed to serialize state")?;

        atomic_write(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _lock = FileLock::acquire(&self.path)?;

        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(e) => {
                // A corrupt file must not block writes forever; start over
                tracing::warn!("Discarding unreadable state file: {:#}", e);
                BTreeMap::new()
            }
        };

        apply(&mut entries);
        self.write_entries(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let entries = self.read_entries()?;
        Ok(keys.iter().map(|key| entries.get(*key).cloned()).collect())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn set_many(&self, writes: &[(&str, Option<&str>)]) -> Result<()> {
        self.update(|entries| {
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        entries.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        entries.remove(*key);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        assert!(store.get("schedule.bedtime").unwrap().is_none());
    }

    #[test]
    fn test_set_and_get_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let writer = FileStore::new(&path);
        writer.set("schedule.bedtime", "22:00").unwrap();
        writer.set("schedule.wake", "07:00").unwrap();

        let reader = FileStore::new(&path);
        assert_eq!(reader.get("schedule.bedtime").unwrap().as_deref(), Some("22:00"));
        assert_eq!(reader.get("schedule.wake").unwrap().as_deref(), Some("07:00"));

        writer.remove("schedule.wake").unwrap();
        assert!(reader.get("schedule.wake").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_errors_on_read_and_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileStore::new(&path);
        assert!(store.get("schedule.bedtime").is_err());

        store.set("schedule.bedtime", "21:00").unwrap();
        assert_eq!(store.get("schedule.bedtime").unwrap().as_deref(), Some("21:00"));
    }

    #[test]
    fn test_set_many_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        store.set("unlock.day", "2025-03-10").unwrap();

        store
            .set_many(&[
                ("unlock.day", None),
                ("unlock.lastSuccessAt", None),
                ("schedule.timezone", Some("Europe/Berlin")),
            ])
            .unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(!content.contains("unlock.day"));
        assert!(content.contains("Europe/Berlin"));
    }

    #[test]
    fn test_get_many_reads_one_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        store.set("unlock.day", "2025-03-10").unwrap();

        let values = store.get_many(&["unlock.day", "unlock.lastSuccessAt"]).unwrap();
        assert_eq!(values, vec![Some("2025-03-10".to_string()), None]);
    }

    #[test]
    fn test_concurrent_writers_keep_each_others_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let writers: Vec<_> = ["unlock", "clock"]
            .into_iter()
            .map(|prefix| {
                let store = FileStore::new(&path);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.set(&format!("{}.{}", prefix, i), "x").unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let store = FileStore::new(&path);
        for prefix in ["unlock", "clock"] {
            for i in 0..50 {
                let key = format!("{}.{}", prefix, i);
                assert_eq!(store.get(&key).unwrap().as_deref(), Some("x"), "lost {}", key);
            }
        }
    }
}
