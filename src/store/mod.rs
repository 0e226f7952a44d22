// Durable key-value storage shared between execution contexts
//
// The foreground process and the background monitor never talk to each other
// directly. Everything they agree on goes through a flat string-keyed store,
// read fresh on every evaluation.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::Result;

/// Flat string key-value store
///
/// Implementations must make each `set`/`remove` durable before returning so
/// that another process reading afterwards sees the write.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read several keys from one consistent view of the store
    ///
    /// The default reads them one by one. File-backed stores override this
    /// to read the file once.
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Apply several writes together; `None` removes the key
    ///
    /// The default applies them one by one. File-backed stores override this
    /// to write once.
    fn set_many(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
        for (key, value) in entries {
            match value {
                Some(value) => self.set(key, value)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}
