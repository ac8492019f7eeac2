//! Durable key-value storage for session state.
//!
//! The chat session keeps two values outside of its own memory: the agent thread identifier,
//! so a conversation survives restarts, and the bearer token used to authenticate.  Both live
//! behind the [`KeyValueStore`] trait so the session never touches ambient global state.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use utf8path::Path;

use crate::{Error, Result};

/// Key under which the agent thread identifier is stored.
pub const THREAD_ID_KEY: &str = "agent-thread-id";

/// Key under which the bearer token is stored.
pub const TOKEN_KEY: &str = "token";

/// String key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`.  Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

///////////////////////////////////////////// MemoryStore ////////////////////////////////////////////

/// An in-process store.  Clones share the same map.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `key` = `value`.
    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::new();
        lock(&store.values).insert(key.to_string(), value.to_string());
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

////////////////////////////////////////////// FileStore //////////////////////////////////////////////

/// A store persisted as a JSON object in a single file.
///
/// Every write rewrites the whole file through a temporary sibling and a rename, so a crash
/// leaves either the old or the new contents.
pub struct FileStore {
    path: Path<'static>,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Use the file at `path`.  The file is created on the first write.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: Path::from(path.as_ref()).into_owned(),
            write_lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path<'static> {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(self.path.as_str()) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
                Error::serialization(
                    format!("failed to parse state file {}", self.path.as_str()),
                    Some(Box::new(err)),
                )
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(Error::io(
                format!("failed to read state file {}", self.path.as_str()),
                err,
            )),
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string_pretty(values)?;
        let tmp = format!("{}.tmp", self.path.as_str());
        fs::write(&tmp, contents)
            .map_err(|err| Error::io(format!("failed to write state file {tmp}"), err))?;
        fs::rename(&tmp, self.path.as_str()).map_err(|err| {
            Error::io(
                format!("failed to replace state file {}", self.path.as_str()),
                err,
            )
        })
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut values = self.load()?;
        f(&mut values);
        self.save(&values)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}
