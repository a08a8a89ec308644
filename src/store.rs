//! Key-value persistence for planner and tracker state.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{Error, Result};

/// Store key of the persisted planner engine state.
pub const PLAN_STATE_KEY: &str = "plan_engine_state";
/// Store key of the persisted power tracker state.
pub const TRACKER_STATE_KEY: &str = "power_tracker_state";

/// Host-provided JSON store.
pub trait StateStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent.
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, value: &Value) -> Result<()>;
}

/// In-process store, for tests and runs without a state directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Io(io::Error::other("memory store lock poisoned")))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Io(io::Error::other("memory store lock poisoned")))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// One pretty-printed `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        // temp file, then rename over the target
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let mut file = io::BufWriter::new(fs::File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut file, value)?;
        file.flush()?;
        drop(file);
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
