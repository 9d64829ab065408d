//! Durable device-local key-value storage.

use crate::error::{ClientError, ClientResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// The device's durable key-value storage (the browser's localStorage in
/// the original client). Writes must be visible to a later process with
/// the same backing medium.
pub trait DeviceStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    /// Writes a value.
    fn put(&self, key: &str, value: &str) -> ClientResult<()>;
    /// Deletes a value. Missing keys are a no-op.
    fn remove(&self, key: &str) -> ClientResult<()>;
}

/// Volatile storage for tests.
#[derive(Default)]
pub struct MemoryDeviceStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryDeviceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> ClientResult<()> {
        self.values.lock().insert(key.into(), value.into());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// File-backed storage: one JSON object per device, rewritten on every
/// mutation. Small state (a cursor and a short queue) keeps that cheap.
pub struct FileDeviceStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileDeviceStore {
    /// Opens the store at `path`, loading any existing contents.
    pub fn open(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(ClientError::Storage(err.to_string())),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &HashMap<String, String>) -> ClientResult<()> {
        let text = serde_json::to_string(values)?;
        std::fs::write(&self.path, text).map_err(|err| ClientError::Storage(err.to_string()))
    }
}

impl DeviceStore for FileDeviceStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> ClientResult<()> {
        let mut values = self.values.lock();
        values.insert(key.into(), value.into());
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        let mut values = self.values.lock();
        values.remove(key);
        self.flush(&values)
    }
}
