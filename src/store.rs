//! String-keyed JSON value store with change notifications.
//!
//! Mirrors the extension's local storage area: keys are arbitrary strings, writes overwrite,
//! removals of missing keys are no-ops, and every mutation is broadcast to subscribers.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Snapshot of every stored entry, ordered by key.
pub type Entries = BTreeMap<String, Value>;

/// Single mutation delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    /// Key that changed.
    pub key: String,
    /// Value before the mutation.
    pub old_value: Option<Value>,
    /// Value after the mutation; `None` for removals.
    pub new_value: Option<Value>,
}

/// Errors surfaced by store backends.
#[derive(Debug)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    Io(io::Error),
    /// The backing file is not a JSON object.
    Corrupt(serde_json::Error),
    /// A stored value did not match the requested type.
    Decode {
        /// Offending key.
        key: String,
        /// Deserialization failure.
        source: serde_json::Error,
    },
    /// A value could not be converted to JSON.
    Encode(serde_json::Error),
    /// Another thread panicked while holding the store lock.
    Poisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "store io error: {err}"),
            Self::Corrupt(err) => write!(f, "store file is not a JSON object: {err}"),
            Self::Decode { key, source } => write!(f, "unexpected value under {key}: {source}"),
            Self::Encode(err) => write!(f, "value is not representable as JSON: {err}"),
            Self::Poisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Corrupt(err) | Self::Encode(err) => Some(err),
            Self::Decode { source, .. } => Some(source),
            Self::Poisoned => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Key-value storage collaborator used by the recorder and feed.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    /// Deletes `key`; missing keys are ignored.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Copies every entry.
    fn snapshot(&self) -> Result<Entries, StoreError>;
    /// Registers a new change listener.
    fn subscribe(&self) -> Receiver<StoreChange>;

    /// Lists stored keys in order.
    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.snapshot()?.into_keys().collect())
    }
}

/// Typed accessors layered over any [`KeyValueStore`].
pub trait StoreExt: KeyValueStore {
    /// Deserializes the value under `key`.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Serializes `value` under `key`.
    fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(StoreError::Encode)?;
        self.set(key, value)
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

#[derive(Default)]
struct State {
    entries: Entries,
    subscribers: Vec<Sender<StoreChange>>,
}

impl State {
    fn apply(&mut self, key: &str, new_value: Option<Value>) -> Option<StoreChange> {
        let old_value = match &new_value {
            Some(value) => self.entries.insert(key.to_string(), value.clone()),
            None => self.entries.remove(key),
        };
        if old_value.is_none() && new_value.is_none() {
            return None;
        }
        Some(StoreChange {
            key: key.to_string(),
            old_value,
            new_value,
        })
    }

    fn notify(&mut self, change: StoreChange) {
        self.subscribers
            .retain(|subscriber| subscriber.send(change.clone()).is_ok());
    }

    fn subscribe(&mut self) -> Receiver<StoreChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }
}

fn lock(state: &Mutex<State>) -> Result<MutexGuard<'_, State>, StoreError> {
    state.lock().map_err(|_| StoreError::Poisoned)
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    pub fn with_entries(entries: Entries) -> Self {
        Self {
            state: Mutex::new(State {
                entries,
                subscribers: Vec::new(),
            }),
        }
    }

    fn mutate(&self, key: &str, value: Option<Value>) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;
        if let Some(change) = state.apply(key, value) {
            state.notify(change);
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.state)?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.mutate(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(key, None)
    }

    fn snapshot(&self) -> Result<Entries, StoreError> {
        Ok(lock(&self.state)?.entries.clone())
    }

    fn subscribe(&self) -> Receiver<StoreChange> {
        match self.state.lock() {
            Ok(mut state) => state.subscribe(),
            Err(poisoned) => poisoned.into_inner().subscribe(),
        }
    }
}

/// Store persisted as a single JSON object, rewritten after every mutation.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Entries::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::Corrupt)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Entries::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "opened store");
        Ok(Self {
            path,
            state: Mutex::new(State {
                entries,
                subscribers: Vec::new(),
            }),
        })
    }

    /// Backing file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, key: &str, value: Option<Value>) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;
        let Some(change) = state.apply(key, value) else {
            return Ok(());
        };
        if let Err(err) = persist(&self.path, &state.entries) {
            warn!(path = %self.path.display(), key, "failed to persist store: {err}");
            // Roll back so memory matches disk.
            state.apply(key, change.old_value);
            return Err(err);
        }
        state.notify(change);
        Ok(())
    }
}

fn persist(path: &Path, entries: &Entries) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(entries).map_err(StoreError::Encode)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.state)?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.mutate(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(key, None)
    }

    fn snapshot(&self) -> Result<Entries, StoreError> {
        Ok(lock(&self.state)?.entries.clone())
    }

    fn subscribe(&self) -> Receiver<StoreChange> {
        match self.state.lock() {
            Ok(mut state) => state.subscribe(),
            Err(poisoned) => poisoned.into_inner().subscribe(),
        }
    }
}
