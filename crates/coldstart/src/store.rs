//! Durable string-keyed storage that survives process restarts.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tempfile::Builder;
use thiserror::Error;
use tracing::warn;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// Value held under a store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    /// Integer payload.
    Integer(i64),
    /// Text payload.
    Text(String),
}

impl StoredValue {
    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    /// Returns the text payload, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            Self::Integer(_) => None,
        }
    }
}

impl From<i64> for StoredValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for StoredValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for StoredValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading the backing file failed.
    #[error("failed to read store '{path}': {source}")]
    Read {
        /// Backing file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The backing file did not hold a JSON object of stored values.
    #[error("failed to decode store '{path}': {source}")]
    Decode {
        /// Backing file.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// Serialising the entries failed.
    #[error("failed to encode store entries: {source}")]
    Encode {
        /// Underlying encode error.
        #[source]
        source: serde_json::Error,
    },
    /// Writing the backing file failed.
    #[error("failed to write store '{path}': {source}")]
    Write {
        /// Backing file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The background writer thread could not be started.
    #[error("failed to start writer for store '{path}': {source}")]
    Spawn {
        /// Backing file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The background writer thread is no longer running.
    #[error("writer for store '{path}' has stopped")]
    WriterStopped {
        /// Backing file.
        path: PathBuf,
    },
}

/// Durable mapping from string keys to stored values.
///
/// Reads may block on disk. Implementations may make `set` durable later
/// than it returns.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError>;
}

impl<T> KeyValueStore for Arc<T>
where
    T: KeyValueStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

type Entries = BTreeMap<String, StoredValue>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store persisted as a JSON object in a single file.
///
/// The file is read on first access and cached. `set` updates the cache and
/// hands a snapshot to a writer thread, which rewrites the whole file through
/// a temporary sibling that is fsync'd and renamed into place. Snapshots
/// queued behind each other collapse into the newest one. Dropping the store
/// waits for queued snapshots to land.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<Option<Entries>>,
    commands: Option<Sender<Command>>,
    writer: Option<JoinHandle<()>>,
}

#[derive(Debug)]
enum Command {
    Write(Entries),
    Flush(Sender<Result<(), StoreError>>),
}

impl FileStore {
    /// Opens a store backed by `path` and starts its writer thread. The file
    /// need not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Spawn`] if the writer thread cannot be started.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let (commands, receiver) = mpsc::channel();
        let writer_path = path.clone();
        let writer = thread::Builder::new()
            .name("coldstart-store".to_owned())
            .spawn(move || run_writer(&writer_path, &receiver))
            .map_err(|source| StoreError::Spawn {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            entries: Mutex::new(None),
            commands: Some(commands),
            writer: Some(writer),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Waits until every snapshot queued so far is on disk.
    ///
    /// # Errors
    ///
    /// Returns the first write failure since the previous flush, or
    /// [`StoreError::WriterStopped`] if the writer is gone.
    pub fn flush(&self) -> Result<(), StoreError> {
        let (reply, outcome) = mpsc::channel();
        self.send(Command::Flush(reply))?;
        outcome.recv().map_err(|_| self.writer_stopped())?
    }

    fn send(&self, command: Command) -> Result<(), StoreError> {
        self.commands
            .as_ref()
            .ok_or_else(|| self.writer_stopped())?
            .send(command)
            .map_err(|_| self.writer_stopped())
    }

    fn writer_stopped(&self) -> StoreError {
        StoreError::WriterStopped {
            path: self.path.clone(),
        }
    }

    fn load(&self) -> Result<Entries, StoreError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(Entries::new());
        }
        serde_json::from_slice(&contents).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Entries to build the next snapshot on. Undecodable contents are
    /// replaced; a file that cannot be read at all is left alone.
    fn load_for_write(&self) -> Result<Entries, StoreError> {
        match self.load() {
            Err(StoreError::Decode { path, source }) => {
                warn!(
                    target: STORE_TARGET,
                    event = "store_reset",
                    path = %path.display(),
                    error = %source,
                    "replacing undecodable store"
                );
                Ok(Entries::new())
            }
            other => other,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut cache = lock(&self.entries);
        if cache.is_none() {
            *cache = Some(self.load()?);
        }
        Ok(cache.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        let mut cache = lock(&self.entries);
        let entries = match cache.take() {
            Some(entries) => entries,
            None => self.load_for_write()?,
        };
        let entries = cache.insert(entries);
        entries.insert(key.to_owned(), value);
        self.send(Command::Write(entries.clone()))
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        drop(self.commands.take());
        let Some(writer) = self.writer.take() else {
            return;
        };
        if writer.join().is_err() {
            warn!(
                target: STORE_TARGET,
                event = "store_writer_panicked",
                path = %self.path.display(),
                "store writer thread panicked"
            );
        }
    }
}

fn run_writer(path: &Path, commands: &Receiver<Command>) {
    let mut pending: Option<Entries> = None;
    let mut failure: Option<StoreError> = None;
    loop {
        let command = match commands.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty) => {
                if let Some(entries) = pending.take() {
                    write_snapshot(path, &entries, &mut failure);
                    continue;
                }
                match commands.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                }
            }
            Err(TryRecvError::Disconnected) => {
                if let Some(entries) = pending.take() {
                    write_snapshot(path, &entries, &mut failure);
                }
                break;
            }
        };
        match command {
            Command::Write(entries) => pending = Some(entries),
            Command::Flush(reply) => {
                if let Some(entries) = pending.take() {
                    write_snapshot(path, &entries, &mut failure);
                }
                let _ = reply.send(failure.take().map_or(Ok(()), Err));
            }
        }
    }
}

fn write_snapshot(path: &Path, entries: &Entries, failure: &mut Option<StoreError>) {
    if let Err(error) = persist(path, entries) {
        warn!(
            target: STORE_TARGET,
            event = "store_write_failed",
            path = %path.display(),
            error = %error,
            "failed to persist store snapshot"
        );
        failure.get_or_insert(error);
    }
}

fn persist(path: &Path, entries: &Entries) -> Result<(), StoreError> {
    let payload = serde_json::to_vec(entries).map_err(|source| StoreError::Encode { source })?;
    atomic_write(path, &payload).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// In-memory store; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, StoredValue> {
        lock(&self.entries).clone()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_owned(), value);
        Ok(())
    }
}

/// Writes the provided bytes to the path using an atomic persist step.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "store path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("coldstart"),
    );
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
