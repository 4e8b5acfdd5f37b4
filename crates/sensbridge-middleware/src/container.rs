//! Recording containers – the durable side of the bridge.
//!
//! A [`ContainerStore`] owns at most one *open* container at a time. Recorders
//! append [`Envelope`]s to it; the driver opens and closes it around a
//! recording session or a dump. Two implementations live here:
//!
//! | Store | Backing |
//! |---|---|
//! | [`JsonlContainerStore`] | one newline-delimited JSON file per container in a directory |
//! | [`MemoryContainerStore`] | in-process vectors, for tests and dry runs |

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sensbridge_types::{BridgeError, ContainerId, Envelope};
use tracing::{debug, info, warn};

/// File extension of containers written by [`JsonlContainerStore`].
pub const CONTAINER_EXTENSION: &str = "jsonl";

/// Prefix used when the caller does not supply one.
const DEFAULT_PREFIX: &str = "sensbridge";

/// Persistent-container lifecycle and file management.
pub trait ContainerStore: Send + Sync {
    /// Open a new container tagged with `prefix`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Storage`] if a container is already open or the
    /// backing medium refuses the write.
    fn open(&self, prefix: &str) -> Result<ContainerId, BridgeError>;

    /// Append one record to the open container.
    fn append(&self, record: &Envelope) -> Result<(), BridgeError>;

    /// Finalize the open container and return its identity.
    fn close(&self) -> Result<ContainerId, BridgeError>;

    /// Drop the open container without keeping anything.
    fn discard(&self) -> Result<(), BridgeError>;

    fn is_open(&self) -> bool;

    /// Bytes currently used by finalized and open containers.
    fn used_bytes(&self) -> Result<u64, BridgeError>;

    /// Every container known to the store, oldest name first.
    fn list(&self) -> Result<Vec<ContainerId>, BridgeError>;

    /// Delete the given containers. Unknown ids are skipped. Returns how many
    /// were removed.
    fn remove(&self, ids: &[ContainerId]) -> Result<usize, BridgeError>;

    fn remove_all(&self) -> Result<usize, BridgeError> {
        let ids = self.list()?;
        self.remove(&ids)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// JSON-lines files
// ────────────────────────────────────────────────────────────────────────────

struct OpenFile {
    id: ContainerId,
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Writes each container as `<dir>/<prefix>_<local time>.jsonl`.
pub struct JsonlContainerStore {
    dir: PathBuf,
    current: Mutex<Option<OpenFile>>,
}

impl JsonlContainerStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            BridgeError::Storage(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn container_files(&self) -> Result<Vec<PathBuf>, BridgeError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| BridgeError::Storage(format!("cannot list {}: {e}", self.dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == CONTAINER_EXTENSION))
            .collect();
        files.sort();
        Ok(files)
    }

    fn fresh_path(&self, prefix: &str) -> PathBuf {
        let prefix = if prefix.trim().is_empty() { DEFAULT_PREFIX } else { prefix.trim() };
        let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
        let mut path = self.dir.join(format!("{prefix}_{stamp}.{CONTAINER_EXTENSION}"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{prefix}_{stamp}-{n}.{CONTAINER_EXTENSION}"));
            n += 1;
        }
        path
    }
}

impl ContainerStore for JsonlContainerStore {
    fn open(&self, prefix: &str) -> Result<ContainerId, BridgeError> {
        let mut current = self.current.lock();
        if let Some(open) = current.as_ref() {
            return Err(BridgeError::Storage(format!("container {} is already open", open.id)));
        }
        let path = self.fresh_path(prefix);
        let file = File::create(&path)
            .map_err(|e| BridgeError::Storage(format!("cannot create {}: {e}", path.display())))?;
        let id = ContainerId(path.display().to_string());
        info!(container = %id, "container opened");
        *current = Some(OpenFile {
            id: id.clone(),
            path,
            writer: BufWriter::new(file),
        });
        Ok(id)
    }

    fn append(&self, record: &Envelope) -> Result<(), BridgeError> {
        let mut current = self.current.lock();
        let open = current
            .as_mut()
            .ok_or_else(|| BridgeError::Storage("no open container".to_string()))?;
        serde_json::to_writer(&mut open.writer, record)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        open.writer
            .write_all(b"\n")
            .map_err(|e| BridgeError::Storage(format!("{}: {e}", open.id)))
    }

    fn close(&self) -> Result<ContainerId, BridgeError> {
        let mut open = self
            .current
            .lock()
            .take()
            .ok_or_else(|| BridgeError::Storage("no open container".to_string()))?;
        open.writer
            .flush()
            .map_err(|e| BridgeError::Storage(format!("{}: {e}", open.id)))?;
        info!(container = %open.id, "container closed");
        Ok(open.id)
    }

    fn discard(&self) -> Result<(), BridgeError> {
        let Some(open) = self.current.lock().take() else {
            return Ok(());
        };
        drop(open.writer);
        fs::remove_file(&open.path)
            .map_err(|e| BridgeError::Storage(format!("cannot remove {}: {e}", open.path.display())))?;
        debug!(container = %open.id, "container discarded");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.current.lock().is_some()
    }

    fn used_bytes(&self) -> Result<u64, BridgeError> {
        Ok(self
            .container_files()?
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum())
    }

    fn list(&self) -> Result<Vec<ContainerId>, BridgeError> {
        Ok(self
            .container_files()?
            .into_iter()
            .map(|path| ContainerId(path.display().to_string()))
            .collect())
    }

    fn remove(&self, ids: &[ContainerId]) -> Result<usize, BridgeError> {
        let open_path = self.current.lock().as_ref().map(|open| open.path.clone());
        let known = self.container_files()?;
        let mut removed = 0;
        for id in ids {
            let path = PathBuf::from(&id.0);
            // Only files this store wrote, and never the one being written.
            if !known.contains(&path) || open_path.as_ref() == Some(&path) {
                warn!(container = %id, "not a removable container; skipped");
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(container = %id, error = %e, "failed to remove container"),
            }
        }
        Ok(removed)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    open: Option<(ContainerId, Vec<Envelope>)>,
    closed: Vec<(ContainerId, Vec<Envelope>)>,
    discarded: usize,
    extra_used: u64,
    next: usize,
}

/// Keeps containers in memory. `used_bytes` reports the serialized size of
/// every stored record plus whatever [`set_extra_used`](Self::set_extra_used)
/// added, which lets tests simulate a full disk.
#[derive(Default)]
pub struct MemoryContainerStore {
    state: Mutex<MemoryState>,
}

impl MemoryContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_extra_used(&self, bytes: u64) {
        self.state.lock().extra_used = bytes;
    }

    /// Records of a finalized container.
    pub fn contents(&self, id: &ContainerId) -> Option<Vec<Envelope>> {
        self.state
            .lock()
            .closed
            .iter()
            .find(|(cid, _)| cid == id)
            .map(|(_, records)| records.clone())
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().closed.len()
    }

    pub fn discarded_count(&self) -> usize {
        self.state.lock().discarded
    }
}

impl ContainerStore for MemoryContainerStore {
    fn open(&self, prefix: &str) -> Result<ContainerId, BridgeError> {
        let mut state = self.state.lock();
        if let Some((id, _)) = &state.open {
            return Err(BridgeError::Storage(format!("container {id} is already open")));
        }
        let prefix = if prefix.trim().is_empty() { DEFAULT_PREFIX } else { prefix.trim() };
        let id = ContainerId(format!("{prefix}-{}", state.next));
        state.next += 1;
        state.open = Some((id.clone(), Vec::new()));
        Ok(id)
    }

    fn append(&self, record: &Envelope) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        let (_, records) = state
            .open
            .as_mut()
            .ok_or_else(|| BridgeError::Storage("no open container".to_string()))?;
        records.push(record.clone());
        Ok(())
    }

    fn close(&self) -> Result<ContainerId, BridgeError> {
        let mut state = self.state.lock();
        let (id, records) = state
            .open
            .take()
            .ok_or_else(|| BridgeError::Storage("no open container".to_string()))?;
        state.closed.push((id.clone(), records));
        Ok(id)
    }

    fn discard(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if state.open.take().is_some() {
            state.discarded += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open.is_some()
    }

    fn used_bytes(&self) -> Result<u64, BridgeError> {
        let state = self.state.lock();
        let stored: u64 = state
            .closed
            .iter()
            .chain(state.open.iter())
            .flat_map(|(_, records)| records.iter())
            .map(|r| serde_json::to_vec(r).map(|v| v.len() as u64).unwrap_or(0))
            .sum();
        Ok(stored + state.extra_used)
    }

    fn list(&self) -> Result<Vec<ContainerId>, BridgeError> {
        Ok(self.state.lock().closed.iter().map(|(id, _)| id.clone()).collect())
    }

    fn remove(&self, ids: &[ContainerId]) -> Result<usize, BridgeError> {
        let mut state = self.state.lock();
        let before = state.closed.len();
        let doomed: HashSet<&ContainerId> = ids.iter().collect();
        state.closed.retain(|(id, _)| !doomed.contains(id));
        Ok(before - state.closed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensbridge_types::Timestamp;

    fn record(topic: &str, n: u64) -> Envelope {
        Envelope {
            topic: topic.to_string(),
            stamp: Timestamp::from_nanos(n),
            payload: serde_json::json!(n),
        }
    }

    #[test]
    fn jsonl_store_writes_one_line_per_record() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = JsonlContainerStore::new(dir.path()).expect("store");

        let id = store.open("minidump").expect("open");
        assert!(id.0.contains("minidump_"));
        store.append(&record("imu", 1)).unwrap();
        store.append(&record("imu", 2)).unwrap();
        let closed = store.close().expect("close");
        assert_eq!(closed, id);

        let raw = fs::read_to_string(&id.0).expect("read container");
        let lines: Vec<Envelope> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid record"))
            .collect();
        assert_eq!(lines, vec![record("imu", 1), record("imu", 2)]);
        assert!(store.used_bytes().unwrap() > 0);
    }

    #[test]
    fn jsonl_store_refuses_second_open() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = JsonlContainerStore::new(dir.path()).expect("store");
        store.open("a").unwrap();
        assert!(matches!(store.open("b"), Err(BridgeError::Storage(_))));
    }

    #[test]
    fn jsonl_discard_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = JsonlContainerStore::new(dir.path()).expect("store");
        store.open("gone").unwrap();
        store.append(&record("x", 1)).unwrap();
        store.discard().unwrap();
        assert!(!store.is_open());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn jsonl_list_and_remove() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = JsonlContainerStore::new(dir.path()).expect("store");
        store.open("one").unwrap();
        let first = store.close().unwrap();
        store.open("two").unwrap();
        let second = store.close().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.remove(&[first, ContainerId("/etc/passwd".into())]).unwrap(), 1);
        assert_eq!(store.list().unwrap(), vec![second]);
        assert_eq!(store.remove_all().unwrap(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn append_without_open_container_fails() {
        let store = MemoryContainerStore::new();
        assert!(store.append(&record("x", 1)).is_err());
    }

    #[test]
    fn memory_store_tracks_closed_and_discarded() {
        let store = MemoryContainerStore::new();
        let id = store.open("dump").unwrap();
        store.append(&record("x", 1)).unwrap();
        store.close().unwrap();
        store.open("dump").unwrap();
        store.discard().unwrap();

        assert_eq!(store.contents(&id).unwrap().len(), 1);
        assert_eq!(store.closed_count(), 1);
        assert_eq!(store.discarded_count(), 1);

        store.set_extra_used(1_000);
        assert!(store.used_bytes().unwrap() > 1_000);
    }
}
