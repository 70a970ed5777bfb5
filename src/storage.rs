//! Blob storage capability interface.
//!
//! The pipeline only ever sees `put`/`get`/`delete` over opaque keys and
//! ciphertext; which medium sits behind it is the host application's choice.
//! Failures surface as recoverable storage errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, data: &[u8]) -> PipelineResult<()>;
    fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>>;
    fn delete(&self, key: &str) -> PipelineResult<()>;
}

/// In-memory store. Used by tests and as a scratch backend.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, key: &str, data: &[u8]) -> PipelineResult<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| PipelineError::Storage("memory store poisoned".into()))?;
        objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| PipelineError::Storage("memory store poisoned".into()))?;
        Ok(objects.get(key).cloned())
    }

    fn delete(&self, key: &str) -> PipelineResult<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| PipelineError::Storage("memory store poisoned".into()))?;
        objects.remove(key);
        Ok(())
    }
}

/// Filesystem store: one file per object key under a root directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| PipelineError::Storage(format!("create storage root: {}", e)))?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> PipelineResult<PathBuf> {
        // Keys are opaque but must stay inside the root
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(PipelineError::Storage(format!("invalid object key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FsStore {
    fn put(&self, key: &str, data: &[u8]) -> PipelineResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Storage(format!("create dir: {}", e)))?;
        }

        // Write to a sibling temp file then rename so readers never observe a
        // partial object
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .map_err(|e| PipelineError::Storage(format!("write object: {}", e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| PipelineError::Storage(format!("commit object: {}", e)))?;
        Ok(())
    }

    fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::Storage(format!("read object: {}", e))),
        }
    }

    fn delete(&self, key: &str) -> PipelineResult<()> {
        let path = self.object_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Storage(format!("delete object: {}", e))),
        }
    }
}

impl FsStore {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Wraps another store with a per-call deadline. A call that misses the
/// deadline reports `Timeout` (recoverable); the in-flight operation is not
/// cancelled, its result is simply abandoned.
pub struct DeadlineStore {
    inner: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl DeadlineStore {
    pub fn new(inner: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn with_deadline<T, F>(&self, what: &str, op: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn ObjectStore>) -> PipelineResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        std::thread::spawn(move || {
            let _ = tx.send(op(inner));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(format!(
                "storage {} exceeded {:?}",
                what, self.timeout
            ))),
        }
    }
}

impl ObjectStore for DeadlineStore {
    fn put(&self, key: &str, data: &[u8]) -> PipelineResult<()> {
        let key = key.to_string();
        let data = data.to_vec();
        self.with_deadline("put", move |inner| inner.put(&key, &data))
    }

    fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.with_deadline("get", move |inner| inner.get(&key))
    }

    fn delete(&self, key: &str) -> PipelineResult<()> {
        let key = key.to_string();
        self.with_deadline("delete", move |inner| inner.delete(&key))
    }
}
