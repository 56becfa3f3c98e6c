//! File store interface. The real store (on-disk layout, indexing) lives
//! outside this crate; the engine stages pieces through this trait. The
//! in-memory implementation records opens and deletions so tests can
//! assert the cleanup discipline.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard};

use crate::foundation::{FilePath, MarketError, Result};

/// A staged file snapshot handed to callers; owns its bytes.
#[derive(Clone, Debug)]
pub struct StoredFile {
    pub path: FilePath,
    pub size: u64,
    data: Vec<u8>,
}

impl StoredFile {
    pub fn new(path: FilePath, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self { path, size, data }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn reader(&self) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(self.data.clone()))
    }
}

pub trait FileStore: Send + Sync {
    fn open(&self, path: &FilePath) -> Result<StoredFile>;

    /// Stages the reader's contents under a new path derived from `name`.
    fn create(&self, name: &str, data: &mut dyn Read) -> Result<StoredFile>;

    fn delete(&self, path: &FilePath) -> Result<()>;
}

#[derive(Default)]
struct MemoryFileStoreInner {
    files: HashMap<FilePath, Vec<u8>>,
    opens: Vec<FilePath>,
    deletions: Vec<FilePath>,
}

/// Memory-backed file store used in tests and ephemeral engines.
#[derive(Default)]
pub struct MemoryFileStore {
    inner: Mutex<MemoryFileStoreInner>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: impl IntoIterator<Item = (FilePath, Vec<u8>)>) -> Self {
        let store = Self::new();
        store.lock().files.extend(files);
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryFileStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Paths opened so far, in order.
    pub fn opens(&self) -> Vec<FilePath> {
        self.lock().opens.clone()
    }

    /// Paths deleted so far, in order.
    pub fn deletions(&self) -> Vec<FilePath> {
        self.lock().deletions.clone()
    }

    pub fn contains(&self, path: &FilePath) -> bool {
        self.lock().files.contains_key(path)
    }
}

impl FileStore for MemoryFileStore {
    fn open(&self, path: &FilePath) -> Result<StoredFile> {
        let mut inner = self.lock();
        inner.opens.push(path.clone());
        match inner.files.get(path) {
            Some(data) => Ok(StoredFile::new(path.clone(), data.clone())),
            None => Err(MarketError::FileNotFound),
        }
    }

    fn create(&self, name: &str, data: &mut dyn Read) -> Result<StoredFile> {
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)?;
        let path = FilePath::new(name);
        self.lock().files.insert(path.clone(), bytes.clone());
        Ok(StoredFile::new(path, bytes))
    }

    fn delete(&self, path: &FilePath) -> Result<()> {
        let mut inner = self.lock();
        inner.deletions.push(path.clone());
        inner.files.remove(path);
        Ok(())
    }
}
