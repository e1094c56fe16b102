//! Whole-document persistence for the event and snapshot stores.
//!
//! Stores keep their full state in memory and hand the complete document to a
//! [`DocumentStorage`] after every mutation. The JSON file backend rewrites the
//! file wholesale; the in-memory backend is used by tests and by runtimes
//! configured without storage paths.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON document in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait DocumentStorage<T>: Send + Sync {
    /// Load the persisted document, or `T::default()` when nothing was saved yet.
    fn load(&self) -> Result<T, PersistenceError>;

    fn save(&self, document: &T) -> Result<(), PersistenceError>;
}

/// Keeps the last saved document in memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage<T> {
    document: Mutex<Option<T>>,
}

impl<T> InMemoryStorage<T> {
    pub fn new() -> Self {
        Self {
            document: Mutex::new(None),
        }
    }
}

impl<T> DocumentStorage<T> for InMemoryStorage<T>
where
    T: Clone + Default + Send,
{
    fn load(&self) -> Result<T, PersistenceError> {
        Ok(self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default())
    }

    fn save(&self, document: &T) -> Result<(), PersistenceError> {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document.clone());
        Ok(())
    }
}

/// Pretty-printed JSON file, replaced on every save.
#[derive(Debug)]
pub struct JsonFileStorage<T> {
    path: PathBuf,
    _document: PhantomData<fn() -> T>,
}

impl<T> JsonFileStorage<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _document: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn json_error(&self, source: serde_json::Error) -> PersistenceError {
        PersistenceError::Json {
            path: self.path.clone(),
            source,
        }
    }
}

impl<T> DocumentStorage<T> for JsonFileStorage<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    fn load(&self) -> Result<T, PersistenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => return Err(self.io_error(err)),
        };
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&raw).map_err(|err| self.json_error(err))
    }

    fn save(&self, document: &T) -> Result<(), PersistenceError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| self.io_error(err))?;
        }
        let body = serde_json::to_string_pretty(document).map_err(|err| self.json_error(err))?;

        // Readers never observe a partially written file.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, body).map_err(|err| self.io_error(err))?;
        fs::rename(&staging, &self.path).map_err(|err| self.io_error(err))?;
        debug!(path = %self.path.display(), "document saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Doc = BTreeMap<String, Vec<u32>>;

    #[test]
    fn in_memory_storage_starts_empty_and_keeps_last_save() {
        let storage = InMemoryStorage::<Doc>::new();
        assert!(storage.load().unwrap().is_empty());

        let mut doc = Doc::new();
        doc.insert("a".into(), vec![1, 2]);
        storage.save(&doc).unwrap();
        assert_eq!(storage.load().unwrap(), doc);
    }

    #[test]
    fn json_file_storage_creates_directories_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db").join("events.json");
        let storage = JsonFileStorage::<Doc>::new(&path);
        assert!(storage.load().unwrap().is_empty());

        let mut doc = Doc::new();
        doc.insert("stream".into(), vec![7]);
        storage.save(&doc).unwrap();

        let reopened = JsonFileStorage::<Doc>::new(&path);
        assert_eq!(reopened.load().unwrap(), doc);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains('\n'), "expected pretty-printed JSON");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        let err = JsonFileStorage::<Doc>::new(&path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Json { .. }));
    }
}
