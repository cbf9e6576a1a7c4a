//! Byte-oriented caches for parsed schema documents.
//!
//! Entries are opaque byte strings keyed by a fingerprint. The store is the
//! only writer; it serializes writes itself, so backends only need to make
//! single operations safe.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache directory {} could not be created: {source}", .dir.display())]
    Open { dir: PathBuf, source: io::Error },
    #[error("cache entry '{key}' could not be read: {source}")]
    Read { key: String, source: io::Error },
    #[error("cache entry '{key}' could not be written: {source}")]
    Write { key: String, source: io::Error },
    #[error("cache could not be flushed: {0}")]
    Flush(io::Error),
    #[error("invalid cache key '{0}'")]
    InvalidKey(String),
}

/// Storage backend for the schema store.
pub trait DocumentCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// Remove every entry.
    fn flush(&self) -> Result<(), CacheError>;

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn flush(&self) -> Result<(), CacheError> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Directory-backed cache that survives restarts.
///
/// Each entry is a file named after its key. Writes go through a temporary
/// file in the same directory and are renamed into place, so readers never
/// observe a half-written entry.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        if let Err(source) = fs::create_dir_all(&dir) {
            return Err(CacheError::Open { dir, source });
        }
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.entry")))
    }
}

impl DocumentCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.entry_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;
        let write_err = |source| CacheError::Write {
            key: key.to_string(),
            source,
        };
        let mut file = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        file.write_all(value).map_err(write_err)?;
        file.persist(&path).map_err(|err| write_err(err.error))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(CacheError::Flush(err)),
        };
        for entry in entries {
            let path = entry.map_err(CacheError::Flush)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("entry") {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(CacheError::Flush(err)),
            }
        }
        Ok(())
    }
}
