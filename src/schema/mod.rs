//! Schema acquisition for endpoints.
//!
//! The store reads an endpoint's schema source, parses it into a
//! [`SchemaDocument`], and builds the executable schema. With caching enabled
//! the parsed document is kept in a [`DocumentCache`] under a fingerprint of
//! the schema URI; the executable schema is rebuilt on every call. Staleness
//! is detected by an externally supplied aggregate checksum: any change
//! flushes the whole cache.

pub mod build;
pub mod cache;
pub mod document;

use crate::endpoint::EndpointDescriptor;
use crate::source::{SourceReader, document_cache_key};
use async_graphql::dynamic::Schema;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

pub use build::{InternalFailure, build_schema};
pub use cache::{CacheError, DocumentCache, FileCache, MemoryCache};
pub use document::SchemaDocument;

/// Cache entry holding the checksum the cached documents were built from.
pub const CHECKSUM_KEY: &str = "checksum";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{0}")]
    Syntax(#[from] async_graphql_parser::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("cached document is corrupt: {0}")]
    CorruptEntry(serde_json::Error),
    #[error("cannot encode document for the cache: {0}")]
    Encode(serde_json::Error),
    #[error("cannot read schema source: {0}")]
    Read(#[from] io::Error),
    #[error("cannot build schema: {0}")]
    Build(String),
}

impl SchemaError {
    /// Whether the failure came from the document cache rather than the source.
    pub fn is_cache_error(&self) -> bool {
        matches!(
            self,
            SchemaError::Cache(_) | SchemaError::CorruptEntry(_) | SchemaError::Encode(_)
        )
    }
}

/// Shared, process-lifetime schema store.
pub struct SchemaStore {
    reader: Arc<dyn SourceReader>,
    cache: Arc<dyn DocumentCache>,
    cache_enabled: bool,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    flush_lock: RwLock<()>,
}

impl SchemaStore {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        cache: Arc<dyn DocumentCache>,
        cache_enabled: bool,
    ) -> Self {
        Self {
            reader,
            cache,
            cache_enabled,
            key_locks: Mutex::new(HashMap::new()),
            flush_lock: RwLock::new(()),
        }
    }

    /// Executable schema for `endpoint`.
    ///
    /// With caching disabled the source is read and parsed on every call.
    pub fn schema_for(&self, endpoint: &EndpointDescriptor) -> Result<Schema, SchemaError> {
        let document = self.document_for(endpoint.schema_uri())?;
        build_schema(&document, endpoint).map_err(|err| SchemaError::Build(err.0))
    }

    /// Parsed document behind `uri`, from the cache when possible.
    pub fn document_for(&self, uri: &str) -> Result<SchemaDocument, SchemaError> {
        if !self.cache_enabled {
            return self.parse_source(uri);
        }

        let key = document_cache_key(uri);
        let _flush_guard = self.flush_lock.read();
        let key_lock = self.key_lock(&key);
        let _key_guard = key_lock.lock();

        if let Some(bytes) = self.cache.get(&key)? {
            return SchemaDocument::from_bytes(&bytes).map_err(SchemaError::CorruptEntry);
        }

        let document = self.parse_source(uri)?;
        let bytes = document.to_bytes().map_err(SchemaError::Encode)?;
        self.cache.set(&key, &bytes)?;
        tracing::debug!(uri, key = %key, "cached parsed schema document");
        Ok(document)
    }

    /// Flush every cached document when `checksum` differs from the stored one.
    ///
    /// Returns whether a flush happened.
    pub fn invalidate(&self, checksum: &str) -> Result<bool, CacheError> {
        let _flush_guard = self.flush_lock.write();
        let existing = self.cache.get(CHECKSUM_KEY)?;
        if existing.as_deref() == Some(checksum.as_bytes()) {
            return Ok(false);
        }
        self.cache.flush()?;
        self.cache.set(CHECKSUM_KEY, checksum.as_bytes())?;
        self.key_locks.lock().clear();
        tracing::info!(checksum, "schema sources changed; flushed document cache");
        Ok(true)
    }

    fn parse_source(&self, uri: &str) -> Result<SchemaDocument, SchemaError> {
        let source = self.reader.read(uri)?;
        Ok(SchemaDocument::parse(&source)?)
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock();
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}
