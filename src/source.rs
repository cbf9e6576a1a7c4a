//! Schema source lookup and content fingerprints.
//!
//! Schema URIs are either plain filesystem paths or `resource://Package/path`
//! locators resolved against the configured package resource roots. The
//! fingerprint helpers here produce the cache keys and the aggregate checksum
//! that an external change detector hands to [`crate::SchemaStore::invalidate`].

use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const RESOURCE_SCHEME: &str = "resource://";

/// Reads schema source documents by URI.
pub trait SourceReader: Send + Sync {
    /// Return the full text of the document behind `uri`.
    fn read(&self, uri: &str) -> io::Result<String>;

    /// Filesystem location of `uri`, when the reader is file-backed.
    fn locate(&self, uri: &str) -> Option<PathBuf> {
        let _ = uri;
        None
    }
}

/// File-backed reader understanding `resource://` URIs.
#[derive(Clone, Debug, Default)]
pub struct FileSourceReader {
    resource_roots: BTreeMap<String, PathBuf>,
}

impl FileSourceReader {
    pub fn new(resource_roots: BTreeMap<String, PathBuf>) -> Self {
        Self { resource_roots }
    }

    /// Map a URI to a path without touching the filesystem.
    ///
    /// Returns `None` for resource URIs naming an unknown package or lacking
    /// a path component.
    pub fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let Some(rest) = uri.strip_prefix(RESOURCE_SCHEME) else {
            return Some(PathBuf::from(uri));
        };
        let (package, path) = rest.split_once('/')?;
        if path.is_empty() {
            return None;
        }
        let root = self.resource_roots.get(package)?;
        Some(root.join(path))
    }
}

impl SourceReader for FileSourceReader {
    fn read(&self, uri: &str) -> io::Result<String> {
        let path = self.resolve(uri).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no resource root registered for {uri}"),
            )
        })?;
        fs::read_to_string(&path)
    }

    fn locate(&self, uri: &str) -> Option<PathBuf> {
        self.resolve(uri)
    }
}

/// Lowercase hex SHA-1 of arbitrary bytes.
pub fn sha1_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha1::digest(bytes.as_ref()))
}

/// Cache key under which the parsed document for `uri` is stored.
pub fn document_cache_key(uri: &str) -> String {
    sha1_hex(uri)
}

/// Concatenated content hashes of every locatable schema source.
///
/// Sources that cannot be found (unknown package, missing file) contribute
/// nothing, so adding the file later still changes the checksum.
pub fn aggregate_checksum<'a>(
    reader: &dyn SourceReader,
    uris: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut checksum = String::new();
    for uri in uris {
        let Some(path) = reader.locate(uri) else {
            continue;
        };
        if let Some(hash) = file_sha1(&path) {
            checksum.push_str(&hash);
        }
    }
    checksum
}

fn file_sha1(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    Some(sha1_hex(bytes))
}
