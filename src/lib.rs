//! HTTP-layer dispatcher for schema-backed query endpoints.
//!
//! The crate routes inbound requests to registered endpoints, obtains each
//! endpoint's executable schema from a cached parse of its schema source,
//! executes the query, and translates the outcome into a JSON response while
//! reporting internal failures to an operator sink. Public items here form
//! the contract hosts depend on: endpoint registration, the dispatcher and
//! its next-handler seam, the schema store with its invalidation trigger, and
//! settings discovery for the helper binary.

use anyhow::{Result, bail};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub mod dispatch;
pub mod endpoint;
pub mod report;
pub mod schema;
pub mod security;
pub mod settings;
pub mod source;

pub use dispatch::{DispatchError, Dispatcher, InboundQuery, NextHandler};
pub use endpoint::{
    EndpointDescriptor, EndpointRegistration, EndpointRegistry, FieldCall, RequestContext,
    ResolverError, TypeConfig,
};
pub use report::{CauseRecord, ErrorReporter, TracingReporter};
pub use schema::{
    CacheError, DocumentCache, FileCache, MemoryCache, SchemaDocument, SchemaError, SchemaStore,
};
pub use security::{Anonymous, Principal, SecurityContext};
pub use settings::{DebugFlag, Settings};
pub use source::{FileSourceReader, SourceReader, aggregate_checksum};

pub const SETTINGS_ENV: &str = "GQLMUX_SETTINGS";
const SETTINGS_FILE: &str = "gqlmux.json";

/// Verifies that an explicit settings hint names an existing file.
fn settings_from_hint(hint: &str) -> Option<PathBuf> {
    if hint.is_empty() {
        return None;
    }
    let hint_path = PathBuf::from(hint);
    if !hint_path.is_file() {
        return None;
    }
    fs::canonicalize(hint_path).ok()
}

fn search_upwards(start: &Path) -> Option<PathBuf> {
    let mut dir = fs::canonicalize(start).ok()?;
    loop {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

/// Locate the settings file.
///
/// Search order: an explicit path, `GQLMUX_SETTINGS` when it names a real
/// file, then `gqlmux.json` in the working directory or any parent.
pub fn find_settings_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        bail!("Settings file not found: {}", path.display());
    }

    if let Ok(hint) = env::var(SETTINGS_ENV) {
        if let Some(path) = settings_from_hint(&hint) {
            return Ok(path);
        }
    }

    if let Ok(cwd) = env::current_dir() {
        if let Some(path) = search_upwards(&cwd) {
            return Ok(path);
        }
    }

    bail!("Unable to locate {SETTINGS_FILE}. Pass --settings or set {SETTINGS_ENV}.");
}
