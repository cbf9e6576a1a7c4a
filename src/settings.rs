//! Dispatcher configuration.
//!
//! Settings are read from a JSON file, checked against the contract in
//! `schema/settings.schema.json`, and then overridden from the environment so
//! deployments can flip caching and debug output without editing the file.

use anyhow::{Context, Result, anyhow, bail};
use bitflags::bitflags;
use jsonschema::JSONSchema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const ENABLE_SCHEMA_CACHE_ENV: &str = "GQLMUX_ENABLE_SCHEMA_CACHE";
pub const DEBUG_MESSAGE_ENV: &str = "GQLMUX_DEBUG_MESSAGE";
pub const DEBUG_TRACE_ENV: &str = "GQLMUX_DEBUG_TRACE";

static SETTINGS_CONTRACT: LazyLock<serde_json::Result<Value>> =
    LazyLock::new(|| serde_json::from_str(include_str!("../schema/settings.schema.json")));

fn settings_contract() -> Result<&'static Value> {
    SETTINGS_CONTRACT
        .as_ref()
        .map_err(|err| anyhow!("parsing embedded settings contract: {err}"))
}

bitflags! {
    /// Controls which extended fields error objects carry in responses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DebugFlag: u8 {
        /// Attach the internal cause message as `debugMessage`.
        const INCLUDE_DEBUG_MESSAGE = 1 << 0;
        /// Attach the internal cause chain as `trace`.
        const INCLUDE_TRACE = 1 << 1;
    }
}

impl DebugFlag {
    pub const NONE: DebugFlag = DebugFlag::empty();
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub enable_schema_cache: bool,
    #[serde(default)]
    pub debug: DebugSettings,
    /// Directory for the persistent document cache; memory-only when absent.
    #[serde(default)]
    pub cache_directory: Option<PathBuf>,
    /// Package name to resources directory, for `resource://` schema URIs.
    #[serde(default)]
    pub resource_roots: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub endpoints: Vec<EndpointSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DebugSettings {
    #[serde(default)]
    pub include_debug_message: bool,
    #[serde(default)]
    pub include_trace: bool,
}

/// Endpoint entry as listed in the settings file.
///
/// Only the schema locator matters to the core; it feeds the aggregate
/// checksum that decides when cached documents are stale.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EndpointSettings {
    pub path: String,
    #[serde(default)]
    pub schema: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_schema_cache: true,
            debug: DebugSettings::default(),
            cache_directory: None,
            resource_roots: BTreeMap::new(),
            endpoints: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from disk and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening settings {}", path.display()))?;
        let value: Value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing settings {}", path.display()))?;
        let mut settings = Self::from_value(value)
            .with_context(|| format!("loading settings {}", path.display()))?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Validate a raw settings document and deserialize it.
    ///
    /// Relative paths in `cacheDirectory` and `resourceRoots` are kept as
    /// written; callers resolve them against their working directory.
    pub fn from_value(value: Value) -> Result<Self> {
        Self::checked_against(settings_contract()?, value)
    }

    fn checked_against(contract: &Value, value: Value) -> Result<Self> {
        let contract = JSONSchema::compile(contract)
            .map_err(|err| anyhow!("compiling settings contract: {err}"))?;
        if let Err(errors) = contract.validate(&value) {
            let details = errors
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("\n");
            bail!("settings failed validation:\n{details}");
        }
        serde_json::from_value(value).context("deserializing settings")
    }

    /// Apply `GQLMUX_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENABLE_SCHEMA_CACHE_ENV) {
            self.enable_schema_cache = env_flag(&value);
        }
        if let Some(value) = lookup(DEBUG_MESSAGE_ENV) {
            self.debug.include_debug_message = env_flag(&value);
        }
        if let Some(value) = lookup(DEBUG_TRACE_ENV) {
            self.debug.include_trace = env_flag(&value);
        }
    }

    /// Fold the two debug options into the serializer flag.
    pub fn debug_flag(&self) -> DebugFlag {
        let mut flag = DebugFlag::NONE;
        if self.debug.include_debug_message {
            flag |= DebugFlag::INCLUDE_DEBUG_MESSAGE;
        }
        if self.debug.include_trace {
            flag |= DebugFlag::INCLUDE_TRACE;
        }
        flag
    }

    /// Schema URIs of the configured endpoints, in configuration order.
    pub fn schema_uris(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter_map(|endpoint| endpoint.schema.clone())
            .collect()
    }
}

fn default_true() -> bool {
    true
}

fn env_flag(value: &str) -> bool {
    !value.trim().is_empty() && value.trim() != "0"
}
