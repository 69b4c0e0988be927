//! Durable state for the gateway's control plane.
//!
//! The backing store is an external collaborator; the bundled implementation
//! is a JSON state file (`store.dsn` is its path). On every admin mutation the
//! in-memory state is serialized out; at boot it is loaded back. The file is
//! written atomically (tmp sibling + rename) so a crash mid-write never
//! corrupts stored state.
//!
//! Schema migrations happen out of band: a `schema_version` that does not
//! match [`SCHEMA_VERSION`] refuses to load and the process must not start.

pub mod cache;

use gantry_core::health::ServiceHealth;
use gantry_core::rate_limit::RateLimitRule;
use gantry_core::route::Route;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version of the on-disk document this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("schema version mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("corrupt state file: {0}")]
    Corrupt(String),
}

/// The shape serialized to / deserialized from the state file.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub rate_limit_rules: Vec<RateLimitRule>,
    #[serde(default)]
    pub services: Vec<ServiceHealth>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            routes: Vec::new(),
            rate_limit_rules: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// File-backed store.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dsn: impl Into<PathBuf>) -> Self {
        Self { path: dsn.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. `Ok(None)` means no state file yet (first
    /// run); a present-but-unreadable file or a foreign schema version is an
    /// error the caller must treat as fatal.
    pub fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no state file found, starting fresh");
            return Ok(None);
        }

        let data = std::fs::read_to_string(&self.path)
            .map_err(|e| StoreError::Unreachable(format!("{}: {e}", self.path.display())))?;

        // Peek at the version before full deserialization so a future schema
        // fails with SchemaMismatch, not an opaque serde error.
        let probe: serde_json::Value = serde_json::from_str(&data)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let found = probe
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| StoreError::Corrupt("missing schema_version".into()))?
            as u32;
        if found != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch { found, expected: SCHEMA_VERSION });
        }

        let state: PersistedState =
            serde_json::from_value(probe).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        tracing::info!(
            routes = state.routes.len(),
            rules = state.rate_limit_rules.len(),
            services = state.services.len(),
            path = %self.path.display(),
            "state restored from file"
        );
        Ok(Some(state))
    }

    /// Persist the given state. Logs a warning rather than failing the
    /// mutation that triggered it — losing one snapshot is recoverable,
    /// failing admin writes is not.
    pub fn save(&self, state: &PersistedState) {
        let json = match serde_json::to_string_pretty(state) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "persist: failed to serialize state");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %e, dir = %parent.display(), "persist: failed to create state dir");
                return;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, &json) {
            tracing::warn!(error = %e, path = %tmp.display(), "persist: failed to write tmp file");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            tracing::warn!(error = %e, "persist: failed to rename tmp over state file");
            return;
        }

        tracing::debug!(path = %self.path.display(), "persist: state saved");
    }
}
