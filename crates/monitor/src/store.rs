//! File-backed JSON stores and the `Stores` context object that bundles the
//! application's persisted records.
//!
//! `load()` is deliberately infallible: a missing, empty or corrupt file
//! falls back to the store's default (which gets materialized on disk), so
//! callers never deal with parse errors. `save()` is a whole-file
//! overwrite; a crash mid-write loses at most that one record, which the
//! fallback path then recovers as the default.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::config::AppConfig;
use crate::types::{LiveSnapshot, LogEntry, SensorList};

// ---------------------------------------------------------------------------
// Generic JSON store
// ---------------------------------------------------------------------------

/// Typed load/save of one JSON record at a fixed path.
pub struct JsonStore<T> {
    path: PathBuf,
    fallback: T,
}

impl<T: Serialize + DeserializeOwned + Clone> JsonStore<T> {
    pub fn new(path: impl Into<PathBuf>, fallback: T) -> Self {
        Self {
            path: path.into(),
            fallback,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, materializing the fallback when the file is absent,
    /// empty or unparseable. Never errors.
    pub fn load(&self) -> T {
        if !self.path.exists() {
            if let Err(e) = self.save(&self.fallback) {
                error!(path = %self.path.display(), "store: failed to seed default: {e}");
            }
            return self.fallback.clone();
        }

        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), "store: read failed, using default: {e}");
                return self.fallback.clone();
            }
        };

        if raw.trim().is_empty() {
            return self.fallback.clone();
        }

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "store: malformed content, using default: {e}"
                );
                self.fallback.clone()
            }
        }
    }

    /// Overwrite the record with `value`. Creates the parent directory on
    /// first use.
    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating store directory {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(value).context("serializing store record")?;
        fs::write(&self.path, json)
            .with_context(|| format!("writing store file {}", self.path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Application stores
// ---------------------------------------------------------------------------

/// All persisted records, constructed from one base data directory and
/// passed explicitly to each service (no process-wide registry).
pub struct Stores {
    pub sensors: JsonStore<SensorList>,
    pub app_config: JsonStore<AppConfig>,
    pub live: JsonStore<LiveSnapshot>,
    pub logs: JsonStore<Vec<LogEntry>>,
    /// Alert recipient chat ids, managed by the external registration flow.
    pub subscribers: JsonStore<Vec<i64>>,
}

impl Stores {
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            sensors: JsonStore::new(base.join("sensor.configs.json"), SensorList::default()),
            app_config: JsonStore::new(base.join("app.config.json"), AppConfig::default()),
            live: JsonStore::new(base.join("live.data.json"), LiveSnapshot::default()),
            logs: JsonStore::new(base.join("sensor.logs.json"), Vec::new()),
            subscribers: JsonStore::new(base.join("subscribers.json"), Vec::new()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
