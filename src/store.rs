//! Settings store
//!
//! The durable source of the rule configuration. The controller caches a
//! [`RuleConfig`](crate::config::RuleConfig) snapshot per lifecycle and
//! refreshes it on every `set_rule` call; the store itself stays dumb.
//!
//! Two implementations are provided: [`MemoryStore`] for embedding and
//! tests, and [`JsonFileStore`] which persists the flags as a JSON file
//! with a write-temp-then-rename update so a crash mid-write never
//! leaves a torn settings file.

use crate::config::{RuleConfig, RuleKind};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Durable key-value source of rule preferences
pub trait SettingsStore: Send {
    /// Read one rule flag
    fn rule(&self, kind: RuleKind) -> Result<bool, StoreError>;

    /// Persist one rule flag
    fn set_rule(&mut self, kind: RuleKind, enabled: bool) -> Result<(), StoreError>;

    /// Read the global kill-switch flag
    fn kill_switch_enabled(&self) -> Result<bool, StoreError>;
}

/// Settings store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// In-memory settings store
///
/// Defaults: all rules off, global kill switch on.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    config: RuleConfig,
}

impl MemoryStore {
    /// Create a store with default settings
    pub fn new() -> Self {
        Self {
            config: RuleConfig {
                kill_switch_enabled: true,
                ..RuleConfig::default()
            },
        }
    }

    /// Create a store seeded with an existing configuration
    pub fn with_config(config: RuleConfig) -> Self {
        Self { config }
    }

    /// Set the global kill-switch flag
    pub fn set_kill_switch_enabled(&mut self, enabled: bool) {
        self.config.kill_switch_enabled = enabled;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore for MemoryStore {
    fn rule(&self, kind: RuleKind) -> Result<bool, StoreError> {
        Ok(self.config.rule(kind))
    }

    fn set_rule(&mut self, kind: RuleKind, enabled: bool) -> Result<(), StoreError> {
        self.config = self.config.with_rule(kind, enabled);
        Ok(())
    }

    fn kill_switch_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.config.kill_switch_enabled)
    }
}

/// JSON-file-backed settings store
///
/// The whole configuration is small enough that every mutation rewrites
/// the file; the rewrite goes through a temp file and an atomic rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    config: RuleConfig,
}

impl JsonFileStore {
    /// Open (or initialize) a store at the given path
    ///
    /// A missing file yields the defaults (all rules off, kill switch on)
    /// without creating the file; the first `set_rule` writes it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                RuleConfig {
                    kill_switch_enabled: true,
                    ..RuleConfig::default()
                }
            }
            Err(err) => return Err(err.into()),
        };
        info!(path = %path.display(), "settings store opened");
        Ok(Self { path, config })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(&self.config)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn rule(&self, kind: RuleKind) -> Result<bool, StoreError> {
        Ok(self.config.rule(kind))
    }

    fn set_rule(&mut self, kind: RuleKind, enabled: bool) -> Result<(), StoreError> {
        let updated = self.config.with_rule(kind, enabled);
        let previous = std::mem::replace(&mut self.config, updated);
        if let Err(err) = self.persist() {
            // Keep the in-memory view consistent with what is on disk.
            self.config = previous;
            return Err(err);
        }
        debug!(rule = %kind, enabled, "rule persisted");
        Ok(())
    }

    fn kill_switch_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.config.kill_switch_enabled)
    }
}
