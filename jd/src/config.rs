//! JobDaemon configuration types and loading

use eyre::{Context, Result};
use jobstore::{DurableStore, OwnerLock, StoreKind, open_store};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::scheduler::{PersistedState, SchedulerConfig};

/// Main JobDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Scheduler limits and defaults
    pub scheduler: SchedulerConfig,

    /// Durable store for scheduler snapshots
    pub store: StoreConfig,

    /// Event journal
    pub events: EventsConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(eyre::eyre!("scheduler.max-concurrent must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.scheduler.backoff.jitter) {
            return Err(eyre::eyre!(
                "scheduler.backoff.jitter must be between 0.0 and 1.0, got {}",
                self.scheduler.backoff.jitter
            ));
        }
        if self.scheduler.backoff.base_ms > self.scheduler.backoff.max_ms {
            return Err(eyre::eyre!("scheduler.backoff.base-ms must not exceed max-ms"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidate_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are ignored; `load` reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidate_paths().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    /// `./.jobdaemon.yml`, then `~/.config/jobdaemon/jobdaemon.yml`
    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".jobdaemon.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("jobdaemon").join("jobdaemon.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Open the configured durable store
    pub fn open_store(&self) -> Result<Arc<dyn DurableStore<PersistedState>>> {
        let path = self.store.resolved_path();
        let store = open_store::<PersistedState>(self.store.kind, path.as_deref())
            .context(format!("Failed to open {} store", self.store.kind))?;
        Ok(Arc::from(store))
    }

    /// Take exclusive ownership of the configured store
    ///
    /// Stores that live only in this process need no claim and yield `None`.
    /// Anything that writes snapshots must hold the claim while it runs.
    pub fn claim_store(&self) -> Result<Option<OwnerLock>> {
        let Some(path) = self.store.resolved_path() else {
            return Ok(None);
        };
        if matches!(self.store.kind, StoreKind::None | StoreKind::Memory) {
            return Ok(None);
        }
        let lock = OwnerLock::acquire(&path)
            .context(format!("Store {} is in use; stop the running `jd run` first", path.display()))?;
        Ok(Some(lock))
    }
}

/// Where scheduler snapshots are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// none, memory, file, journal or sqlite
    pub kind: StoreKind,

    /// Snapshot location; defaults to the data-local dir
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            path: None,
        }
    }
}

impl StoreConfig {
    /// Configured path, or the default file for the store kind
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        let file_name = match self.kind {
            StoreKind::None | StoreKind::Memory => return None,
            StoreKind::File => "state.json",
            StoreKind::Journal => "state.jsonl",
            StoreKind::Sqlite => "state.db",
        };
        Some(data_dir().join(file_name))
    }
}

/// Event journal configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Append every job event to this JSONL file while `jd run` is active
    pub journal: Option<PathBuf>,
}

/// `~/.local/share/jobdaemon` or the platform equivalent
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
}
