//! Core configuration
//!
//! Loaded from TOML and shared through a [`ConfigHandle`]. Components read the
//! handle on every operation instead of caching values, so replacing the
//! config (hot-reload) takes effect on the next call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, Result};

/// Default marker that opens the user-facing section
pub const DEFAULT_NORMAL_MARKER: &str = "---NORMAL_RESPONSE---";
/// Default marker that opens the machine trim section
pub const DEFAULT_MACHINE_TRIM_MARKER: &str = "---MACHINE_TRIM---";
/// Default marker flagging trim content as inferable
pub const DEFAULT_INFERABLE_MARKER: &str = "---INFERABLE---";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub bus: BusConfig,
    pub state: StateConfig,
    pub parser: ParserConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Log every published event
    pub log_events: bool,
    /// Ring buffer size for the debug history
    pub history_size: usize,
    /// Record published events into the history ring
    pub debug: bool,
    /// Fan-out width above which a warning is logged. Advisory only
    pub max_concurrent_handlers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_events: false,
            history_size: 100,
            debug: false,
            max_concurrent_handlers: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Maximum number of keys held (0 = unbounded)
    pub max_entries: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub normal_marker: String,
    pub machine_trim_marker: String,
    pub inferable_marker: String,
    /// Upper bound for text buffered while waiting for the first marker
    pub buffer_cap: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            normal_marker: DEFAULT_NORMAL_MARKER.to_string(),
            machine_trim_marker: DEFAULT_MACHINE_TRIM_MARKER.to_string(),
            inferable_marker: DEFAULT_INFERABLE_MARKER.to_string(),
            buffer_cap: 1000,
        }
    }
}

impl ParserConfig {
    /// Length in bytes of the longest configured marker
    pub fn longest_marker_len(&self) -> usize {
        [
            &self.normal_marker,
            &self.machine_trim_marker,
            &self.inferable_marker,
        ]
        .iter()
        .map(|m| m.len())
        .max()
        .unwrap_or(0)
    }

    /// Buffer cap actually applied: never less than twice the longest marker
    pub fn effective_buffer_cap(&self) -> usize {
        self.buffer_cap.max(self.longest_marker_len() * 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Publish a progress event every N content items (0 = never)
    pub progress_batch: usize,
    /// Run a response parser over each stream
    pub parse_sections: bool,
    /// Maximum wait for the next stream item, in milliseconds
    pub idle_timeout_ms: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            progress_batch: 10,
            parse_sections: true,
            idle_timeout_ms: None,
        }
    }
}

impl CoreConfig {
    /// Default config location: `<config dir>/parley/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("parley").join("config.toml"))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let parser = &self.parser;
        let markers = [
            ("normal_marker", &parser.normal_marker),
            ("machine_trim_marker", &parser.machine_trim_marker),
            ("inferable_marker", &parser.inferable_marker),
        ];

        for (name, marker) in markers {
            if marker.trim().is_empty() {
                return Err(CoreError::ConfigInvalid(format!(
                    "parser.{} must not be empty",
                    name
                )));
            }
        }

        if parser.normal_marker == parser.machine_trim_marker {
            return Err(CoreError::ConfigInvalid(
                "parser.normal_marker and parser.machine_trim_marker must differ".to_string(),
            ));
        }

        Ok(())
    }
}

/// Shared, hot-reloadable view of the current [`CoreConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<CoreConfig>>,
}

impl ConfigHandle {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Clone of the current config
    pub fn snapshot(&self) -> CoreConfig {
        self.inner.read().clone()
    }

    /// Read a value from the current config without cloning all of it
    pub fn read<T>(&self, f: impl FnOnce(&CoreConfig) -> T) -> T {
        f(&self.inner.read())
    }

    /// Swap in a new config. Takes effect on the next operation of every component
    pub fn replace(&self, config: CoreConfig) {
        *self.inner.write() = config;
        debug!("Config replaced");
    }

    /// Re-read the config file and swap it in; the old config stays on failure
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        let config = CoreConfig::load(path)?;
        self.replace(config);
        info!("Config reloaded from {:?}", path);
        Ok(())
    }
}
