//! Runtime configuration (scriptum.toml).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::options::HostingPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log filter applied when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub defaults: ScriptDefaults,
}

/// Engine worker settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// V8 heap ceiling per worker, in megabytes.
    pub max_heap_mb: Option<usize>,
    /// Wall-clock budget per script run, milliseconds. `None` runs
    /// unbounded.
    pub run_timeout_ms: Option<u64>,
}

/// Defaults applied to scripts built through the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptDefaults {
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub hosting: HostingPolicy,
}

impl Config {
    /// Load from a TOML file. A missing file is not an error: defaults
    /// apply, matching a host that ships no scriptum.toml.
    ///
    /// Deliberately silent: loading happens before the tracing subscriber
    /// exists, since the config carries the log filter. The binary logs
    /// the outcome once logging is up.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
