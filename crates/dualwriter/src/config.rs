//! Mode selection from the environment.
//!
//! `DUALWRITE_MODE` sets the default (`0`..`3` or `mode0`..`mode3`);
//! `DUALWRITE_MODES` overrides per resource, e.g. `dashboards=2,folders=1`.

use std::collections::BTreeMap;

use dualwrite_core::{Mode, ModeParseError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: {source}")]
    Mode {
        var: &'static str,
        #[source]
        source: ModeParseError,
    },
    #[error("DUALWRITE_MODES: malformed entry {0:?} (expect resource=mode)")]
    Entry(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualWriterConfig {
    pub default_mode: Mode,
    /// Keyed by plural resource name or `plural.group`.
    #[serde(default)]
    pub overrides: BTreeMap<String, Mode>,
}

impl DualWriterConfig {
    pub fn new(default_mode: Mode) -> Self {
        Self { default_mode, overrides: BTreeMap::new() }
    }

    pub fn with_override(mut self, resource: &str, mode: Mode) -> Self {
        self.overrides.insert(resource.to_string(), mode);
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = std::env::var("DUALWRITE_MODE").ok();
        let modes = std::env::var("DUALWRITE_MODES").ok();
        Self::from_vars(mode.as_deref(), modes.as_deref())
    }

    pub fn from_vars(mode: Option<&str>, modes: Option<&str>) -> Result<Self, ConfigError> {
        let default_mode = match mode.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.parse::<Mode>().map_err(|source| ConfigError::Mode { var: "DUALWRITE_MODE", source })?,
            None => Mode::default(),
        };
        let mut cfg = Self::new(default_mode);
        for entry in modes.unwrap_or("").split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (resource, m) = entry.split_once('=').ok_or_else(|| ConfigError::Entry(entry.to_string()))?;
            let resource = resource.trim();
            if resource.is_empty() {
                return Err(ConfigError::Entry(entry.to_string()));
            }
            let m = m.parse::<Mode>().map_err(|source| ConfigError::Mode { var: "DUALWRITE_MODES", source })?;
            cfg.overrides.insert(resource.to_string(), m);
        }
        Ok(cfg)
    }

    /// First override found among `keys`, else the default.
    pub fn mode_for(&self, keys: &[&str]) -> Mode {
        keys.iter().find_map(|k| self.overrides.get(*k).copied()).unwrap_or(self.default_mode)
    }
}
