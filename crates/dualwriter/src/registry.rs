//! Per-instance table of dual writers, one per resource kind.

use std::sync::{Arc, PoisonError, RwLock};

use dualwrite_core::prelude::*;
use dualwrite_core::ResourceKind;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::config::DualWriterConfig;
use crate::DualWriter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("already registered: {0}")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct DualWriterRegistry {
    config: DualWriterConfig,
    writers: RwLock<FxHashMap<String, Arc<DualWriter>>>,
}

impl DualWriterRegistry {
    pub fn new(config: DualWriterConfig) -> Self {
        Self { config, writers: RwLock::new(FxHashMap::default()) }
    }

    pub fn config(&self) -> &DualWriterConfig { &self.config }

    /// Build the writer for `kind` in its configured mode. Keyed by
    /// `plural.group`; a second registration of the same key is refused.
    pub fn register(
        &self,
        kind: &ResourceKind,
        legacy: LegacyStorage,
        unified: Arc<dyn UnifiedStore>,
    ) -> Result<Arc<DualWriter>, RegistryError> {
        let key = kind.resource_key();
        let mode = self.config.mode_for(&[key.as_str(), kind.plural.as_str()]);
        let mut writers = self.writers.write().unwrap_or_else(PoisonError::into_inner);
        if writers.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        let dw = Arc::new(DualWriter::new(mode, legacy, unified));
        writers.insert(key.clone(), dw.clone());
        info!(resource = %key, mode = %mode, capabilities = ?dw.legacy().capabilities(), "dualwriter: registered");
        Ok(dw)
    }

    pub fn get(&self, resource_key: &str) -> Option<Arc<DualWriter>> {
        self.writers.read().unwrap_or_else(PoisonError::into_inner).get(resource_key).cloned()
    }

    /// Registered keys, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut v: Vec<String> = self.writers.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        v.sort();
        v
    }
}
