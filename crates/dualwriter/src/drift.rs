//! Drift between the two stores, judged by the unified store's `compare`.

use std::collections::BTreeMap;

use dualwrite_core::prelude::*;
use dualwrite_core::ObjectKey;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::DualWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftState {
    InSync,
    Differs,
    LegacyOnly,
    UnifiedOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftEntry {
    pub key: ObjectKey,
    pub state: DriftState,
}

impl DualWriter {
    /// Compare every object both stores hold under `opts` (paging ignored).
    /// Entries come back in key order. Needs the legacy lister.
    pub async fn drift(&self, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<Vec<DriftEntry>> {
        let t0 = std::time::Instant::now();
        let opts = opts.unpaged();
        let legacy = self.legacy().lister()?.list(ctx, &opts).await?;
        let unified = self.unified().list(ctx, &opts).await?;

        let mut pending: BTreeMap<ObjectKey, Resource> = legacy.items.into_iter().map(|o| (o.key(), o)).collect();
        let mut out: BTreeMap<ObjectKey, DriftState> = BTreeMap::new();
        for u in unified.items {
            let key = u.key();
            let state = match pending.remove(&key) {
                Some(l) if self.unified().compare(&u, &l) => DriftState::InSync,
                Some(_) => DriftState::Differs,
                None => DriftState::UnifiedOnly,
            };
            out.insert(key, state);
        }
        for key in pending.into_keys() {
            out.insert(key, DriftState::LegacyOnly);
        }
        let entries: Vec<DriftEntry> = out.into_iter().map(|(key, state)| DriftEntry { key, state }).collect();
        let drifted = entries.iter().filter(|e| e.state != DriftState::InSync).count();
        info!(mode = %self.mode(), total = entries.len(), drifted, took_ms = %t0.elapsed().as_millis(), "dualwriter: drift scan");
        Ok(entries)
    }
}
