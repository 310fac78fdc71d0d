use std::future::Future;
use std::time::Instant;

use dualwrite_core::{Mode, StoreResult};
use metrics::{counter, histogram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Legacy,
    Unified,
}

/// Await one store call and record its latency.
pub(crate) async fn timed<T>(
    side: Side,
    mode: Mode,
    op: &'static str,
    fut: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    let t0 = Instant::now();
    let out = fut.await;
    let ms = t0.elapsed().as_secs_f64() * 1000.0;
    match side {
        Side::Legacy => histogram!("dualwrite_legacy_ms", ms, "mode" => mode.as_str(), "op" => op),
        Side::Unified => histogram!("dualwrite_unified_ms", ms, "mode" => mode.as_str(), "op" => op),
    }
    out
}

pub(crate) fn secondary_failure(mode: Mode, op: &'static str) {
    counter!("dualwrite_secondary_failures_total", 1u64, "mode" => mode.as_str(), "op" => op);
}

pub(crate) fn fallback_read(mode: Mode, op: &'static str) {
    counter!("dualwrite_fallback_reads_total", 1u64, "mode" => mode.as_str(), "op" => op);
}
