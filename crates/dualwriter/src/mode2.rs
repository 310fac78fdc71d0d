//! Mode2: both stores are written, legacy first. Reads prefer unified and
//! fall back to legacy; on list, unified entries shadow legacy entries with the
//! same key.

use dualwrite_core::prelude::*;
use dualwrite_core::ObjectKey;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::enrich::{enrich_object, strip_resource_version, Identity};
use crate::telemetry::{fallback_read, secondary_failure, timed, Side};
use crate::wrapper::{apply_precomputed, UpdateArgs};
use crate::DualWriter;

pub(crate) async fn create(
    dw: &DualWriter,
    ctx: &RequestContext,
    obj: Resource,
    validate: Option<&ValidateObjectFn>,
    opts: &CreateOptions,
) -> StoreResult<Resource> {
    let creater = dw.legacy.creater()?;
    let created = timed(Side::Legacy, dw.mode, "create", creater.create(ctx, obj.clone(), validate, opts)).await?;

    // legacy identity (uid, name) goes through; its version token does not
    let mut enriched = created.clone();
    enrich_object(&obj, &mut enriched);
    strip_resource_version(&mut enriched);
    match timed(Side::Unified, dw.mode, "create", dw.unified.create(ctx, enriched.clone(), validate, opts)).await {
        Ok(out) => Ok(out),
        Err(e) => {
            warn!(mode = %dw.mode, name = %created.name(), uid = %created.uid(), error = %e, "dualwriter: unified create failed; legacy copy kept");
            secondary_failure(dw.mode, "create");
            enriched.metadata.resource_version = created.metadata.resource_version;
            Ok(enriched)
        }
    }
}

pub(crate) async fn get(dw: &DualWriter, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StoreResult<Resource> {
    match timed(Side::Unified, dw.mode, "get", dw.unified.get(ctx, name, opts)).await {
        Ok(o) => Ok(o),
        Err(e) => {
            if e.is_not_found() {
                debug!(mode = %dw.mode, name = %name, "dualwriter: not in unified, reading legacy");
            } else {
                warn!(mode = %dw.mode, name = %name, error = %e, "dualwriter: unified get failed, reading legacy");
            }
            fallback_read(dw.mode, "get");
            let legacy_opts = opts.without_resource_version();
            timed(Side::Legacy, dw.mode, "get", dw.legacy.base().get(ctx, name, &legacy_opts)).await
        }
    }
}

/// Legacy order, continue token and list version; unified objects replace
/// legacy objects with the same `(namespace, name)`.
pub(crate) async fn list(dw: &DualWriter, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
    let lister = dw.legacy.lister()?;
    let mut out = timed(Side::Legacy, dw.mode, "list", lister.list(ctx, opts)).await?;
    let unified = timed(Side::Unified, dw.mode, "list", dw.unified.list(ctx, &opts.unpaged())).await?;

    let mut by_key: FxHashMap<ObjectKey, Resource> = FxHashMap::default();
    for o in unified.items {
        by_key.insert(o.key(), o);
    }
    let mut shadowed = 0usize;
    for slot in out.items.iter_mut() {
        if let Some(u) = by_key.remove(&slot.key()) {
            *slot = u;
            shadowed += 1;
        }
    }
    debug!(mode = %dw.mode, total = out.items.len(), shadowed, unified_only = by_key.len(), "dualwriter: list merged");
    Ok(out)
}

/// Legacy first; a legacy not-found does not stop the unified delete. The
/// legacy outcome is what the caller gets.
pub(crate) async fn delete(
    dw: &DualWriter,
    ctx: &RequestContext,
    name: &str,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
) -> StoreResult<(Resource, bool)> {
    let deleter = dw.legacy.deleter()?;
    let legacy_opts = opts.without_resource_version();
    let legacy = timed(Side::Legacy, dw.mode, "delete", deleter.delete(ctx, name, validate, &legacy_opts)).await;
    if let Err(e) = &legacy {
        if !e.is_not_found() {
            return legacy;
        }
    }
    match timed(Side::Unified, dw.mode, "delete", dw.unified.delete(ctx, name, validate, opts)).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => debug!(mode = %dw.mode, name = %name, "dualwriter: already gone from unified"),
        Err(e) => {
            warn!(mode = %dw.mode, name = %name, error = %e, "dualwriter: unified delete failed");
            secondary_failure(dw.mode, "delete");
        }
    }
    legacy
}

/// Legacy failure is logged, not returned; there is no compensation for a
/// partially applied legacy delete.
pub(crate) async fn delete_collection(
    dw: &DualWriter,
    ctx: &RequestContext,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
    list_opts: &ListOptions,
) -> StoreResult<ResourceList> {
    let deleter = dw.legacy.collection_deleter()?;
    let legacy_opts = opts.without_resource_version();
    if let Err(e) =
        timed(Side::Legacy, dw.mode, "delete_collection", deleter.delete_collection(ctx, validate, &legacy_opts, list_opts)).await
    {
        warn!(mode = %dw.mode, error = %e, "dualwriter: legacy delete collection failed");
        secondary_failure(dw.mode, "delete_collection");
    }
    timed(Side::Unified, dw.mode, "delete_collection", dw.unified.delete_collection(ctx, validate, opts, list_opts)).await
}

/// Read the pre-update object: unified first, legacy when unified errors for
/// any reason other than not-found. The flag says whether it came from unified.
async fn read_old(dw: &DualWriter, ctx: &RequestContext, name: &str) -> StoreResult<(Option<Resource>, bool)> {
    match timed(Side::Unified, dw.mode, "get", dw.unified.get(ctx, name, &GetOptions::default())).await {
        Ok(o) => Ok((Some(o), true)),
        Err(e) if e.is_not_found() => Ok((None, false)),
        Err(e) => {
            warn!(mode = %dw.mode, name = %name, error = %e, "dualwriter: unified read failed before update, reading legacy");
            fallback_read(dw.mode, "update");
            match timed(Side::Legacy, dw.mode, "get", dw.legacy.base().get(ctx, name, &GetOptions::default())).await {
                Ok(o) => Ok((Some(o), false)),
                Err(le) if le.is_not_found() => Ok((None, false)),
                Err(le) => Err(le),
            }
        }
    }
}

pub(crate) async fn update(
    dw: &DualWriter,
    ctx: &RequestContext,
    name: &str,
    info: &dyn UpdatedObjectInfo,
    args: UpdateArgs<'_>,
) -> StoreResult<(Resource, bool)> {
    let updater = dw.legacy.updater()?;
    let (old, from_unified) = read_old(dw, ctx, name).await?;
    let args = args.force(args.force_allow_create || old.is_none());

    let preconditions = info.preconditions();
    if let (Some(p), Some(o), true) = (&preconditions, &old, from_unified) {
        // stale callers fail here, before legacy is touched
        p.check(&dw.unified.singular_name(), o)?;
    }
    let mut computed = info.updated_object(old.as_ref())?;
    strip_resource_version(&mut computed);

    let legacy_preconditions = preconditions.as_ref().and_then(|p| p.without_resource_version());
    let (legacy_obj, legacy_created) = timed(
        Side::Legacy,
        dw.mode,
        "update",
        apply_precomputed(updater, ctx, name, computed.clone(), legacy_preconditions.clone(), args),
    )
    .await?;

    let mut next = legacy_obj.clone();
    enrich_object(old.as_ref().unwrap_or(&computed), &mut next);
    let (unified_preconditions, unified_args) = match &old {
        Some(o) if from_unified => {
            Identity::of(o).restore(&mut next);
            (preconditions, args)
        }
        // unified has no copy to match against
        _ => {
            strip_resource_version(&mut next);
            (legacy_preconditions, args.force(true))
        }
    };
    match timed(
        Side::Unified,
        dw.mode,
        "update",
        apply_precomputed(dw.unified.as_ref(), ctx, name, next, unified_preconditions, unified_args),
    )
    .await
    {
        Ok(out) => Ok(out),
        Err(e) => {
            warn!(mode = %dw.mode, name = %name, error = %e, "dualwriter: unified update failed; legacy copy kept");
            secondary_failure(dw.mode, "update");
            Ok((legacy_obj, legacy_created))
        }
    }
}
