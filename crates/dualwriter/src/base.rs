//! Mode0: unified is read; writes go to legacy (when capable) and then unified.

use dualwrite_core::prelude::*;
use tracing::{debug, warn};

use crate::enrich::{enrich_object, strip_resource_version, Identity};
use crate::telemetry::{secondary_failure, timed, Side};
use crate::wrapper::{apply_precomputed, UpdateArgs};
use crate::DualWriter;

pub(crate) async fn get(dw: &DualWriter, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StoreResult<Resource> {
    timed(Side::Unified, dw.mode, "get", dw.unified.get(ctx, name, opts)).await
}

pub(crate) async fn list(dw: &DualWriter, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
    timed(Side::Unified, dw.mode, "list", dw.unified.list(ctx, opts)).await
}

/// Legacy first, then unified with the legacy result. A unified failure
/// comes back as `PartialWrite` carrying the legacy object.
pub(crate) async fn create(
    dw: &DualWriter,
    ctx: &RequestContext,
    obj: Resource,
    validate: Option<&ValidateObjectFn>,
    opts: &CreateOptions,
) -> StoreResult<Resource> {
    let Ok(creater) = dw.legacy.creater() else {
        return timed(Side::Unified, dw.mode, "create", dw.unified.create(ctx, obj, validate, opts)).await;
    };
    let created = timed(Side::Legacy, dw.mode, "create", creater.create(ctx, obj, validate, opts)).await?;
    let mut next = created.clone();
    strip_resource_version(&mut next);
    match timed(Side::Unified, dw.mode, "create", dw.unified.create(ctx, next, validate, opts)).await {
        Ok(out) => Ok(out),
        Err(e) => {
            warn!(mode = %dw.mode, name = %created.name(), error = %e, "dualwriter: unified create failed after legacy create");
            secondary_failure(dw.mode, "create");
            Err(StoreError::PartialWrite { object: Box::new(created), cause: Box::new(e) })
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
    let Ok(updater) = dw.legacy.updater() else {
        return timed(
            Side::Unified,
            dw.mode,
            "update",
            dw.unified.update(ctx, name, info, args.create_validation, args.update_validation, args.force_allow_create, args.opts),
        )
        .await;
    };
    let old = match timed(Side::Unified, dw.mode, "get", dw.unified.get(ctx, name, &GetOptions::default())).await {
        Ok(o) => Some(o),
        Err(e) if e.is_not_found() && args.force_allow_create => None,
        Err(e) => return Err(e),
    };
    let preconditions = info.preconditions();
    let mut computed = info.updated_object(old.as_ref())?;
    strip_resource_version(&mut computed);

    let legacy_preconditions = preconditions.as_ref().and_then(|p| p.without_resource_version());
    let (legacy_obj, _) = timed(
        Side::Legacy,
        dw.mode,
        "update",
        apply_precomputed(updater, ctx, name, computed.clone(), legacy_preconditions, args),
    )
    .await?;

    let mut next = legacy_obj;
    enrich_object(&computed, &mut next);
    match &old {
        Some(o) => Identity::of(o).restore(&mut next),
        None => strip_resource_version(&mut next),
    }
    debug!(mode = %dw.mode, name = %name, rv = %next.resource_version(), "dualwriter: legacy updated, applying to unified");
    timed(Side::Unified, dw.mode, "update", apply_precomputed(dw.unified.as_ref(), ctx, name, next, preconditions, args)).await
}

/// Legacy first (fatal), then unified. The unified receipt is returned.
pub(crate) async fn delete(
    dw: &DualWriter,
    ctx: &RequestContext,
    name: &str,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
) -> StoreResult<(Resource, bool)> {
    if let Ok(deleter) = dw.legacy.deleter() {
        let legacy_opts = opts.without_resource_version();
        timed(Side::Legacy, dw.mode, "delete", deleter.delete(ctx, name, validate, &legacy_opts)).await?;
    }
    timed(Side::Unified, dw.mode, "delete", dw.unified.delete(ctx, name, validate, opts)).await
}

pub(crate) async fn delete_collection(
    dw: &DualWriter,
    ctx: &RequestContext,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
    list_opts: &ListOptions,
) -> StoreResult<ResourceList> {
    if let Ok(deleter) = dw.legacy.collection_deleter() {
        let legacy_opts = opts.without_resource_version();
        timed(Side::Legacy, dw.mode, "delete_collection", deleter.delete_collection(ctx, validate, &legacy_opts, list_opts)).await?;
    }
    timed(Side::Unified, dw.mode, "delete_collection", dw.unified.delete_collection(ctx, validate, opts, list_opts)).await
}
