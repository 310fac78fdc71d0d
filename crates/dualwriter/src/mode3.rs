//! Mode3: unified is authoritative. Legacy receives a best-effort mirror of
//! every unified write; a legacy store without the matching capability is
//! skipped.

use dualwrite_core::prelude::*;
use tracing::{debug, warn};

use crate::enrich::strip_resource_version;
use crate::telemetry::{secondary_failure, timed, Side};
use crate::wrapper::{apply_precomputed, UpdateArgs};
use crate::DualWriter;

fn mirror_failed(dw: &DualWriter, op: &'static str, name: &str, e: &StoreError) {
    if e.is_not_found() {
        debug!(mode = %dw.mode, op, name = %name, "dualwriter: legacy mirror target missing");
        return;
    }
    warn!(mode = %dw.mode, op, name = %name, error = %e, "dualwriter: legacy mirror failed");
    secondary_failure(dw.mode, op);
}

pub(crate) async fn get(dw: &DualWriter, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StoreResult<Resource> {
    timed(Side::Unified, dw.mode, "get", dw.unified.get(ctx, name, opts)).await
}

pub(crate) async fn list(dw: &DualWriter, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
    timed(Side::Unified, dw.mode, "list", dw.unified.list(ctx, opts)).await
}

pub(crate) async fn create(
    dw: &DualWriter,
    ctx: &RequestContext,
    obj: Resource,
    validate: Option<&ValidateObjectFn>,
    opts: &CreateOptions,
) -> StoreResult<Resource> {
    let created = timed(Side::Unified, dw.mode, "create", dw.unified.create(ctx, obj, validate, opts)).await?;
    if let Ok(creater) = dw.legacy.creater() {
        let mut mirror = created.clone();
        strip_resource_version(&mut mirror);
        if let Err(e) = timed(Side::Legacy, dw.mode, "create", creater.create(ctx, mirror, None, opts)).await {
            mirror_failed(dw, "create", created.name(), &e);
        }
    }
    Ok(created)
}

pub(crate) async fn update(
    dw: &DualWriter,
    ctx: &RequestContext,
    name: &str,
    info: &dyn UpdatedObjectInfo,
    args: UpdateArgs<'_>,
) -> StoreResult<(Resource, bool)> {
    let (out, created) = timed(
        Side::Unified,
        dw.mode,
        "update",
        dw.unified.update(ctx, name, info, args.create_validation, args.update_validation, args.force_allow_create, args.opts),
    )
    .await?;
    if let Ok(updater) = dw.legacy.updater() {
        let mut mirror = out.clone();
        strip_resource_version(&mut mirror);
        let mirror_args = UpdateArgs { create_validation: None, update_validation: None, force_allow_create: true, opts: args.opts };
        if let Err(e) =
            timed(Side::Legacy, dw.mode, "update", apply_precomputed(updater, ctx, name, mirror, None, mirror_args)).await
        {
            mirror_failed(dw, "update", name, &e);
        }
    }
    Ok((out, created))
}

pub(crate) async fn delete(
    dw: &DualWriter,
    ctx: &RequestContext,
    name: &str,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
) -> StoreResult<(Resource, bool)> {
    let out = timed(Side::Unified, dw.mode, "delete", dw.unified.delete(ctx, name, validate, opts)).await?;
    if let Ok(deleter) = dw.legacy.deleter() {
        let legacy_opts = DeleteOptions { preconditions: None, dry_run: opts.dry_run };
        if let Err(e) = timed(Side::Legacy, dw.mode, "delete", deleter.delete(ctx, name, None, &legacy_opts)).await {
            mirror_failed(dw, "delete", name, &e);
        }
    }
    Ok(out)
}

pub(crate) async fn delete_collection(
    dw: &DualWriter,
    ctx: &RequestContext,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
    list_opts: &ListOptions,
) -> StoreResult<ResourceList> {
    let out = timed(Side::Unified, dw.mode, "delete_collection", dw.unified.delete_collection(ctx, validate, opts, list_opts)).await?;
    if let Ok(deleter) = dw.legacy.collection_deleter() {
        let legacy_opts = DeleteOptions { preconditions: None, dry_run: opts.dry_run };
        if let Err(e) =
            timed(Side::Legacy, dw.mode, "delete_collection", deleter.delete_collection(ctx, None, &legacy_opts, list_opts)).await
        {
            mirror_failed(dw, "delete_collection", "", &e);
        }
    }
    Ok(out)
}
