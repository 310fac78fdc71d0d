//! Mode1: legacy only. The unified store is never called.

use dualwrite_core::prelude::*;

use crate::telemetry::{timed, Side};
use crate::wrapper::UpdateArgs;
use crate::DualWriter;

pub(crate) async fn get(dw: &DualWriter, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StoreResult<Resource> {
    timed(Side::Legacy, dw.mode, "get", dw.legacy.base().get(ctx, name, opts)).await
}

pub(crate) async fn list(dw: &DualWriter, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
    let lister = dw.legacy.lister()?;
    timed(Side::Legacy, dw.mode, "list", lister.list(ctx, opts)).await
}

pub(crate) async fn create(
    dw: &DualWriter,
    ctx: &RequestContext,
    obj: Resource,
    validate: Option<&ValidateObjectFn>,
    opts: &CreateOptions,
) -> StoreResult<Resource> {
    let creater = dw.legacy.creater()?;
    timed(Side::Legacy, dw.mode, "create", creater.create(ctx, obj, validate, opts)).await
}

pub(crate) async fn update(
    dw: &DualWriter,
    ctx: &RequestContext,
    name: &str,
    info: &dyn UpdatedObjectInfo,
    args: UpdateArgs<'_>,
) -> StoreResult<(Resource, bool)> {
    let updater = dw.legacy.updater()?;
    timed(
        Side::Legacy,
        dw.mode,
        "update",
        updater.update(ctx, name, info, args.create_validation, args.update_validation, args.force_allow_create, args.opts),
    )
    .await
}

pub(crate) async fn delete(
    dw: &DualWriter,
    ctx: &RequestContext,
    name: &str,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
) -> StoreResult<(Resource, bool)> {
    let deleter = dw.legacy.deleter()?;
    timed(Side::Legacy, dw.mode, "delete", deleter.delete(ctx, name, validate, opts)).await
}

pub(crate) async fn delete_collection(
    dw: &DualWriter,
    ctx: &RequestContext,
    validate: Option<&ValidateObjectFn>,
    opts: &DeleteOptions,
    list_opts: &ListOptions,
) -> StoreResult<ResourceList> {
    let deleter = dw.legacy.collection_deleter()?;
    timed(Side::Legacy, dw.mode, "delete_collection", deleter.delete_collection(ctx, validate, opts, list_opts)).await
}
