//! Two-phase update: the caller's merge runs once, the result is applied to
//! each store as a fixed object.

use dualwrite_core::prelude::*;

/// An already-merged object plus the caller's original preconditions.
#[derive(Debug, Clone)]
pub struct PrecomputedUpdate {
    object: Resource,
    preconditions: Option<Preconditions>,
}

impl PrecomputedUpdate {
    pub fn new(object: Resource, preconditions: Option<Preconditions>) -> Self {
        Self { object, preconditions }
    }

    pub fn object(&self) -> &Resource { &self.object }
}

impl UpdatedObjectInfo for PrecomputedUpdate {
    fn preconditions(&self) -> Option<Preconditions> {
        self.preconditions.clone()
    }

    /// Ignores whatever the store read; the merge already happened.
    fn updated_object(&self, _old: Option<&Resource>) -> StoreResult<Resource> {
        Ok(self.object.clone())
    }
}

/// Validation and create-on-missing settings shared by every store an update
/// touches.
#[derive(Clone, Copy)]
pub struct UpdateArgs<'a> {
    pub create_validation: Option<&'a ValidateObjectFn>,
    pub update_validation: Option<&'a ValidateUpdateFn>,
    pub force_allow_create: bool,
    pub opts: &'a UpdateOptions,
}

impl<'a> UpdateArgs<'a> {
    pub fn force(self, force_allow_create: bool) -> Self {
        Self { force_allow_create, ..self }
    }
}

/// Write `object` to `store` under `preconditions` without re-running any merge.
pub async fn apply_precomputed<U: Updater + ?Sized>(
    store: &U,
    ctx: &RequestContext,
    name: &str,
    object: Resource,
    preconditions: Option<Preconditions>,
    args: UpdateArgs<'_>,
) -> StoreResult<(Resource, bool)> {
    let info = PrecomputedUpdate::new(object, preconditions);
    store
        .update(ctx, name, &info, args.create_validation, args.update_validation, args.force_allow_create, args.opts)
        .await
}
