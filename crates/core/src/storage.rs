//! Storage capability traits.
//!
//! Every store implements the required base (`Scoper`, `Getter`,
//! `TableConvertor`). Write and list operations are split into one trait per
//! capability so a legacy store can be wired with only the ones it supports;
//! [`LegacyStorage`] records that choice at construction time instead of
//! probing for it per call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Capability, StoreError, StoreResult};
use crate::object::{Resource, ResourceList};
use crate::options::{
    CreateOptions, DeleteOptions, GetOptions, ListOptions, Preconditions, RequestContext,
    TableOptions, UpdateOptions,
};
use crate::table::{Table, TableInput};

/// Admission-style check run on an object before it is written.
pub type ValidateObjectFn = dyn Fn(&Resource) -> StoreResult<()> + Send + Sync;
/// Check run on `(new, old)` before an update is written.
pub type ValidateUpdateFn = dyn Fn(&Resource, &Resource) -> StoreResult<()> + Send + Sync;

/// Caller-supplied update: preconditions plus a merge of the caller's intent
/// onto the current object (`None` when the object does not exist yet).
pub trait UpdatedObjectInfo: Send + Sync {
    fn preconditions(&self) -> Option<Preconditions>;
    fn updated_object(&self, old: Option<&Resource>) -> StoreResult<Resource>;
}

/// Closure-backed [`UpdatedObjectInfo`].
pub struct UpdateFn<F> {
    f: F,
    preconditions: Option<Preconditions>,
}

impl<F> UpdateFn<F>
where
    F: Fn(Option<&Resource>) -> StoreResult<Resource> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f, preconditions: None }
    }

    pub fn with_preconditions(mut self, p: Preconditions) -> Self {
        self.preconditions = Some(p);
        self
    }
}

impl<F> UpdatedObjectInfo for UpdateFn<F>
where
    F: Fn(Option<&Resource>) -> StoreResult<Resource> + Send + Sync,
{
    fn preconditions(&self) -> Option<Preconditions> {
        self.preconditions.clone()
    }

    fn updated_object(&self, old: Option<&Resource>) -> StoreResult<Resource> {
        (self.f)(old)
    }
}

pub trait Scoper: Send + Sync {
    fn namespace_scoped(&self) -> bool;
    fn singular_name(&self) -> String;
}

pub trait TableConvertor: Send + Sync {
    fn convert_to_table(&self, ctx: &RequestContext, input: TableInput<'_>, opts: &TableOptions) -> StoreResult<Table>;
}

#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(&self, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StoreResult<Resource>;
}

#[async_trait]
pub trait Creater: Send + Sync {
    async fn create(
        &self,
        ctx: &RequestContext,
        obj: Resource,
        validate: Option<&ValidateObjectFn>,
        opts: &CreateOptions,
    ) -> StoreResult<Resource>;
}

#[async_trait]
pub trait Lister: Send + Sync {
    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList>;
}

#[async_trait]
pub trait Updater: Send + Sync {
    /// Returns the stored object and whether it was created by this call.
    #[allow(clippy::too_many_arguments)]
    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        info: &dyn UpdatedObjectInfo,
        create_validation: Option<&ValidateObjectFn>,
        update_validation: Option<&ValidateUpdateFn>,
        force_allow_create: bool,
        opts: &UpdateOptions,
    ) -> StoreResult<(Resource, bool)>;
}

#[async_trait]
pub trait GracefulDeleter: Send + Sync {
    /// Returns the deleted object and whether deletion completes asynchronously.
    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
    ) -> StoreResult<(Resource, bool)>;
}

#[async_trait]
pub trait CollectionDeleter: Send + Sync {
    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StoreResult<ResourceList>;
}

/// What every legacy store must provide.
pub trait LegacyBase: Scoper + Getter + TableConvertor {}
impl<T: Scoper + Getter + TableConvertor + ?Sized> LegacyBase for T {}

/// The full storage surface.
pub trait Storage:
    Scoper + Getter + TableConvertor + Creater + Lister + Updater + GracefulDeleter + CollectionDeleter
{
}
impl<T> Storage for T where
    T: Scoper + Getter + TableConvertor + Creater + Lister + Updater + GracefulDeleter + CollectionDeleter + ?Sized
{
}

/// The unified store: full surface plus drift comparison.
pub trait UnifiedStore: Storage {
    /// True when the unified object and the legacy object describe the same
    /// state. Store-local metadata (resourceVersion, labels) is ignored.
    fn compare(&self, storage_obj: &Resource, legacy_obj: &Resource) -> bool;
}

/// A legacy store plus the optional capabilities it was wired with.
#[derive(Clone)]
pub struct LegacyStorage {
    base: Arc<dyn LegacyBase>,
    creater: Option<Arc<dyn Creater>>,
    updater: Option<Arc<dyn Updater>>,
    deleter: Option<Arc<dyn GracefulDeleter>>,
    collection_deleter: Option<Arc<dyn CollectionDeleter>>,
    lister: Option<Arc<dyn Lister>>,
}

impl LegacyStorage {
    /// Only the required base; every optional operation reports its
    /// capability as missing.
    pub fn read_only(base: Arc<dyn LegacyBase>) -> Self {
        Self { base, creater: None, updater: None, deleter: None, collection_deleter: None, lister: None }
    }

    /// Wire every capability from one store.
    pub fn full<S: Storage + 'static>(store: Arc<S>) -> Self {
        Self {
            base: store.clone(),
            creater: Some(store.clone()),
            updater: Some(store.clone()),
            deleter: Some(store.clone()),
            collection_deleter: Some(store.clone()),
            lister: Some(store),
        }
    }

    pub fn with_creater(mut self, c: Arc<dyn Creater>) -> Self { self.creater = Some(c); self }
    pub fn with_updater(mut self, u: Arc<dyn Updater>) -> Self { self.updater = Some(u); self }
    pub fn with_deleter(mut self, d: Arc<dyn GracefulDeleter>) -> Self { self.deleter = Some(d); self }
    pub fn with_collection_deleter(mut self, d: Arc<dyn CollectionDeleter>) -> Self { self.collection_deleter = Some(d); self }
    pub fn with_lister(mut self, l: Arc<dyn Lister>) -> Self { self.lister = Some(l); self }

    /// Drop one capability.
    pub fn without(mut self, cap: Capability) -> Self {
        match cap {
            Capability::Creater => self.creater = None,
            Capability::Updater => self.updater = None,
            Capability::GracefulDeleter => self.deleter = None,
            Capability::CollectionDeleter => self.collection_deleter = None,
            Capability::Lister => self.lister = None,
        }
        self
    }

    pub fn supports(&self, cap: Capability) -> bool {
        match cap {
            Capability::Creater => self.creater.is_some(),
            Capability::Updater => self.updater.is_some(),
            Capability::GracefulDeleter => self.deleter.is_some(),
            Capability::CollectionDeleter => self.collection_deleter.is_some(),
            Capability::Lister => self.lister.is_some(),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL.into_iter().filter(|c| self.supports(*c)).collect()
    }

    pub fn base(&self) -> &dyn LegacyBase { self.base.as_ref() }

    pub fn creater(&self) -> StoreResult<&dyn Creater> {
        self.creater.as_deref().ok_or(StoreError::CapabilityMissing(Capability::Creater))
    }

    pub fn updater(&self) -> StoreResult<&dyn Updater> {
        self.updater.as_deref().ok_or(StoreError::CapabilityMissing(Capability::Updater))
    }

    pub fn deleter(&self) -> StoreResult<&dyn GracefulDeleter> {
        self.deleter.as_deref().ok_or(StoreError::CapabilityMissing(Capability::GracefulDeleter))
    }

    pub fn collection_deleter(&self) -> StoreResult<&dyn CollectionDeleter> {
        self.collection_deleter.as_deref().ok_or(StoreError::CapabilityMissing(Capability::CollectionDeleter))
    }

    pub fn lister(&self) -> StoreResult<&dyn Lister> {
        self.lister.as_deref().ok_or(StoreError::CapabilityMissing(Capability::Lister))
    }
}

impl fmt::Debug for LegacyStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyStorage")
            .field("singular", &self.base.singular_name())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
