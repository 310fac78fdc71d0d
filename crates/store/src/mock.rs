//! Scripted store that records every call it receives.
//!
//! Responses are closures set through the `on_*` builders; the defaults echo
//! writes back and report reads as not found.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dualwrite_core::prelude::*;
use dualwrite_core::TableConverter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Create,
    Get,
    List,
    Update,
    Delete,
    DeleteCollection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(Resource),
    Get { name: String, opts: GetOptions },
    List(ListOptions),
    /// `object` is what the update info produced for this store.
    Update { name: String, object: Resource, force_allow_create: bool, preconditions: Option<Preconditions> },
    Delete { name: String, opts: DeleteOptions },
    DeleteCollection(ListOptions),
}

impl Call {
    pub fn method(&self) -> Method {
        match self {
            Call::Create(_) => Method::Create,
            Call::Get { .. } => Method::Get,
            Call::List(_) => Method::List,
            Call::Update { .. } => Method::Update,
            Call::Delete { .. } => Method::Delete,
            Call::DeleteCollection(_) => Method::DeleteCollection,
        }
    }
}

type CreateHandler = Box<dyn Fn(&Resource) -> StoreResult<Resource> + Send + Sync>;
type GetHandler = Box<dyn Fn(&str) -> StoreResult<Resource> + Send + Sync>;
type ListHandler = Box<dyn Fn(&ListOptions) -> StoreResult<ResourceList> + Send + Sync>;
type UpdateHandler = Box<dyn Fn(&str, &Resource) -> StoreResult<(Resource, bool)> + Send + Sync>;
type DeleteHandler = Box<dyn Fn(&str) -> StoreResult<(Resource, bool)> + Send + Sync>;

pub struct MockStore {
    resource: String,
    namespaced: bool,
    calls: Mutex<Vec<Call>>,
    on_create: CreateHandler,
    on_get: GetHandler,
    on_list: ListHandler,
    on_update: UpdateHandler,
    on_delete: DeleteHandler,
    on_delete_collection: ListHandler,
}

impl MockStore {
    pub fn new(resource: &str) -> Self {
        let r = resource.to_string();
        let r2 = resource.to_string();
        Self {
            resource: resource.to_string(),
            namespaced: true,
            calls: Mutex::new(Vec::new()),
            on_create: Box::new(|o| Ok(o.clone())),
            on_get: Box::new(move |name| Err(StoreError::not_found(&r, name))),
            on_list: Box::new(|_| Ok(ResourceList::default())),
            on_update: Box::new(|_, o| Ok((o.clone(), false))),
            on_delete: Box::new(move |name| Err(StoreError::not_found(&r2, name))),
            on_delete_collection: Box::new(|_| Ok(ResourceList::default())),
        }
    }

    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    pub fn on_create(mut self, f: impl Fn(&Resource) -> StoreResult<Resource> + Send + Sync + 'static) -> Self {
        self.on_create = Box::new(f);
        self
    }

    pub fn on_get(mut self, f: impl Fn(&str) -> StoreResult<Resource> + Send + Sync + 'static) -> Self {
        self.on_get = Box::new(f);
        self
    }

    pub fn on_list(mut self, f: impl Fn(&ListOptions) -> StoreResult<ResourceList> + Send + Sync + 'static) -> Self {
        self.on_list = Box::new(f);
        self
    }

    pub fn on_update(mut self, f: impl Fn(&str, &Resource) -> StoreResult<(Resource, bool)> + Send + Sync + 'static) -> Self {
        self.on_update = Box::new(f);
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&str) -> StoreResult<(Resource, bool)> + Send + Sync + 'static) -> Self {
        self.on_delete = Box::new(f);
        self
    }

    pub fn on_delete_collection(mut self, f: impl Fn(&ListOptions) -> StoreResult<ResourceList> + Send + Sync + 'static) -> Self {
        self.on_delete_collection = Box::new(f);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, m: Method) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).iter().filter(|c| c.method() == m).count()
    }

    /// Objects passed to `create`, in call order.
    pub fn created(&self) -> Vec<Resource> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c { Call::Create(o) => Some(o), _ => None })
            .collect()
    }

    /// Objects the update info produced, in call order.
    pub fn updated(&self) -> Vec<Resource> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c { Call::Update { object, .. } => Some(object), _ => None })
            .collect()
    }

    fn record(&self, c: Call) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(c);
    }
}

impl Scoper for MockStore {
    fn namespace_scoped(&self) -> bool { self.namespaced }
    fn singular_name(&self) -> String { self.resource.trim_end_matches('s').to_string() }
}

impl TableConvertor for MockStore {
    fn convert_to_table(&self, _ctx: &RequestContext, input: TableInput<'_>, opts: &TableOptions) -> StoreResult<Table> {
        Ok(TableConverter::new(self.namespaced).convert(input, opts))
    }
}

#[async_trait]
impl Getter for MockStore {
    async fn get(&self, _ctx: &RequestContext, name: &str, opts: &GetOptions) -> StoreResult<Resource> {
        self.record(Call::Get { name: name.to_string(), opts: opts.clone() });
        (self.on_get)(name)
    }
}

#[async_trait]
impl Creater for MockStore {
    async fn create(
        &self,
        _ctx: &RequestContext,
        obj: Resource,
        validate: Option<&ValidateObjectFn>,
        _opts: &CreateOptions,
    ) -> StoreResult<Resource> {
        self.record(Call::Create(obj.clone()));
        if let Some(v) = validate {
            v(&obj)?;
        }
        (self.on_create)(&obj)
    }
}

#[async_trait]
impl Lister for MockStore {
    async fn list(&self, _ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
        self.record(Call::List(opts.clone()));
        (self.on_list)(opts)
    }
}

#[async_trait]
impl Updater for MockStore {
    async fn update(
        &self,
        _ctx: &RequestContext,
        name: &str,
        info: &dyn UpdatedObjectInfo,
        _create_validation: Option<&ValidateObjectFn>,
        _update_validation: Option<&ValidateUpdateFn>,
        force_allow_create: bool,
        _opts: &UpdateOptions,
    ) -> StoreResult<(Resource, bool)> {
        let current = (self.on_get)(name).ok();
        let object = info.updated_object(current.as_ref())?;
        self.record(Call::Update {
            name: name.to_string(),
            object: object.clone(),
            force_allow_create,
            preconditions: info.preconditions(),
        });
        (self.on_update)(name, &object)
    }
}

#[async_trait]
impl GracefulDeleter for MockStore {
    async fn delete(
        &self,
        _ctx: &RequestContext,
        name: &str,
        _validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
    ) -> StoreResult<(Resource, bool)> {
        self.record(Call::Delete { name: name.to_string(), opts: opts.clone() });
        (self.on_delete)(name)
    }
}

#[async_trait]
impl CollectionDeleter for MockStore {
    async fn delete_collection(
        &self,
        _ctx: &RequestContext,
        _validate: Option<&ValidateObjectFn>,
        _opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StoreResult<ResourceList> {
        self.record(Call::DeleteCollection(list_opts.clone()));
        (self.on_delete_collection)(list_opts)
    }
}

impl UnifiedStore for MockStore {
    fn compare(&self, storage_obj: &Resource, legacy_obj: &Resource) -> bool {
        storage_obj.same_state(legacy_obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_uses_handlers() {
        let m = MockStore::new("dashboards").on_create(|o| Ok(o.clone().with_resource_version("1")));
        let ctx = RequestContext::namespaced("ns");
        let out = m.create(&ctx, Resource::new("v1", "Dashboard", "a"), None, &CreateOptions::default()).await.unwrap();
        assert_eq!(out.resource_version(), "1");
        assert!(m.get(&ctx, "a", &GetOptions::default()).await.unwrap_err().is_not_found());
        assert_eq!(m.count(Method::Create), 1);
        assert_eq!(m.count(Method::Get), 1);
        assert_eq!(m.count(Method::Update), 0);
        assert_eq!(m.created()[0].resource_version(), "");
    }
}
