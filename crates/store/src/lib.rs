//! In-RAM unified store.
//!
//! Objects live in a hash map behind an `ArcSwap`: readers load the current
//! snapshot without locking, writers clone-modify-swap under a mutex. A
//! failed mutation never swaps, so multi-object writes are all-or-nothing.

#![forbid(unsafe_code)]

pub mod mock;

pub use mock::{Call, Method, MockStore};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use dualwrite_core::prelude::*;
use dualwrite_core::{LabelSelector, TableConverter};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

type Objects = FxHashMap<ObjectKey, Resource>;

pub struct MemoryStore {
    kind: ResourceKind,
    snap: ArcSwap<Objects>,
    write: Mutex<()>,
    rv: AtomicU64,
    epoch_tx: watch::Sender<u64>,
    table: TableConverter,
}

impl MemoryStore {
    pub fn new(kind: ResourceKind) -> Self {
        let (epoch_tx, _rx) = watch::channel(0u64);
        let table = TableConverter::new(kind.namespaced);
        Self {
            kind,
            snap: ArcSwap::from_pointee(Objects::default()),
            write: Mutex::new(()),
            rv: AtomicU64::new(0),
            epoch_tx,
            table,
        }
    }

    pub fn with_table(mut self, table: TableConverter) -> Self {
        self.table = table;
        self
    }

    pub fn kind(&self) -> &ResourceKind { &self.kind }
    pub fn len(&self) -> usize { self.snap.load().len() }
    pub fn is_empty(&self) -> bool { self.snap.load().is_empty() }

    /// Latest resource version handed out by this store.
    pub fn current_resource_version(&self) -> u64 {
        self.rv.load(Ordering::SeqCst)
    }

    /// Notified with the current resource version after every committed write.
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    /// All objects, ordered by `(namespace, name)`.
    pub fn snapshot(&self) -> Vec<Resource> {
        let snap = self.snap.load_full();
        let mut items: Vec<Resource> = snap.values().cloned().collect();
        items.sort_by(|a, b| a.key().cmp(&b.key()));
        items
    }

    fn key(&self, ctx: &RequestContext, name: &str) -> StoreResult<ObjectKey> {
        if name.is_empty() {
            return Err(StoreError::Invalid(format!("{}: name is required", self.kind.plural)));
        }
        if !self.kind.namespaced {
            return Ok(ObjectKey::new(None, name));
        }
        match ctx.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => Ok(ObjectKey::new(Some(ns), name)),
            _ => Err(StoreError::Invalid(format!("{}: namespace is required", self.kind.plural))),
        }
    }

    fn in_scope(&self, ctx: &RequestContext, key: &ObjectKey) -> bool {
        match (self.kind.namespaced, ctx.namespace.as_deref()) {
            (true, Some(ns)) => key.namespace.as_deref() == Some(ns),
            _ => true,
        }
    }

    fn next_rv(&self) -> String {
        (self.rv.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Version for a validated write. Dry runs keep `current` and leave the
    /// counter alone.
    fn stamp(&self, persist: bool, current: &str) -> String {
        if persist {
            self.next_rv()
        } else {
            current.to_string()
        }
    }

    /// Fill server-owned fields on an object about to be inserted.
    fn prepare_new(&self, key: &ObjectKey, obj: &mut Resource) -> StoreResult<()> {
        if obj.metadata.name.is_empty() {
            obj.metadata.name = key.name.clone();
        } else if obj.metadata.name != key.name {
            return Err(StoreError::Invalid(format!(
                "{}: name {:?} does not match {:?}", self.kind.plural, obj.metadata.name, key.name
            )));
        }
        if let (Some(want), Some(got)) = (key.namespace.as_deref(), obj.metadata.namespace.as_deref()) {
            if want != got {
                return Err(StoreError::Invalid(format!(
                    "{}: namespace {:?} does not match request namespace {:?}", self.kind.plural, got, want
                )));
            }
        }
        obj.metadata.namespace = key.namespace.clone();
        if obj.api_version.is_empty() {
            obj.api_version = self.kind.api_version();
        }
        if obj.kind.is_empty() {
            obj.kind = self.kind.kind.clone();
        }
        // identity handed over by another store is kept
        if obj.metadata.uid.is_empty() {
            obj.metadata.uid = Uuid::new_v4().to_string();
        }
        obj.metadata.generation = 1;
        obj.metadata.creation_timestamp.get_or_insert_with(Utc::now);
        obj.metadata.resource_version.clear();
        Ok(())
    }

    /// Clone-modify-swap under the writer lock. Nothing is published when `f`
    /// fails or when `persist` is false (dry run).
    fn mutate<R>(&self, persist: bool, f: impl FnOnce(&mut Objects) -> StoreResult<R>) -> StoreResult<R> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next: Objects = (**self.snap.load()).clone();
        let out = f(&mut next)?;
        if persist {
            self.snap.store(Arc::new(next));
            self.epoch_tx.send_replace(self.rv.load(Ordering::SeqCst));
        }
        Ok(out)
    }
}

impl Scoper for MemoryStore {
    fn namespace_scoped(&self) -> bool { self.kind.namespaced }
    fn singular_name(&self) -> String { self.kind.singular.clone() }
}

impl TableConvertor for MemoryStore {
    fn convert_to_table(&self, _ctx: &RequestContext, input: TableInput<'_>, opts: &TableOptions) -> StoreResult<Table> {
        Ok(self.table.convert(input, opts))
    }
}

#[async_trait]
impl Getter for MemoryStore {
    async fn get(&self, ctx: &RequestContext, name: &str, _opts: &GetOptions) -> StoreResult<Resource> {
        let key = self.key(ctx, name)?;
        self.snap
            .load()
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&self.kind.plural, name))
    }
}

#[async_trait]
impl Creater for MemoryStore {
    async fn create(
        &self,
        ctx: &RequestContext,
        mut obj: Resource,
        validate: Option<&ValidateObjectFn>,
        opts: &CreateOptions,
    ) -> StoreResult<Resource> {
        let key = self.key(ctx, obj.name())?;
        let persist = !opts.dry_run;
        let created = self.mutate(persist, |objs| {
            if objs.contains_key(&key) {
                return Err(StoreError::already_exists(&self.kind.plural, &key.name));
            }
            self.prepare_new(&key, &mut obj)?;
            if let Some(v) = validate {
                v(&obj)?;
            }
            obj.metadata.resource_version = self.stamp(persist, "");
            objs.insert(key.clone(), obj.clone());
            Ok(obj)
        })?;
        counter!("memstore_writes_total", 1u64, "op" => "create");
        debug!(resource = %self.kind.plural, key = %key, rv = %created.resource_version(), "memstore: created");
        Ok(created)
    }
}

#[async_trait]
impl Lister for MemoryStore {
    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
        let sel = LabelSelector::from_option(opts.label_selector.as_deref())?;
        let start_after = match opts.continue_token.as_deref() {
            Some(t) => Some(
                ObjectKey::from_continue_token(t)
                    .ok_or_else(|| StoreError::Invalid(format!("invalid continue token {:?}", t)))?,
            ),
            None => None,
        };
        let snap = self.snap.load_full();
        let mut matched: Vec<(&ObjectKey, &Resource)> = snap
            .iter()
            .filter(|(k, o)| self.in_scope(ctx, k) && sel.matches(&o.metadata.labels))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(b.0));

        let mut items: Vec<Resource> = Vec::new();
        let mut continue_token = None;
        for (k, o) in matched {
            if let Some(after) = &start_after {
                if k <= after {
                    continue;
                }
            }
            if let Some(limit) = opts.limit.filter(|l| *l > 0) {
                if items.len() == limit {
                    continue_token = items.last().map(|o| o.key().to_continue_token());
                    break;
                }
            }
            items.push(o.clone());
        }
        Ok(ResourceList {
            resource_version: self.current_resource_version().to_string(),
            continue_token,
            items,
        })
    }
}

#[async_trait]
impl Updater for MemoryStore {
    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        info: &dyn UpdatedObjectInfo,
        create_validation: Option<&ValidateObjectFn>,
        update_validation: Option<&ValidateUpdateFn>,
        force_allow_create: bool,
        opts: &UpdateOptions,
    ) -> StoreResult<(Resource, bool)> {
        let key = self.key(ctx, name)?;
        let plural = &self.kind.plural;
        let persist = !opts.dry_run;
        let (obj, created) = self.mutate(persist, |objs| match objs.get(&key).cloned() {
            None => {
                if !force_allow_create {
                    return Err(StoreError::not_found(plural, name));
                }
                let mut obj = info.updated_object(None)?;
                self.prepare_new(&key, &mut obj)?;
                if let Some(v) = create_validation {
                    v(&obj)?;
                }
                obj.metadata.resource_version = self.stamp(persist, "");
                objs.insert(key.clone(), obj.clone());
                Ok((obj, true))
            }
            Some(old) => {
                if let Some(p) = info.preconditions() {
                    p.check(plural, &old)?;
                }
                let mut obj = info.updated_object(Some(&old))?;
                if obj.name() != name {
                    return Err(StoreError::Invalid(format!("{}: name {:?} does not match {:?}", plural, obj.name(), name)));
                }
                if !obj.resource_version().is_empty() && obj.resource_version() != old.resource_version() {
                    return Err(StoreError::Conflict(format!(
                        "operation cannot be fulfilled on {} {:?}: the object has been modified; please apply your changes to the latest version and try again",
                        plural, name
                    )));
                }
                if !obj.uid().is_empty() && obj.uid() != old.uid() {
                    return Err(StoreError::Conflict(format!("{} {:?}: uid {} does not match {}", plural, name, obj.uid(), old.uid())));
                }
                if let Some(v) = update_validation {
                    v(&obj, &old)?;
                }
                obj.metadata.uid = old.metadata.uid.clone();
                obj.metadata.namespace = key.namespace.clone();
                obj.metadata.creation_timestamp = old.metadata.creation_timestamp;
                obj.metadata.generation = if obj.spec != old.spec { old.metadata.generation + 1 } else { old.metadata.generation };
                if obj.api_version.is_empty() {
                    obj.api_version = old.api_version.clone();
                }
                if obj.kind.is_empty() {
                    obj.kind = old.kind.clone();
                }
                obj.metadata.resource_version = self.stamp(persist, old.resource_version());
                objs.insert(key.clone(), obj.clone());
                Ok((obj, false))
            }
        })?;
        counter!("memstore_writes_total", 1u64, "op" => "update");
        debug!(resource = %plural, key = %key, created, rv = %obj.resource_version(), "memstore: updated");
        Ok((obj, created))
    }
}

#[async_trait]
impl GracefulDeleter for MemoryStore {
    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
    ) -> StoreResult<(Resource, bool)> {
        let key = self.key(ctx, name)?;
        let plural = &self.kind.plural;
        let deleted = self.mutate(!opts.dry_run, |objs| {
            let old = objs.get(&key).cloned().ok_or_else(|| StoreError::not_found(plural, name))?;
            if let Some(p) = &opts.preconditions {
                p.check(plural, &old)?;
            }
            if let Some(v) = validate {
                v(&old)?;
            }
            objs.remove(&key);
            Ok(old)
        })?;
        counter!("memstore_writes_total", 1u64, "op" => "delete");
        debug!(resource = %plural, key = %key, "memstore: deleted");
        Ok((deleted, false))
    }
}

#[async_trait]
impl CollectionDeleter for MemoryStore {
    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StoreResult<ResourceList> {
        let sel = LabelSelector::from_option(list_opts.label_selector.as_deref())?;
        let deleted = self.mutate(!opts.dry_run, |objs| {
            let mut keys: Vec<ObjectKey> = objs
                .iter()
                .filter(|(k, o)| self.in_scope(ctx, k) && sel.matches(&o.metadata.labels))
                .map(|(k, _)| k.clone())
                .collect();
            keys.sort();
            let mut items = Vec::with_capacity(keys.len());
            for k in keys {
                if let Some(old) = objs.remove(&k) {
                    if let Some(v) = validate {
                        v(&old)?;
                    }
                    items.push(old);
                }
            }
            Ok(items)
        })?;
        counter!("memstore_writes_total", deleted.len() as u64, "op" => "delete");
        debug!(resource = %self.kind.plural, count = deleted.len(), "memstore: collection deleted");
        Ok(ResourceList {
            resource_version: self.current_resource_version().to_string(),
            continue_token: None,
            items: deleted,
        })
    }
}

impl UnifiedStore for MemoryStore {
    fn compare(&self, storage_obj: &Resource, legacy_obj: &Resource) -> bool {
        storage_obj.same_state(legacy_obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind() -> ResourceKind {
        ResourceKind::new("example.io", "v1", "Dashboard", "dashboards", true)
    }

    #[tokio::test]
    async fn failed_mutation_publishes_nothing() {
        let s = MemoryStore::new(kind());
        let ctx = RequestContext::namespaced("ns");
        for n in ["a", "b"] {
            s.create(&ctx, Resource::new("", "", n), None, &CreateOptions::default()).await.unwrap();
        }
        let reject_b = |o: &Resource| {
            if o.name() == "b" { Err(StoreError::Invalid("b is protected".into())) } else { Ok(()) }
        };
        let err = s
            .delete_collection(&ctx, Some(&reject_b), &DeleteOptions::default(), &ListOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert_eq!(s.len(), 2);
    }

    #[tokio::test]
    async fn epoch_follows_writes() {
        let s = MemoryStore::new(kind());
        let mut rx = s.subscribe_epoch();
        let ctx = RequestContext::namespaced("ns");
        s.create(&ctx, Resource::new("", "", "a"), None, &CreateOptions::default()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
