//! Unified store on the Kubernetes API, one resource type per store, through
//! `Api<DynamicObject>`.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dualwrite_core::prelude::*;
use dualwrite_core::TableConverter;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as KubeMeta;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::histogram;
use tracing::{debug, info, warn};

fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Map an API error onto the store error taxonomy.
fn map_kube_err(e: kube::Error, resource: &str, name: &str) -> StoreError {
    match e {
        kube::Error::Api(ae) => match ae.code {
            404 => StoreError::not_found(resource, name),
            409 if ae.reason == "AlreadyExists" => StoreError::already_exists(resource, name),
            409 => StoreError::Conflict(ae.message),
            400 | 422 => StoreError::Invalid(ae.message),
            code => StoreError::Internal(format!("{} {}: {}", code, ae.reason, ae.message)),
        },
        other => StoreError::internal(other),
    }
}

fn to_dynamic(obj: &Resource, ar: &ApiResource) -> DynamicObject {
    let non_empty = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };
    let m = &obj.metadata;
    let data = if obj.spec.is_null() {
        serde_json::json!({})
    } else {
        serde_json::json!({ "spec": obj.spec })
    };
    DynamicObject {
        types: Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() }),
        metadata: KubeMeta {
            name: non_empty(&m.name),
            namespace: m.namespace.clone(),
            uid: non_empty(&m.uid),
            resource_version: non_empty(&m.resource_version),
            labels: if m.labels.is_empty() { None } else { Some(m.labels.clone()) },
            annotations: if m.annotations.is_empty() { None } else { Some(m.annotations.clone()) },
            ..Default::default()
        },
        data,
    }
}

fn from_dynamic(obj: DynamicObject, kind: &ResourceKind) -> Resource {
    let (api_version, kind_name) = match obj.types {
        Some(t) => (t.api_version, t.kind),
        None => (kind.api_version(), kind.kind.clone()),
    };
    let m = obj.metadata;
    Resource {
        api_version,
        kind: kind_name,
        metadata: ObjectMeta {
            name: m.name.unwrap_or_default(),
            namespace: m.namespace,
            uid: m.uid.unwrap_or_default(),
            resource_version: m.resource_version.unwrap_or_default(),
            generation: m.generation.unwrap_or(0),
            creation_timestamp: m.creation_timestamp.map(|t| t.0),
            labels: m.labels.unwrap_or_default(),
            annotations: m.annotations.unwrap_or_default(),
        },
        spec: obj.data.get("spec").cloned().unwrap_or(serde_json::Value::Null),
    }
}

pub struct KubeUnifiedStore {
    client: Client,
    kind: ResourceKind,
    ar: ApiResource,
    table: TableConverter,
}

impl KubeUnifiedStore {
    /// Resolve `group/version/Kind` (or `v1/Kind`) through discovery on the
    /// default client.
    pub async fn connect(gvk_key: &str) -> Result<Self> {
        let client = Client::try_default().await?;
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, namespaced) = find_api_resource(client.clone(), &gvk).await?;
        let kind = ResourceKind::new(&ar.group, &ar.version, &ar.kind, &ar.plural, namespaced);
        info!(gvk = %gvk_key, plural = %ar.plural, namespaced, "unified store resolved");
        Ok(Self::new(client, kind))
    }

    /// Build without discovery from a known kind.
    pub fn new(client: Client, kind: ResourceKind) -> Self {
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &kind.plural);
        let table = TableConverter::new(kind.namespaced);
        Self { client, kind, ar, table }
    }

    pub fn with_table(mut self, table: TableConverter) -> Self {
        self.table = table;
        self
    }

    pub fn kind(&self) -> &ResourceKind { &self.kind }

    /// Scope for reads; no namespace on a namespaced kind means all namespaces.
    fn api(&self, ctx: &RequestContext) -> Api<DynamicObject> {
        match (self.kind.namespaced, ctx.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &self.ar),
            _ => Api::all_with(self.client.clone(), &self.ar),
        }
    }

    /// Scope for single-object calls, which need a namespace on namespaced kinds.
    fn object_api(&self, ctx: &RequestContext) -> StoreResult<Api<DynamicObject>> {
        if self.kind.namespaced && ctx.namespace.is_none() {
            return Err(StoreError::Invalid(format!("{}: namespace is required", self.kind.plural)));
        }
        Ok(self.api(ctx))
    }

    fn err(&self, name: &str) -> impl Fn(kube::Error) -> StoreError + '_ {
        let name = name.to_string();
        move |e| map_kube_err(e, &self.kind.plural, &name)
    }

    fn observe(&self, op: &'static str, started: std::time::Instant) {
        histogram!("unified_kube_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op);
    }

    fn list_params(list: &ListOptions) -> ListParams {
        let mut lp = ListParams::default();
        if let Some(s) = &list.label_selector {
            lp = lp.labels(s);
        }
        if let Some(l) = list.limit.filter(|l| *l > 0) {
            lp = lp.limit(l as u32);
        }
        if let Some(t) = &list.continue_token {
            lp = lp.continue_token(t);
        }
        lp
    }

    fn name_matches(&self, obj: &mut Resource, name: &str) -> StoreResult<()> {
        if obj.metadata.name.is_empty() {
            obj.metadata.name = name.to_string();
        } else if obj.metadata.name != name {
            return Err(StoreError::Invalid(format!(
                "{}: name {:?} does not match {:?}", self.kind.plural, obj.metadata.name, name
            )));
        }
        Ok(())
    }
}

impl Scoper for KubeUnifiedStore {
    fn namespace_scoped(&self) -> bool { self.kind.namespaced }
    fn singular_name(&self) -> String { self.kind.singular.clone() }
}

impl TableConvertor for KubeUnifiedStore {
    fn convert_to_table(&self, _ctx: &RequestContext, input: TableInput<'_>, opts: &TableOptions) -> StoreResult<Table> {
        Ok(self.table.convert(input, opts))
    }
}

#[async_trait]
impl Getter for KubeUnifiedStore {
    async fn get(&self, ctx: &RequestContext, name: &str, _opts: &GetOptions) -> StoreResult<Resource> {
        let started = std::time::Instant::now();
        let api = self.object_api(ctx)?;
        let out = api.get(name).await.map_err(self.err(name))?;
        self.observe("get", started);
        Ok(from_dynamic(out, &self.kind))
    }
}

#[async_trait]
impl Creater for KubeUnifiedStore {
    async fn create(
        &self,
        ctx: &RequestContext,
        obj: Resource,
        validate: Option<&ValidateObjectFn>,
        opts: &CreateOptions,
    ) -> StoreResult<Resource> {
        let started = std::time::Instant::now();
        if let Some(v) = validate {
            v(&obj)?;
        }
        let api = self.object_api(ctx)?;
        let pp = PostParams { dry_run: opts.dry_run, ..Default::default() };
        let out = api.create(&pp, &to_dynamic(&obj, &self.ar)).await.map_err(self.err(obj.name()))?;
        self.observe("create", started);
        debug!(resource = %self.kind.plural, name = %obj.name(), "unified: created");
        Ok(from_dynamic(out, &self.kind))
    }
}

#[async_trait]
impl Lister for KubeUnifiedStore {
    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
        let started = std::time::Instant::now();
        let lp = Self::list_params(opts);
        let out = self.api(ctx).list(&lp).await.map_err(self.err(""))?;
        self.observe("list", started);
        Ok(ResourceList {
            resource_version: out.metadata.resource_version.unwrap_or_default(),
            continue_token: out.metadata.continue_.filter(|t| !t.is_empty()),
            items: out.items.into_iter().map(|o| from_dynamic(o, &self.kind)).collect(),
        })
    }
}

#[async_trait]
impl Updater for KubeUnifiedStore {
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
        let started = std::time::Instant::now();
        let api = self.object_api(ctx)?;
        let current = match api.get(name).await {
            Ok(o) => Some(from_dynamic(o, &self.kind)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => None,
            Err(e) => return Err(map_kube_err(e, &self.kind.plural, name)),
        };
        let pp = PostParams { dry_run: opts.dry_run, ..Default::default() };
        let Some(old) = current else {
            if !force_allow_create {
                return Err(StoreError::not_found(&self.kind.plural, name));
            }
            let mut obj = info.updated_object(None)?;
            self.name_matches(&mut obj, name)?;
            if let Some(v) = create_validation {
                v(&obj)?;
            }
            obj.metadata.resource_version.clear();
            let out = api.create(&pp, &to_dynamic(&obj, &self.ar)).await.map_err(self.err(name))?;
            self.observe("update", started);
            return Ok((from_dynamic(out, &self.kind), true));
        };
        if let Some(p) = info.preconditions() {
            p.check(&self.kind.plural, &old)?;
        }
        let mut obj = info.updated_object(Some(&old))?;
        self.name_matches(&mut obj, name)?;
        if let Some(v) = update_validation {
            v(&obj, &old)?;
        }
        // An empty resourceVersion is an unconditional replace.
        let out = api.replace(name, &pp, &to_dynamic(&obj, &self.ar)).await.map_err(self.err(name))?;
        self.observe("update", started);
        debug!(resource = %self.kind.plural, name = %name, "unified: replaced");
        Ok((from_dynamic(out, &self.kind), false))
    }
}

fn delete_params(opts: &DeleteOptions) -> DeleteParams {
    DeleteParams {
        dry_run: opts.dry_run,
        preconditions: opts.preconditions.as_ref().map(|p| kube::api::Preconditions {
            uid: p.uid.clone(),
            resource_version: p.resource_version.clone(),
        }),
        ..Default::default()
    }
}

#[async_trait]
impl GracefulDeleter for KubeUnifiedStore {
    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
    ) -> StoreResult<(Resource, bool)> {
        let started = std::time::Instant::now();
        let api = self.object_api(ctx)?;
        let old = from_dynamic(api.get(name).await.map_err(self.err(name))?, &self.kind);
        if let Some(v) = validate {
            v(&old)?;
        }
        let out = api.delete(name, &delete_params(opts)).await.map_err(self.err(name))?;
        self.observe("delete", started);
        // Left: the object is still present with finalizers pending.
        Ok(match out.left() {
            Some(pending) => (from_dynamic(pending, &self.kind), true),
            None => (old, false),
        })
    }
}

#[async_trait]
impl CollectionDeleter for KubeUnifiedStore {
    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StoreResult<ResourceList> {
        let started = std::time::Instant::now();
        let targets = self.list(ctx, &list_opts.unpaged()).await?;
        if let Some(v) = validate {
            for o in &targets.items {
                v(o)?;
            }
        }
        let lp = Self::list_params(&list_opts.unpaged());
        if let Err(e) = self.api(ctx).delete_collection(&delete_params(opts), &lp).await {
            warn!(resource = %self.kind.plural, error = %e, "unified: delete collection failed");
            return Err(map_kube_err(e, &self.kind.plural, ""));
        }
        self.observe("delete_collection", started);
        Ok(ResourceList::new(targets.items))
    }
}

impl UnifiedStore for KubeUnifiedStore {
    fn compare(&self, storage_obj: &Resource, legacy_obj: &Resource) -> bool {
        storage_obj.same_state(legacy_obj)
    }
}
