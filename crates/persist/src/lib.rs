//! SQLite legacy store. One table holds every legacy resource type, keyed by
//! `(resource, namespace, name)`, with an integer version per row. Labels and
//! annotations are stored as JSON maps next to the spec.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dualwrite_core::prelude::*;
use dualwrite_core::{LabelSelector, TableConverter};
use metrics::{counter, histogram};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

const COLUMNS: &str = "namespace, name, uid, version, created, spec, labels, annotations";

#[derive(Debug, Clone)]
struct LegacyRow {
    namespace: String,
    name: String,
    uid: String,
    version: i64,
    created: i64,
    spec: String,
    labels: String,
    annotations: String,
}

impl LegacyRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            namespace: row.get(0)?,
            name: row.get(1)?,
            uid: row.get(2)?,
            version: row.get(3)?,
            created: row.get(4)?,
            spec: row.get(5)?,
            labels: row.get(6)?,
            annotations: row.get(7)?,
        })
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Internal(format!("legacy sqlite: {}", e))
}

fn encode_spec(v: &serde_json::Value) -> StoreResult<String> {
    serde_json::to_string(v).map_err(|e| StoreError::Invalid(format!("spec is not serializable: {}", e)))
}

fn encode_map(m: &BTreeMap<String, String>) -> StoreResult<String> {
    serde_json::to_string(m).map_err(StoreError::internal)
}

fn decode_map(s: &str) -> StoreResult<BTreeMap<String, String>> {
    if s.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(s).map_err(StoreError::internal)
}

pub struct SqliteLegacyStore {
    kind: ResourceKind,
    db: Mutex<Connection>,
    table: TableConverter,
}

impl SqliteLegacyStore {
    /// Open at `DUALWRITE_DB_PATH`, or `~/.dualwrite/legacy.db`.
    pub fn open_default(kind: ResourceKind) -> Result<Self> {
        let path = std::env::var("DUALWRITE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path, kind)
    }

    pub fn open(path: &str, kind: ResourceKind) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        let me = Self::init(db, kind)?;
        histogram!("legacy_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }

    pub fn open_in_memory(kind: ResourceKind) -> Result<Self> {
        let db = Connection::open_in_memory().context("opening in-memory sqlite db")?;
        Self::init(db, kind)
    }

    fn init(db: Connection, kind: ResourceKind) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS legacy_resources (
                resource    TEXT NOT NULL,
                namespace   TEXT NOT NULL,
                name        TEXT NOT NULL,
                uid         TEXT NOT NULL,
                version     INTEGER NOT NULL,
                created     INTEGER NOT NULL,
                spec        TEXT NOT NULL,
                labels      TEXT NOT NULL DEFAULT '{}',
                annotations TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (resource, namespace, name)
            )",
            [],
        )
        .context("creating legacy_resources table")?;
        // databases created before labels were stored
        let has_labels = db
            .prepare("SELECT 1 FROM pragma_table_info('legacy_resources') WHERE name = 'labels'")
            .and_then(|mut stmt| stmt.exists([]))
            .context("inspecting legacy_resources columns")?;
        if !has_labels {
            db.execute("ALTER TABLE legacy_resources ADD COLUMN labels TEXT NOT NULL DEFAULT '{}'", [])
                .context("adding labels column")?;
            info!("legacy: added labels column");
        }
        let table = TableConverter::new(kind.namespaced);
        Ok(Self { kind, db: Mutex::new(db), table })
    }

    pub fn with_table(mut self, table: TableConverter) -> Self {
        self.table = table;
        self
    }

    pub fn kind(&self) -> &ResourceKind { &self.kind }

    /// Every capability wired.
    pub fn legacy_storage(self: Arc<Self>) -> LegacyStorage {
        LegacyStorage::full(self)
    }

    /// Reads only; writes and lists report their capability as missing.
    pub fn read_only_storage(self: Arc<Self>) -> LegacyStorage {
        LegacyStorage::read_only(self)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Namespace column value for a request (`""` for cluster-scoped kinds).
    fn namespace_for(&self, ctx: &RequestContext, obj_ns: Option<&str>) -> StoreResult<String> {
        if !self.kind.namespaced {
            return Ok(String::new());
        }
        match (ctx.namespace.as_deref(), obj_ns) {
            (Some(want), Some(got)) if want != got => Err(StoreError::Invalid(format!(
                "{}: namespace {:?} does not match request namespace {:?}", self.kind.plural, got, want
            ))),
            (Some(ns), _) | (None, Some(ns)) if !ns.is_empty() => Ok(ns.to_string()),
            _ => Err(StoreError::Invalid(format!("{}: namespace is required", self.kind.plural))),
        }
    }

    fn to_resource(&self, row: LegacyRow) -> StoreResult<Resource> {
        let spec = serde_json::from_str(&row.spec).map_err(StoreError::internal)?;
        let labels = decode_map(&row.labels)?;
        let annotations = decode_map(&row.annotations)?;
        Ok(Resource {
            api_version: self.kind.api_version(),
            kind: self.kind.kind.clone(),
            metadata: ObjectMeta {
                name: row.name,
                namespace: if row.namespace.is_empty() { None } else { Some(row.namespace) },
                uid: row.uid,
                resource_version: row.version.to_string(),
                generation: row.version,
                creation_timestamp: DateTime::<Utc>::from_timestamp(row.created, 0),
                labels,
                annotations,
            },
            spec,
        })
    }

    fn select_one(&self, conn: &Connection, ns: &str, name: &str) -> StoreResult<Option<LegacyRow>> {
        conn.query_row(
            &format!("SELECT {} FROM legacy_resources WHERE resource = ?1 AND namespace = ?2 AND name = ?3", COLUMNS),
            params![self.kind.plural, ns, name],
            LegacyRow::from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Rows in `(namespace, name)` order, optionally scoped to one namespace
    /// and starting strictly after `after`.
    fn select_many(&self, conn: &Connection, ns: Option<&str>, after: Option<&ObjectKey>) -> StoreResult<Vec<LegacyRow>> {
        let (after_ns, after_name) = match after {
            Some(k) => (k.namespace.clone().unwrap_or_default(), k.name.clone()),
            None => (String::new(), String::new()),
        };
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM legacy_resources
                 WHERE resource = ?1
                   AND (?2 IS NULL OR namespace = ?2)
                   AND (namespace > ?3 OR (namespace = ?3 AND name > ?4))
                 ORDER BY namespace, name",
                COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![self.kind.plural, ns, after_ns, after_name], LegacyRow::from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn insert(&self, conn: &Connection, row: &LegacyRow) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO legacy_resources(resource, namespace, name, uid, version, created, spec, labels, annotations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.kind.plural, row.namespace, row.name, row.uid, row.version, row.created, row.spec, row.labels,
                row.annotations
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn new_row(&self, ns: String, name: &str, obj: &Resource) -> StoreResult<LegacyRow> {
        Ok(LegacyRow {
            namespace: ns,
            name: name.to_string(),
            uid: if obj.uid().is_empty() { Uuid::new_v4().to_string() } else { obj.uid().to_string() },
            version: 1,
            created: obj.metadata.creation_timestamp.map(|t| t.timestamp()).unwrap_or_else(now_ts),
            spec: encode_spec(&obj.spec)?,
            labels: encode_map(&obj.metadata.labels)?,
            annotations: encode_map(&obj.metadata.annotations)?,
        })
    }

    fn check_name(&self, obj: &mut Resource, name: &str) -> StoreResult<()> {
        if obj.metadata.name.is_empty() {
            obj.metadata.name = name.to_string();
        } else if obj.metadata.name != name {
            return Err(StoreError::Invalid(format!(
                "{}: name {:?} does not match {:?}", self.kind.plural, obj.metadata.name, name
            )));
        }
        Ok(())
    }

    fn observe(&self, op: &'static str, started: std::time::Instant) {
        histogram!("legacy_op_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op);
    }
}

impl Scoper for SqliteLegacyStore {
    fn namespace_scoped(&self) -> bool { self.kind.namespaced }
    fn singular_name(&self) -> String { self.kind.singular.clone() }
}

impl TableConvertor for SqliteLegacyStore {
    fn convert_to_table(&self, _ctx: &RequestContext, input: TableInput<'_>, opts: &TableOptions) -> StoreResult<Table> {
        Ok(self.table.convert(input, opts))
    }
}

#[async_trait]
impl Getter for SqliteLegacyStore {
    async fn get(&self, ctx: &RequestContext, name: &str, _opts: &GetOptions) -> StoreResult<Resource> {
        let started = std::time::Instant::now();
        let ns = self.namespace_for(ctx, None)?;
        let row = {
            let db = self.lock();
            self.select_one(&db, &ns, name)?
        };
        self.observe("get", started);
        match row {
            Some(r) => self.to_resource(r),
            None => Err(StoreError::not_found(&self.kind.plural, name)),
        }
    }
}

#[async_trait]
impl Creater for SqliteLegacyStore {
    async fn create(
        &self,
        ctx: &RequestContext,
        mut obj: Resource,
        validate: Option<&ValidateObjectFn>,
        opts: &CreateOptions,
    ) -> StoreResult<Resource> {
        let started = std::time::Instant::now();
        let ns = self.namespace_for(ctx, obj.namespace())?;
        let name = obj.name().to_string();
        if name.is_empty() {
            return Err(StoreError::Invalid(format!("{}: name is required", self.kind.plural)));
        }
        obj.metadata.namespace = if ns.is_empty() { None } else { Some(ns.clone()) };
        if let Some(v) = validate {
            v(&obj)?;
        }
        let row = {
            let mut db = self.lock();
            let tx = db.transaction().map_err(db_err)?;
            if self.select_one(&tx, &ns, &name)?.is_some() {
                return Err(StoreError::already_exists(&self.kind.plural, &name));
            }
            let row = self.new_row(ns, &name, &obj)?;
            if !opts.dry_run {
                self.insert(&tx, &row)?;
                tx.commit().map_err(db_err)?;
            }
            row
        };
        self.observe("create", started);
        counter!("legacy_writes_total", 1u64, "op" => "create");
        debug!(resource = %self.kind.plural, name = %name, uid = %row.uid, "legacy: created");
        self.to_resource(row)
    }
}

#[async_trait]
impl Lister for SqliteLegacyStore {
    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
        let started = std::time::Instant::now();
        let sel = LabelSelector::from_option(opts.label_selector.as_deref())?;
        let after = match opts.continue_token.as_deref() {
            Some(t) => Some(
                ObjectKey::from_continue_token(t)
                    .ok_or_else(|| StoreError::Invalid(format!("invalid continue token {:?}", t)))?,
            ),
            None => None,
        };
        let scope = if self.kind.namespaced { ctx.namespace.as_deref() } else { None };
        let rows = {
            let db = self.lock();
            self.select_many(&db, scope, after.as_ref())?
        };
        let mut items: Vec<Resource> = Vec::new();
        let mut continue_token = None;
        for row in rows {
            let obj = self.to_resource(row)?;
            if !sel.matches(&obj.metadata.labels) {
                continue;
            }
            if let Some(limit) = opts.limit.filter(|l| *l > 0) {
                if items.len() == limit {
                    continue_token = items.last().map(|o| o.key().to_continue_token());
                    break;
                }
            }
            items.push(obj);
        }
        self.observe("list", started);
        Ok(ResourceList { resource_version: String::new(), continue_token, items })
    }
}

#[async_trait]
impl Updater for SqliteLegacyStore {
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
        let ns = self.namespace_for(ctx, None)?;
        let plural = &self.kind.plural;
        let (row, created) = {
            let mut db = self.lock();
            let tx = db.transaction().map_err(db_err)?;
            let (row, created) = match self.select_one(&tx, &ns, name)? {
                None => {
                    if !force_allow_create {
                        return Err(StoreError::not_found(plural, name));
                    }
                    let mut obj = info.updated_object(None)?;
                    self.check_name(&mut obj, name)?;
                    if let Some(v) = create_validation {
                        v(&obj)?;
                    }
                    let row = self.new_row(ns.clone(), name, &obj)?;
                    if !opts.dry_run {
                        self.insert(&tx, &row)?;
                    }
                    (row, true)
                }
                Some(current) => {
                    let old = self.to_resource(current.clone())?;
                    if let Some(p) = info.preconditions() {
                        p.check(plural, &old)?;
                    }
                    let mut obj = info.updated_object(Some(&old))?;
                    self.check_name(&mut obj, name)?;
                    if !obj.resource_version().is_empty() && obj.resource_version() != old.resource_version() {
                        return Err(StoreError::Conflict(format!(
                            "{} {:?}: legacy version {} does not match {}",
                            plural, name, obj.resource_version(), old.resource_version()
                        )));
                    }
                    if let Some(v) = update_validation {
                        v(&obj, &old)?;
                    }
                    let row = LegacyRow {
                        version: current.version + 1,
                        spec: encode_spec(&obj.spec)?,
                        labels: encode_map(&obj.metadata.labels)?,
                        annotations: encode_map(&obj.metadata.annotations)?,
                        ..current
                    };
                    if !opts.dry_run {
                        tx.execute(
                            "UPDATE legacy_resources SET version = ?4, spec = ?5, labels = ?6, annotations = ?7
                             WHERE resource = ?1 AND namespace = ?2 AND name = ?3",
                            params![plural, row.namespace, row.name, row.version, row.spec, row.labels, row.annotations],
                        )
                        .map_err(db_err)?;
                    }
                    (row, false)
                }
            };
            if !opts.dry_run {
                tx.commit().map_err(db_err)?;
            }
            (row, created)
        };
        self.observe("update", started);
        counter!("legacy_writes_total", 1u64, "op" => "update");
        debug!(resource = %plural, name = %name, version = row.version, created, "legacy: updated");
        Ok((self.to_resource(row)?, created))
    }
}

#[async_trait]
impl GracefulDeleter for SqliteLegacyStore {
    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
    ) -> StoreResult<(Resource, bool)> {
        let started = std::time::Instant::now();
        let ns = self.namespace_for(ctx, None)?;
        let plural = &self.kind.plural;
        let old = {
            let mut db = self.lock();
            let tx = db.transaction().map_err(db_err)?;
            let row = self.select_one(&tx, &ns, name)?.ok_or_else(|| StoreError::not_found(plural, name))?;
            let old = self.to_resource(row)?;
            if let Some(p) = &opts.preconditions {
                p.check(plural, &old)?;
            }
            if let Some(v) = validate {
                v(&old)?;
            }
            if !opts.dry_run {
                tx.execute(
                    "DELETE FROM legacy_resources WHERE resource = ?1 AND namespace = ?2 AND name = ?3",
                    params![plural, ns, name],
                )
                .map_err(db_err)?;
                tx.commit().map_err(db_err)?;
            }
            old
        };
        self.observe("delete", started);
        counter!("legacy_writes_total", 1u64, "op" => "delete");
        debug!(resource = %plural, name = %name, "legacy: deleted");
        Ok((old, false))
    }
}

#[async_trait]
impl CollectionDeleter for SqliteLegacyStore {
    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StoreResult<ResourceList> {
        let started = std::time::Instant::now();
        let sel = LabelSelector::from_option(list_opts.label_selector.as_deref())?;
        let scope = if self.kind.namespaced { ctx.namespace.as_deref() } else { None };
        let deleted = {
            let mut db = self.lock();
            let tx = db.transaction().map_err(db_err)?;
            let mut deleted = Vec::new();
            for row in self.select_many(&tx, scope, None)? {
                let obj = self.to_resource(row)?;
                if !sel.matches(&obj.metadata.labels) {
                    continue;
                }
                if let Some(v) = validate {
                    v(&obj)?;
                }
                if !opts.dry_run {
                    tx.execute(
                        "DELETE FROM legacy_resources WHERE resource = ?1 AND namespace = ?2 AND name = ?3",
                        params![self.kind.plural, obj.namespace().unwrap_or(""), obj.name()],
                    )
                    .map_err(db_err)?;
                }
                deleted.push(obj);
            }
            if !opts.dry_run {
                tx.commit().map_err(db_err)?;
            }
            deleted
        };
        self.observe("delete_collection", started);
        counter!("legacy_writes_total", deleted.len() as u64, "op" => "delete");
        debug!(resource = %self.kind.plural, count = deleted.len(), "legacy: collection deleted");
        Ok(ResourceList::new(deleted))
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".dualwrite");
        let _ = std::fs::create_dir_all(&p);
        p.push("legacy.db");
        return p.to_string_lossy().to_string();
    }
    "legacy.db".to_string()
}

/// Seconds since the epoch; the legacy schema stores whole seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("dualwrite-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    fn kind() -> ResourceKind {
        ResourceKind::new("example.io", "v1", "Folder", "folders", true)
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let path = temp_db();
        let ctx = RequestContext::namespaced("org-1");
        let uid = {
            let s = SqliteLegacyStore::open(&path, kind()).unwrap();
            let o = Resource::new("", "", "general").with_spec(serde_json::json!({"title": "General"}));
            s.create(&ctx, o, None, &CreateOptions::default()).await.unwrap().uid().to_string()
        };
        let s = SqliteLegacyStore::open(&path, kind()).unwrap();
        let got = s.get(&ctx, "general", &GetOptions::default()).await.unwrap();
        assert_eq!(got.uid(), uid);
        assert_eq!(got.spec["title"], "General");
        assert_eq!(got.api_version, "example.io/v1");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn labels_and_annotations_round_trip_and_drive_selectors() {
        let s = SqliteLegacyStore::open_in_memory(kind()).unwrap();
        let ctx = RequestContext::namespaced("org-1");
        let infra = Resource::new("", "", "infra")
            .with_label("team", "infra")
            .with_annotation("grafana.app/folder", "x")
            .with_spec(serde_json::json!({}));
        s.create(&ctx, infra, None, &CreateOptions::default()).await.unwrap();
        s.create(&ctx, Resource::new("", "", "web").with_label("team", "web"), None, &CreateOptions::default())
            .await
            .unwrap();

        let got = s.get(&ctx, "infra", &GetOptions::default()).await.unwrap();
        assert_eq!(got.metadata.labels["team"], "infra");
        assert_eq!(got.metadata.annotations["grafana.app/folder"], "x");

        let picked = s.list(&ctx, &ListOptions::selector("team=infra")).await.unwrap();
        assert_eq!(picked.names(), vec!["infra"]);

        let relabel = UpdateFn::new(|old: Option<&Resource>| Ok(old.cloned().unwrap_or_default().with_label("team", "web")));
        s.update(&ctx, "infra", &relabel, None, None, false, &UpdateOptions::default()).await.unwrap();
        let gone = s
            .delete_collection(&ctx, None, &DeleteOptions::default(), &ListOptions::selector("team=web"))
            .await
            .unwrap();
        assert_eq!(gone.names(), vec!["infra", "web"]);
        assert!(s.list(&ctx, &ListOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn opening_an_old_database_adds_the_labels_column() {
        let path = temp_db();
        {
            let db = Connection::open(&path).unwrap();
            db.execute(
                "CREATE TABLE legacy_resources (
                    resource TEXT NOT NULL, namespace TEXT NOT NULL, name TEXT NOT NULL,
                    uid TEXT NOT NULL, version INTEGER NOT NULL, created INTEGER NOT NULL,
                    spec TEXT NOT NULL, annotations TEXT NOT NULL DEFAULT '{}',
                    PRIMARY KEY (resource, namespace, name))",
                [],
            )
            .unwrap();
            db.execute(
                "INSERT INTO legacy_resources VALUES ('folders', 'org-1', 'old', 'u-old', 3, 0, '{}', '{}')",
                [],
            )
            .unwrap();
        }
        let s = SqliteLegacyStore::open(&path, kind()).unwrap();
        let ctx = RequestContext::namespaced("org-1");
        let old = s.get(&ctx, "old", &GetOptions::default()).await.unwrap();
        assert_eq!(old.resource_version(), "3");
        assert!(old.metadata.labels.is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
