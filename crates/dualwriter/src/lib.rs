//! DualWriter: one storage facade over a legacy store and a unified store.
//!
//! The active [`Mode`] is fixed at construction and decides, per operation,
//! which store is read, which stores are written, and in what order. Store
//! calls within one operation are sequential; nothing runs in the background.

#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use dualwrite_core::prelude::*;
use serde::{Deserialize, Serialize};

mod base;
pub mod config;
mod drift;
pub mod enrich;
mod mode1;
mod mode2;
mod mode3;
pub mod registry;
mod telemetry;
pub mod wrapper;

pub use config::{ConfigError, DualWriterConfig};
pub use drift::{DriftEntry, DriftState};
pub use registry::{DualWriterRegistry, RegistryError};
pub use wrapper::{apply_precomputed, PrecomputedUpdate, UpdateArgs};

/// Which store renders tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableSource {
    Legacy,
    Unified,
}

impl TableSource {
    /// The store callers read from in `mode`.
    pub fn default_for(mode: Mode) -> Self {
        match mode {
            Mode::Mode1 | Mode::Mode2 => TableSource::Legacy,
            Mode::Mode0 | Mode::Mode3 => TableSource::Unified,
        }
    }
}

pub struct DualWriter {
    mode: Mode,
    legacy: LegacyStorage,
    unified: Arc<dyn UnifiedStore>,
    table_source: TableSource,
}

impl DualWriter {
    pub fn new(mode: Mode, legacy: LegacyStorage, unified: Arc<dyn UnifiedStore>) -> Self {
        Self { mode, legacy, unified, table_source: TableSource::default_for(mode) }
    }

    pub fn with_table_source(mut self, source: TableSource) -> Self {
        self.table_source = source;
        self
    }

    pub fn mode(&self) -> Mode { self.mode }
    pub fn legacy(&self) -> &LegacyStorage { &self.legacy }
    pub fn unified(&self) -> &dyn UnifiedStore { self.unified.as_ref() }
    pub fn table_source(&self) -> TableSource { self.table_source }
}

impl std::fmt::Debug for DualWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualWriter")
            .field("mode", &self.mode)
            .field("legacy", &self.legacy)
            .field("table_source", &self.table_source)
            .finish()
    }
}

impl Scoper for DualWriter {
    fn namespace_scoped(&self) -> bool { self.legacy.base().namespace_scoped() }
    fn singular_name(&self) -> String { self.legacy.base().singular_name() }
}

impl TableConvertor for DualWriter {
    fn convert_to_table(&self, ctx: &RequestContext, input: TableInput<'_>, opts: &TableOptions) -> StoreResult<Table> {
        match self.table_source {
            TableSource::Legacy => self.legacy.base().convert_to_table(ctx, input, opts),
            TableSource::Unified => self.unified.convert_to_table(ctx, input, opts),
        }
    }
}

#[async_trait]
impl Getter for DualWriter {
    async fn get(&self, ctx: &RequestContext, name: &str, opts: &GetOptions) -> StoreResult<Resource> {
        match self.mode {
            Mode::Mode0 => base::get(self, ctx, name, opts).await,
            Mode::Mode1 => mode1::get(self, ctx, name, opts).await,
            Mode::Mode2 => mode2::get(self, ctx, name, opts).await,
            Mode::Mode3 => mode3::get(self, ctx, name, opts).await,
        }
    }
}

#[async_trait]
impl Creater for DualWriter {
    async fn create(
        &self,
        ctx: &RequestContext,
        obj: Resource,
        validate: Option<&ValidateObjectFn>,
        opts: &CreateOptions,
    ) -> StoreResult<Resource> {
        match self.mode {
            Mode::Mode0 => base::create(self, ctx, obj, validate, opts).await,
            Mode::Mode1 => mode1::create(self, ctx, obj, validate, opts).await,
            Mode::Mode2 => mode2::create(self, ctx, obj, validate, opts).await,
            Mode::Mode3 => mode3::create(self, ctx, obj, validate, opts).await,
        }
    }
}

#[async_trait]
impl Lister for DualWriter {
    async fn list(&self, ctx: &RequestContext, opts: &ListOptions) -> StoreResult<ResourceList> {
        match self.mode {
            Mode::Mode0 => base::list(self, ctx, opts).await,
            Mode::Mode1 => mode1::list(self, ctx, opts).await,
            Mode::Mode2 => mode2::list(self, ctx, opts).await,
            Mode::Mode3 => mode3::list(self, ctx, opts).await,
        }
    }
}

#[async_trait]
impl Updater for DualWriter {
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
        let args = UpdateArgs { create_validation, update_validation, force_allow_create, opts };
        match self.mode {
            Mode::Mode0 => base::update(self, ctx, name, info, args).await,
            Mode::Mode1 => mode1::update(self, ctx, name, info, args).await,
            Mode::Mode2 => mode2::update(self, ctx, name, info, args).await,
            Mode::Mode3 => mode3::update(self, ctx, name, info, args).await,
        }
    }
}

#[async_trait]
impl GracefulDeleter for DualWriter {
    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
    ) -> StoreResult<(Resource, bool)> {
        match self.mode {
            Mode::Mode0 => base::delete(self, ctx, name, validate, opts).await,
            Mode::Mode1 => mode1::delete(self, ctx, name, validate, opts).await,
            Mode::Mode2 => mode2::delete(self, ctx, name, validate, opts).await,
            Mode::Mode3 => mode3::delete(self, ctx, name, validate, opts).await,
        }
    }
}

#[async_trait]
impl CollectionDeleter for DualWriter {
    async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<&ValidateObjectFn>,
        opts: &DeleteOptions,
        list_opts: &ListOptions,
    ) -> StoreResult<ResourceList> {
        match self.mode {
            Mode::Mode0 => base::delete_collection(self, ctx, validate, opts, list_opts).await,
            Mode::Mode1 => mode1::delete_collection(self, ctx, validate, opts, list_opts).await,
            Mode::Mode2 => mode2::delete_collection(self, ctx, validate, opts, list_opts).await,
            Mode::Mode3 => mode3::delete_collection(self, ctx, validate, opts, list_opts).await,
        }
    }
}
