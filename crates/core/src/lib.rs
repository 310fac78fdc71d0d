//! DualWriter core types: resource model, request options, errors and the
//! storage capability traits both backing stores implement.

#![forbid(unsafe_code)]

pub mod error;
pub mod kind;
pub mod mode;
pub mod object;
pub mod options;
pub mod selector;
pub mod storage;
pub mod table;

pub use error::{Capability, StoreError, StoreResult};
pub use kind::ResourceKind;
pub use mode::{Mode, ModeParseError};
pub use object::{ObjectKey, ObjectMeta, Resource, ResourceList};
pub use options::{
    CreateOptions, DeleteOptions, GetOptions, ListOptions, Preconditions, RequestContext,
    TableOptions, UpdateOptions,
};
pub use selector::LabelSelector;
pub use table::{ColumnKind, ColumnSpec, Table, TableColumn, TableConverter, TableInput, TableRow};

pub mod prelude {
    pub use super::storage::{
        CollectionDeleter, Creater, GracefulDeleter, LegacyBase, LegacyStorage, Getter, Lister,
        Scoper, Storage, TableConvertor, UnifiedStore, UpdateFn, UpdatedObjectInfo, Updater,
        ValidateObjectFn, ValidateUpdateFn,
    };
    pub use super::{
        Capability, CreateOptions, DeleteOptions, GetOptions, ListOptions, Mode, ObjectKey,
        ObjectMeta, Preconditions, RequestContext, Resource, ResourceKind, ResourceList,
        StoreError, StoreResult, Table, TableInput, TableOptions, UpdateOptions,
    };
}
