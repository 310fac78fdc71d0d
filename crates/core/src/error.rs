//! Store error taxonomy shared by both backing stores and the DualWriter.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object::Resource;

/// Optional write/list capabilities a legacy store may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Creater,
    Updater,
    GracefulDeleter,
    CollectionDeleter,
    Lister,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Creater,
        Capability::Updater,
        Capability::GracefulDeleter,
        Capability::CollectionDeleter,
        Capability::Lister,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Creater => "creater",
            Capability::Updater => "updater",
            Capability::GracefulDeleter => "graceful-deleter",
            Capability::CollectionDeleter => "collection-deleter",
            Capability::Lister => "lister",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by stores and by the DualWriter.
///
/// Callers see the same shapes a single store would produce; the only
/// dual-write specific variants are `CapabilityMissing` and `PartialWrite`.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("not_found: {resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },
    #[error("already_exists: {resource} \"{name}\" already exists")]
    AlreadyExists { resource: String, name: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error("capability: legacy store does not implement {0}")]
    CapabilityMissing(Capability),
    /// The primary store accepted the write but the secondary did not.
    /// `object` is the primary store's result.
    #[error("partial_write: secondary store failed after primary write: {cause}")]
    PartialWrite { object: Box<Resource>, cause: Box<StoreError> },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        StoreError::NotFound { resource: resource.into(), name: name.into() }
    }

    pub fn already_exists(resource: impl Into<String>, name: impl Into<String>) -> Self {
        StoreError::AlreadyExists { resource: resource.into(), name: name.into() }
    }

    pub fn internal(e: impl fmt::Display) -> Self {
        StoreError::Internal(e.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Which capability was missing, if this is a capability error.
    pub fn missing_capability(&self) -> Option<Capability> {
        match self {
            StoreError::CapabilityMissing(c) => Some(*c),
            _ => None,
        }
    }

    /// Primary-store object carried by a partial write.
    pub fn partial_object(&self) -> Option<&Resource> {
        match self {
            StoreError::PartialWrite { object, .. } => Some(object),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_are_variant_based() {
        let nf = StoreError::not_found("dashboards", "a");
        assert!(nf.is_not_found());
        assert!(!nf.is_conflict());
        // a message that merely mentions "not found" is not a not-found error
        assert!(!StoreError::Internal("upstream not found".into()).is_not_found());
    }

    #[test]
    fn capability_errors_are_distinct() {
        let errs: Vec<StoreError> = Capability::ALL.iter().map(|c| StoreError::CapabilityMissing(*c)).collect();
        for (i, a) in errs.iter().enumerate() {
            for (j, b) in errs.iter().enumerate() {
                assert_eq!(i == j, a == b);
            }
        }
        assert_eq!(errs[0].missing_capability(), Some(Capability::Creater));
        assert_eq!(errs[0].to_string(), "capability: legacy store does not implement creater");
    }

    #[test]
    fn partial_write_keeps_primary_object() {
        let obj = Resource::new("v1", "Thing", "foo");
        let e = StoreError::PartialWrite {
            object: Box::new(obj.clone()),
            cause: Box::new(StoreError::Internal("boom".into())),
        };
        assert_eq!(e.partial_object(), Some(&obj));
        assert!(e.to_string().contains("boom"));
    }
}
