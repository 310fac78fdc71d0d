//! Per-request context and option structs passed through to both stores.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::object::Resource;

/// Request-scoped values. Cancellation is by dropping the operation's future;
/// nothing here carries a deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Namespace the request is scoped to; `None` means all namespaces
    /// (or a cluster-scoped resource).
    pub namespace: Option<String>,
    /// Correlation id for logs; empty when the caller has none.
    pub request_id: String,
}

impl RequestContext {
    pub fn namespaced(ns: &str) -> Self {
        Self { namespace: Some(ns.to_string()), request_id: String::new() }
    }

    pub fn cluster() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }
}

/// Optimistic-concurrency expectations a write must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl Preconditions {
    pub fn uid(uid: &str) -> Self {
        Self { uid: Some(uid.to_string()), resource_version: None }
    }

    pub fn resource_version(rv: &str) -> Self {
        Self { uid: None, resource_version: Some(rv.to_string()) }
    }

    /// Same preconditions minus the resource version, for a store whose
    /// version tokens differ from the caller's.
    pub fn without_resource_version(&self) -> Option<Preconditions> {
        let p = Preconditions { uid: self.uid.clone(), resource_version: None };
        if p.uid.is_none() { None } else { Some(p) }
    }

    pub fn check(&self, resource: &str, current: &Resource) -> StoreResult<()> {
        if let Some(uid) = &self.uid {
            if uid != current.uid() {
                return Err(StoreError::Conflict(format!(
                    "precondition failed for {} {:?}: uid {} does not match {}",
                    resource, current.name(), uid, current.uid()
                )));
            }
        }
        if let Some(rv) = &self.resource_version {
            if rv != current.resource_version() {
                return Err(StoreError::Conflict(format!(
                    "precondition failed for {} {:?}: resourceVersion {} does not match {}",
                    resource, current.name(), rv, current.resource_version()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOptions {
    pub resource_version: Option<String>,
}

impl GetOptions {
    /// Options for a store that does not share the caller's resource versions.
    pub fn without_resource_version(&self) -> GetOptions {
        GetOptions { resource_version: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Equality-based selector, e.g. `team=infra,tier!=db,!legacy`.
    pub label_selector: Option<String>,
    pub limit: Option<usize>,
    pub continue_token: Option<String>,
}

impl ListOptions {
    pub fn selector(s: &str) -> Self {
        Self { label_selector: Some(s.to_string()), ..Default::default() }
    }

    /// Same filter without paging fields.
    pub fn unpaged(&self) -> Self {
        Self { label_selector: self.label_selector.clone(), limit: None, continue_token: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub preconditions: Option<Preconditions>,
    pub dry_run: bool,
}

impl DeleteOptions {
    /// Options for a store that does not share the caller's resource versions.
    pub fn without_resource_version(&self) -> DeleteOptions {
        DeleteOptions {
            preconditions: self.preconditions.as_ref().and_then(|p| p.without_resource_version()),
            dry_run: self.dry_run,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    pub no_headers: bool,
    /// Attach the source object to every row.
    pub include_object: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preconditions_check_uid_and_rv() {
        let cur = Resource::new("v1", "Thing", "a").with_uid("u1").with_resource_version("5");
        assert!(Preconditions::default().check("things", &cur).is_ok());
        assert!(Preconditions::uid("u1").check("things", &cur).is_ok());
        assert!(Preconditions::uid("u2").check("things", &cur).unwrap_err().is_conflict());
        assert!(Preconditions::resource_version("4").check("things", &cur).unwrap_err().is_conflict());
    }

    #[test]
    fn stripping_rv_drops_empty_preconditions() {
        assert_eq!(Preconditions::resource_version("3").without_resource_version(), None);
        let both = Preconditions { uid: Some("u".into()), resource_version: Some("3".into()) };
        assert_eq!(both.without_resource_version(), Some(Preconditions::uid("u")));
        let opts = DeleteOptions { preconditions: Some(both), dry_run: true };
        let stripped = opts.without_resource_version();
        assert!(stripped.dry_run);
        assert_eq!(stripped.preconditions, Some(Preconditions::uid("u")));
    }
}
