//! Resource objects as both stores see them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Creation-time identity. Assigned once by whichever store creates first.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Change token scoped to one store.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Resource {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            metadata: ObjectMeta { name: name.to_string(), ..Default::default() },
            spec: serde_json::Value::Null,
        }
    }

    pub fn with_namespace(mut self, ns: &str) -> Self {
        self.metadata.namespace = Some(ns.to_string());
        self
    }

    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_label(mut self, k: &str, v: &str) -> Self {
        self.metadata.labels.insert(k.to_string(), v.to_string());
        self
    }

    pub fn with_annotation(mut self, k: &str, v: &str) -> Self {
        self.metadata.annotations.insert(k.to_string(), v.to_string());
        self
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.metadata.uid = uid.to_string();
        self
    }

    pub fn with_resource_version(mut self, rv: &str) -> Self {
        self.metadata.resource_version = rv.to_string();
        self
    }

    pub fn name(&self) -> &str { &self.metadata.name }
    pub fn namespace(&self) -> Option<&str> { self.metadata.namespace.as_deref() }
    pub fn uid(&self) -> &str { &self.metadata.uid }
    pub fn resource_version(&self) -> &str { &self.metadata.resource_version }

    pub fn key(&self) -> ObjectKey {
        ObjectKey { namespace: self.metadata.namespace.clone(), name: self.metadata.name.clone() }
    }

    /// Same identity and same spec. Store-local metadata (resourceVersion,
    /// uid, labels, annotations, timestamps) is not compared.
    pub fn same_state(&self, other: &Resource) -> bool {
        self.metadata.name == other.metadata.name
            && self.metadata.namespace == other.metadata.namespace
            && self.spec == other.spec
    }
}

/// `(namespace, name)` identity of an object within one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }

    /// Opaque continuation token for keyset paging: resume strictly after this key.
    pub fn to_continue_token(&self) -> String {
        format!("{}/{}", self.namespace.as_deref().unwrap_or(""), self.name)
    }

    pub fn from_continue_token(token: &str) -> Option<Self> {
        let (ns, name) = token.split_once('/')?;
        if name.is_empty() {
            return None;
        }
        let namespace = if ns.is_empty() { None } else { Some(ns.to_string()) };
        Some(Self { namespace, name: name.to_string() })
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// Set when more results exist past this page.
    #[serde(default, rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    pub items: Vec<Resource>,
}

impl ResourceList {
    pub fn new(items: Vec<Resource>) -> Self {
        Self { resource_version: String::new(), continue_token: None, items }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|o| o.name()).collect()
    }
}
