use serde::{Deserialize, Serialize};

/// A served resource type: group/version/kind plus the names a store reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name, e.g. `dashboards`.
    pub plural: String,
    pub singular: String,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            singular: kind.to_ascii_lowercase(),
            namespaced,
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Registry key: `plural` for the core group, `plural.group` otherwise.
    pub fn resource_key(&self) -> String {
        if self.group.is_empty() {
            self.plural.clone()
        } else {
            format!("{}.{}", self.plural, self.group)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys() {
        let k = ResourceKind::new("dashboard.example.io", "v1", "Dashboard", "dashboards", true);
        assert_eq!(k.api_version(), "dashboard.example.io/v1");
        assert_eq!(k.gvk_key(), "dashboard.example.io/v1/Dashboard");
        assert_eq!(k.resource_key(), "dashboards.dashboard.example.io");
        assert_eq!(k.singular, "dashboard");
        let core = ResourceKind::new("", "v1", "ConfigMap", "configmaps", true);
        assert_eq!(core.api_version(), "v1");
        assert_eq!(core.resource_key(), "configmaps");
    }
}
