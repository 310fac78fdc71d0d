//! Metadata carried from one store's copy of an object onto the other's.

use dualwrite_core::Resource;

/// Copy `old`'s labels onto `created` (full replace) and merge `old`'s
/// annotations into it (old wins on collision).
pub fn enrich_object(old: &Resource, created: &mut Resource) {
    created.metadata.labels = old.metadata.labels.clone();
    for (k, v) in &old.metadata.annotations {
        created.metadata.annotations.insert(k.clone(), v.clone());
    }
}

/// Version tokens are per store; never hand one store's token to the other.
pub fn strip_resource_version(obj: &mut Resource) {
    obj.metadata.resource_version.clear();
}

/// `resourceVersion` and `uid` of an object as read before an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub resource_version: String,
    pub uid: String,
}

impl Identity {
    pub fn of(obj: &Resource) -> Self {
        Self { resource_version: obj.resource_version().to_string(), uid: obj.uid().to_string() }
    }

    /// Put the captured identity back. An empty captured uid leaves the
    /// object's own uid alone.
    pub fn restore(&self, obj: &mut Resource) {
        obj.metadata.resource_version = self.resource_version.clone();
        if !self.uid.is_empty() {
            obj.metadata.uid = self.uid.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_replace_and_annotations_union() {
        let old = Resource::new("v1", "Dashboard", "a").with_label("x", "1").with_annotation("a", "1").with_annotation("c", "old");
        let mut created = Resource::new("v1", "Dashboard", "a").with_label("y", "2").with_annotation("b", "2").with_annotation("c", "new");
        enrich_object(&old, &mut created);
        assert_eq!(created.metadata.labels.len(), 1);
        assert_eq!(created.metadata.labels["x"], "1");
        assert_eq!(created.metadata.annotations.len(), 3);
        assert_eq!(created.metadata.annotations["a"], "1");
        assert_eq!(created.metadata.annotations["b"], "2");
        assert_eq!(created.metadata.annotations["c"], "old");
    }

    #[test]
    fn restore_keeps_own_uid_when_none_was_captured() {
        let id = Identity::of(&Resource::new("v1", "Dashboard", "a").with_resource_version("7"));
        let mut obj = Resource::new("v1", "Dashboard", "a").with_uid("legacy-uid").with_resource_version("1");
        id.restore(&mut obj);
        assert_eq!(obj.resource_version(), "7");
        assert_eq!(obj.uid(), "legacy-uid");

        let id = Identity::of(&Resource::new("v1", "Dashboard", "a").with_uid("u").with_resource_version("9"));
        id.restore(&mut obj);
        assert_eq!((obj.resource_version(), obj.uid()), ("9", "u"));
    }
}
