//! kwatch core: field projection, change detection and event records for watched resources

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod emit;
pub mod filter;
pub mod paths;
pub mod sync;
pub mod unit;

pub use config::{Config, ConfigError, ResourceConfig};
pub use emit::{EmitError, EventEmitter, MemorySink};
pub use filter::{in_scope, is_notable_change, notable_update, object_namespace, FilterSpec};
pub use paths::{nested_field, project, remove_nested_field, set_nested_field, split_path, trees_equal};
pub use sync::{all_synced, wait_for_sync, SyncFlag, DEFAULT_POLL_INTERVAL};
pub use unit::WatchUnit;

/// Generic object tree as delivered by the watch layer (null/bool/number/string/sequence/mapping).
pub type ObjectTree = serde_json::Value;

/// Group/version/resource triple identifying a watched type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceIdentity {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Add => "Add",
            EventKind::Update => "Update",
            EventKind::Delete => "Delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notable change, carrying the filtered snapshot of the object.
#[derive(Debug, Clone)]
pub struct Event<'a> {
    pub kind: EventKind,
    pub identity: &'a ResourceIdentity,
    pub obj: ObjectTree,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display_omits_core_group() {
        assert_eq!(ResourceIdentity::new("", "v1", "pods").to_string(), "v1/pods");
        assert_eq!(ResourceIdentity::new("apps", "v1", "deployments").to_string(), "apps/v1/deployments");
    }

    #[test]
    fn event_kind_serializes_as_name() {
        assert_eq!(serde_json::to_value(EventKind::Update).unwrap(), serde_json::json!("Update"));
        assert_eq!(EventKind::Delete.to_string(), "Delete");
    }
}
