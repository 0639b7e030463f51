//! Namespace scoping and change detection over projected snapshots.

use serde::{Deserialize, Serialize};

use crate::paths::{project, trees_equal};
use crate::ObjectTree;

/// Include/exclude paths and allowed namespaces for one watched resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub namespaces: Vec<String>,
}

impl FilterSpec {
    /// Common lists followed by the resource's own lists. No deduplication.
    pub fn merged(common: &FilterSpec, own: &FilterSpec) -> Self {
        fn concat(a: &[String], b: &[String]) -> Vec<String> {
            a.iter().chain(b).cloned().collect()
        }
        Self {
            include_paths: concat(&common.include_paths, &own.include_paths),
            exclude_paths: concat(&common.exclude_paths, &own.exclude_paths),
            namespaces: concat(&common.namespaces, &own.namespaces),
        }
    }

    pub fn project(&self, tree: &ObjectTree) -> ObjectTree {
        project(tree, &self.include_paths, &self.exclude_paths)
    }

    pub fn in_scope(&self, tree: &ObjectTree) -> bool {
        in_scope(tree, &self.namespaces)
    }
}

/// `metadata.namespace`, or `""` for cluster-scoped objects.
pub fn object_namespace(tree: &ObjectTree) -> &str {
    tree.get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// Cluster-scoped objects and an empty namespace set are always in scope.
pub fn in_scope<S: AsRef<str>>(tree: &ObjectTree, namespaces: &[S]) -> bool {
    let ns = object_namespace(tree);
    if ns.is_empty() || namespaces.is_empty() {
        return true;
    }
    namespaces.iter().any(|n| n.as_ref() == ns)
}

/// Projected `new` when it differs structurally from projected `old`.
pub fn notable_update(old: &ObjectTree, new: &ObjectTree, spec: &FilterSpec) -> Option<ObjectTree> {
    let projected_new = spec.project(new);
    if trees_equal(&spec.project(old), &projected_new) {
        None
    } else {
        Some(projected_new)
    }
}

pub fn is_notable_change(old: &ObjectTree, new: &ObjectTree, spec: &FilterSpec) -> bool {
    notable_update(old, new, spec).is_some()
}
