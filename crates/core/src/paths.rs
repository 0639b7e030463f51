//! Dotted-path addressing over object trees.
//!
//! Paths address nested mapping keys only (`metadata.labels.app`); there is no
//! array-index syntax. Traversal that runs into a non-mapping value is a no-op
//! for that path, never an error.

use serde_json::{Map, Value};

/// Split a dotted path into its segments. The empty path has no segments and
/// addresses nothing.
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.').collect()
}

/// Value at `segments`, if every intermediate node is a mapping.
pub fn nested_field<'a>(tree: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    if segments.is_empty() {
        return None;
    }
    let mut cur = tree;
    for seg in segments {
        cur = cur.as_object()?.get(*seg)?;
    }
    Some(cur)
}

/// Set `value` at `segments`, creating intermediate mappings as needed.
/// Returns false when an existing intermediate node is not a mapping.
pub fn set_nested_field(tree: &mut Value, segments: &[&str], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut cur = tree;
    for seg in parents {
        cur = match cur {
            Value::Object(map) => map.entry((*seg).to_string()).or_insert_with(|| Value::Object(Map::new())),
            _ => return false,
        };
    }
    match cur {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
            true
        }
        _ => false,
    }
}

/// Remove and return the value at `segments`. Absence is not an error.
pub fn remove_nested_field(tree: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut cur = tree;
    for seg in parents {
        cur = match cur {
            Value::Object(map) => map.get_mut(*seg)?,
            _ => return None,
        };
    }
    match cur {
        Value::Object(map) => map.remove(*last),
        _ => None,
    }
}

/// Project `tree` through include/exclude paths.
///
/// With no include paths the result starts as a full copy; otherwise it starts
/// empty and each included subtree is copied to the same path. Exclude paths are
/// then removed from the result.
pub fn project<S: AsRef<str>>(tree: &Value, include: &[S], exclude: &[S]) -> Value {
    let mut out = if include.is_empty() {
        tree.clone()
    } else {
        let mut out = Value::Object(Map::new());
        for path in include {
            let segments = split_path(path.as_ref());
            if let Some(v) = nested_field(tree, &segments) {
                set_nested_field(&mut out, &segments, v.clone());
            }
        }
        out
    };
    for path in exclude {
        remove_nested_field(&mut out, &split_path(path.as_ref()));
    }
    out
}

/// Structural equality: same variant at every position, mappings compared as
/// key sets (order irrelevant), sequences positionally, scalars exactly.
pub fn trees_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| trees_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| trees_equal(v, w)))
        }
        _ => false,
    }
}
