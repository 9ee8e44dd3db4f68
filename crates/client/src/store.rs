//! The realtime store seam: a path-addressed JSON tree that pushes the full
//! value at a subscribed path whenever anything beneath it changes.
//!
//! Paths are `/`-separated (`users/{uid}/system0/sprinklerStatus`). Writing
//! `null` or an empty object deletes, and parents left empty by a write or
//! removal disappear, so "no data" and "empty object" are the same thing.

use serde_json::{Map, Value};
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::zone::ZoneId;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Full replacement value at the subscribed path; `None` when nothing is
    /// stored there.
    Value(Option<Value>),
    /// Transport-level failure. The subscription stays open; the store
    /// client is responsible for resuming.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("write rejected at '{path}': {reason}")]
    Rejected { path: String, reason: String },
    #[error("invalid store path '{0}'")]
    InvalidPath(String),
}

/// Receiving half of a subscription. Dropping it releases the subscription.
pub type Subscription = mpsc::UnboundedReceiver<StoreEvent>;

pub trait RemoteStore: Send + Sync + 'static {
    /// Push-based stream of the value at `path`, replaced wholesale on every
    /// change beneath it.
    fn subscribe(&self, path: &str)
        -> impl Future<Output = Result<Subscription, StoreError>> + Send;

    /// Overwrite a single field or a whole subtree.
    fn set(&self, path: &str, value: Value)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    fn remove(&self, path: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

pub fn user_path(uid: &str) -> String {
    format!("users/{uid}")
}

pub fn zone_path(uid: &str, zone: ZoneId) -> String {
    format!("users/{uid}/{zone}")
}

pub fn field_path(uid: &str, zone: ZoneId, field: &str) -> String {
    format!("users/{uid}/{zone}/{field}")
}

/// Split a path into segments, rejecting empty paths, empty segments and
/// MQTT wildcard characters.
pub fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let segs: Vec<&str> = path.split('/').collect();
    let valid = !path.is_empty()
        && segs
            .iter()
            .all(|s| !s.is_empty() && !s.contains(['+', '#']));
    if valid {
        Ok(segs)
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// True when one path is an ancestor of (or equal to) the other, i.e. a
/// change at one is visible at the other.
pub(crate) fn overlaps(a: &[String], b: &[&str]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

// ---------------------------------------------------------------------------
// JSON tree helpers
// ---------------------------------------------------------------------------

pub(crate) fn is_empty_node(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

pub(crate) fn get_at<'a, S: AsRef<str>>(root: &'a Value, segs: &[S]) -> Option<&'a Value> {
    segs.iter()
        .try_fold(root, |node, seg| node.as_object()?.get(seg.as_ref()))
        .filter(|v| !is_empty_node(v))
}

/// Replace the subtree at `segs`. Deleting values (`null`, `{}`) remove it.
pub(crate) fn set_at(root: &mut Value, segs: &[&str], value: Value) {
    if is_empty_node(&value) {
        remove_at(root, segs);
        return;
    }
    let Some((last, parents)) = segs.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}

/// Remove the subtree at `segs` and prune parents left empty.
pub(crate) fn remove_at(root: &mut Value, segs: &[&str]) {
    fn recurse(node: &mut Value, segs: &[&str]) {
        let Some((first, rest)) = segs.split_first() else {
            return;
        };
        let Value::Object(map) = node else { return };
        if rest.is_empty() {
            map.remove(*first);
            return;
        }
        if let Some(child) = map.get_mut(*first) {
            recurse(child, rest);
            if is_empty_node(child) {
                map.remove(*first);
            }
        }
    }

    if segs.is_empty() {
        *root = Value::Object(Map::new());
    } else {
        recurse(root, segs);
    }
}

/// Flatten a value into `(path, leaf)` pairs. Objects recurse; everything
/// else, arrays included, is a leaf. Empty objects contribute nothing.
pub(crate) fn leaves(prefix: &str, value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    collect_leaves(prefix, value, &mut out);
    out
}

fn collect_leaves(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (k, v) in map {
                collect_leaves(&format!("{prefix}/{k}"), v, out);
            }
        }
        other => out.push((prefix.to_string(), other.clone())),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- Paths ---------------------------------------------------------------

    #[test]
    fn path_builders() {
        assert_eq!(user_path("u1"), "users/u1");
        assert_eq!(zone_path("u1", ZoneId::new(3)), "users/u1/system3");
        assert_eq!(
            field_path("u1", ZoneId::MAIN, "sprinklerStatus"),
            "users/u1/system0/sprinklerStatus"
        );
    }

    #[test]
    fn segments_valid_path() {
        assert_eq!(segments("users/u1/system0").unwrap(), vec!["users", "u1", "system0"]);
    }

    #[test]
    fn segments_rejects_bad_paths() {
        for bad in ["", "users//x", "/users", "users/", "users/+/x", "users/#"] {
            assert!(
                matches!(segments(bad), Err(StoreError::InvalidPath(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn overlap_is_symmetric_prefix() {
        let sub: Vec<String> = vec!["users".into(), "u1".into()];
        assert!(overlaps(&sub, &["users", "u1", "system0", "humidity"]));
        assert!(overlaps(&sub, &["users"]));
        assert!(!overlaps(&sub, &["users", "u2", "system0"]));
    }

    // -- Tree ----------------------------------------------------------------

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = json!({});
        set_at(&mut root, &["users", "u1", "system0", "temperature"], json!(30));
        assert_eq!(root, json!({ "users": { "u1": { "system0": { "temperature": 30 } } } }));
    }

    #[test]
    fn set_replaces_subtree_wholesale() {
        let mut root = json!({ "a": { "b": { "x": 1, "y": 2 } } });
        set_at(&mut root, &["a", "b"], json!({ "z": 3 }));
        assert_eq!(root, json!({ "a": { "b": { "z": 3 } } }));
    }

    #[test]
    fn set_null_or_empty_deletes_and_prunes() {
        let mut root = json!({ "a": { "b": { "x": 1 } }, "c": 1 });
        set_at(&mut root, &["a", "b", "x"], Value::Null);
        assert_eq!(root, json!({ "c": 1 }));

        let mut root = json!({ "a": { "b": 1 } });
        set_at(&mut root, &["a"], json!({}));
        assert_eq!(root, json!({}));
    }

    #[test]
    fn remove_missing_path_is_noop() {
        let mut root = json!({ "a": 1 });
        remove_at(&mut root, &["b", "c"]);
        assert_eq!(root, json!({ "a": 1 }));
    }

    #[test]
    fn get_treats_empty_object_as_absent() {
        let root = json!({ "a": {}, "b": { "c": 5 } });
        assert_eq!(get_at(&root, &["a"]), None);
        assert_eq!(get_at(&root, &["b", "c"]), Some(&json!(5)));
        assert_eq!(get_at(&root, &["b", "c", "d"]), None);
    }

    #[test]
    fn leaves_flatten_objects_only() {
        let mut got = leaves(
            "users/u1/system1",
            &json!({ "battery": 10, "enable": true, "tags": [1, 2], "nested": { "k": "v" }, "gone": null }),
        );
        got.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            got,
            vec![
                ("users/u1/system1/battery".to_string(), json!(10)),
                ("users/u1/system1/enable".to_string(), json!(true)),
                ("users/u1/system1/nested/k".to_string(), json!("v")),
                ("users/u1/system1/tags".to_string(), json!([1, 2])),
            ]
        );
    }

    #[test]
    fn leaves_of_scalar_is_itself() {
        assert_eq!(leaves("a/b", &json!("ON")), vec![("a/b".to_string(), json!("ON"))]);
    }
}
