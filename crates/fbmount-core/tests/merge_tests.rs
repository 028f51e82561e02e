//! Merge, prune and virtual-state tests for the mirror tree.
//!
//! Run: `cargo nextest run -p fbmount-core merge_tests`

use fbmount_core::{
    ChildEntry, IdAllocator, MirrorTree, NodeKind, ROOT_ID, Scalar, TreeError,
};
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn tree() -> MirrorTree {
    MirrorTree::new(Arc::new(IdAllocator::new()), SystemTime::UNIX_EPOCH)
}

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn names(children: &[ChildEntry]) -> Vec<&str> {
    children.iter().map(|c| c.name.as_str()).collect()
}

fn child_id(tree: &MirrorTree, parent: u64, name: &str) -> u64 {
    tree.lookup_child(parent, name)
        .unwrap()
        .unwrap_or_else(|| panic!("missing child {name}"))
        .id
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_two_puts_build_a_directory() {
    let mut tree = tree();
    tree.apply_remote_change("/a/b", &json!(3.0), at(1)).unwrap();
    tree.apply_remote_change("/a/c", &json!("hi"), at(2)).unwrap();

    let a = child_id(&tree, ROOT_ID, "a");
    let children = tree.children(a).unwrap();
    assert_eq!(names(&children), vec!["b", "c"]);
    assert!(children.iter().all(|c| c.kind == NodeKind::File));

    let b = tree.lookup_child(a, "b").unwrap().unwrap();
    assert_eq!(b.scalar, Some(Scalar::Number(3.0)));
    let c = tree.lookup_child(a, "c").unwrap().unwrap();
    assert_eq!(c.scalar, Some(Scalar::String("hi".to_string())));
}

#[test]
fn test_local_file_confirmed_by_remote() {
    let mut tree = tree();
    let x = tree.create_local(ROOT_ID, "x", at(1), false).unwrap();

    let listing = tree.children(ROOT_ID).unwrap();
    assert_eq!(names(&listing), vec!["x"]);
    assert!(tree.snapshot(x.id).unwrap().virtual_new);

    tree.apply_remote_change("/x", &json!(5.0), at(2)).unwrap();
    let x = tree.snapshot(x.id).unwrap();
    assert!(!x.virtual_new);
    assert_eq!(x.content(), b"5");
}

#[test]
fn test_delete_prunes_empty_ancestors() {
    let mut tree = tree();
    tree.apply_remote_change("/a/b", &json!(3.0), at(1)).unwrap();
    tree.apply_remote_change("/a/b", &Value::Null, at(2)).unwrap();
    tree.apply_remote_change("/a", &Value::Null, at(3)).unwrap();

    assert!(tree.lookup_child(ROOT_ID, "a").unwrap().is_none());
    assert!(tree.children(ROOT_ID).unwrap().is_empty());
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_deep_delete_stops_at_populated_ancestor() {
    let mut tree = tree();
    tree.apply_remote_change("/a/keep", &json!(true), at(1)).unwrap();
    tree.apply_remote_change("/a/x/y/z", &json!(1), at(1)).unwrap();
    tree.apply_remote_change("/a/x/y/z", &Value::Null, at(2)).unwrap();
    assert_eq!(tree.to_json(), json!({"a": {"keep": true}}));
}

#[test]
fn test_delete_of_missing_path_is_noop() {
    let mut tree = tree();
    tree.apply_remote_change("/a/b", &json!(1), at(1)).unwrap();
    let before = tree.to_json();
    tree.apply_remote_change("/nope/deeper", &Value::Null, at(2)).unwrap();
    tree.apply_remote_change("/a/nope", &Value::Null, at(2)).unwrap();
    assert_eq!(tree.to_json(), before);
}

#[test]
fn test_malformed_path_leaves_tree_untouched() {
    let mut tree = tree();
    tree.apply_remote_change("/a", &json!(1), at(1)).unwrap();
    assert_eq!(
        tree.apply_remote_change("a/b", &json!(2), at(2)),
        Err(TreeError::InvalidPath("a/b".to_string()))
    );
    assert_eq!(
        tree.apply_remote_change("", &json!(2), at(2)),
        Err(TreeError::InvalidPath(String::new()))
    );
    assert_eq!(tree.to_json(), json!({"a": 1}));
}

#[test]
fn test_initial_snapshot() {
    let mut tree = tree();
    let snapshot = json!({
        "users": {"alice": {"age": 31, "admin": true}, "bob": {"age": 27}},
        "motd": "hello"
    });
    tree.apply_remote_change("/", &snapshot, at(1)).unwrap();
    assert_eq!(tree.to_json(), snapshot);

    let users = child_id(&tree, ROOT_ID, "users");
    let alice = child_id(&tree, users, "alice");
    assert_eq!(tree.snapshot(alice).unwrap().key, "/users/alice");
}

#[test]
fn test_delete_below_file_leaves_empty_directory() {
    let mut tree = tree();
    tree.apply_remote_change("/a/f", &json!("x"), at(1)).unwrap();
    tree.apply_remote_change("/a/f/g/h", &Value::Null, at(2)).unwrap();
    assert_eq!(tree.to_json(), json!({"a": {"f": {}}}));

    // a later delete inside the empty directory keeps it
    tree.apply_remote_change("/a/f/g", &Value::Null, at(3)).unwrap();
    assert_eq!(tree.to_json(), json!({"a": {"f": {}}}));

    tree.apply_remote_change("/a/f", &Value::Null, at(4)).unwrap();
    assert_eq!(tree.to_json(), json!({}));
}

#[test]
fn test_ids_never_reused_after_recreate() {
    let mut tree = tree();
    tree.apply_remote_change("/a", &json!(1), at(1)).unwrap();
    let first = child_id(&tree, ROOT_ID, "a");
    tree.apply_remote_change("/a", &Value::Null, at(2)).unwrap();
    tree.apply_remote_change("/a", &json!(1), at(3)).unwrap();
    let second = child_id(&tree, ROOT_ID, "a");
    assert_ne!(first, second);
    assert_eq!(tree.snapshot(first), Err(TreeError::StaleNode(first)));
}

// =============================================================================
// Virtual state
// =============================================================================

#[test]
fn test_virtual_propagation_through_local_directories() {
    let mut tree = tree();
    tree.apply_remote_change("/real/value", &json!(1), at(1)).unwrap();
    let real = child_id(&tree, ROOT_ID, "real");

    let d1 = tree.create_local(real, "d1", at(2), true).unwrap();
    let d2 = tree.create_local(d1.id, "d2", at(2), true).unwrap();
    let f = tree.create_local(d2.id, "f", at(2), false).unwrap();

    assert!(tree.snapshot(f.id).unwrap().virtual_new);
    assert!(tree.snapshot(d2.id).unwrap().virtual_new);
    assert!(tree.snapshot(d1.id).unwrap().virtual_new);
    // has another confirmed child
    assert!(!tree.snapshot(real).unwrap().virtual_new);

    tree.apply_remote_change("/real/d1/d2/f", &json!("x"), at(3)).unwrap();
    for id in [f.id, d2.id, d1.id, real] {
        assert!(!tree.snapshot(id).unwrap().virtual_new, "node {id} still virtual");
    }
}

#[test]
fn test_remote_echo_clears_modified() {
    let mut tree = tree();
    tree.apply_remote_change("/n", &json!(1), at(1)).unwrap();
    let n = child_id(&tree, ROOT_ID, "n");
    tree.record_local_write(n, Scalar::Number(2.0), at(2)).unwrap();
    assert!(tree.snapshot(n).unwrap().virtual_modified);

    tree.apply_remote_change("/n", &json!(2), at(3)).unwrap();
    let snap = tree.snapshot(n).unwrap();
    assert!(!snap.virtual_modified);
    assert_eq!(snap.scalar, Some(Scalar::Number(2.0)));
}

#[test]
fn test_remote_put_over_local_directory() {
    let mut tree = tree();
    let d = tree.create_local(ROOT_ID, "d", at(1), true).unwrap();
    tree.create_local(d.id, "local", at(1), false).unwrap();
    tree.apply_remote_change("/d", &json!({"remote": 1}), at(2)).unwrap();
    // the remote value is authoritative for the whole subtree
    assert_eq!(tree.to_json(), json!({"d": {"remote": 1}}));
    assert!(!tree.snapshot(d.id).unwrap().virtual_new);
}

// =============================================================================
// Properties
// =============================================================================

/// Reference model: set `value` at `path` inside a JSON object tree, then
/// drop objects left empty, never the root.
fn model_set(root: &mut Map<String, Value>, path: &[String], value: &Value) {
    /// Returns false when a delete ran into a missing entry, in which case
    /// nothing above it is pruned.
    fn set(node: &mut Map<String, Value>, path: &[String], value: &Value) -> bool {
        let (name, rest) = path.split_first().expect("non-empty path");
        if rest.is_empty() {
            if value.is_null() {
                node.remove(name);
            } else {
                node.insert(name.clone(), value.clone());
            }
            return true;
        }
        if value.is_null() && !node.contains_key(name) {
            return false;
        }
        let entry = node.entry(name.clone()).or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        if let Value::Object(child) = entry
            && set(child, rest, value)
            && child.is_empty()
        {
            node.remove(name);
        }
        true
    }
    set(root, path, value);
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1000i32..1000).prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::from),
    ]
}

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![Just("a"), Just("b"), Just("c")].prop_map(str::to_string)
}

proptest! {
    #[test]
    fn prop_merge_matches_model(
        ops in prop::collection::vec((prop::collection::vec(segment(), 1..4), leaf()), 1..40)
    ) {
        let mut tree = tree();
        let mut model = Map::new();
        for (i, (path, value)) in ops.iter().enumerate() {
            let joined = format!("/{}", path.join("/"));
            tree.apply_remote_change(&joined, value, at(i as u64)).unwrap();
            model_set(&mut model, path, value);
            prop_assert_eq!(tree.to_json(), Value::Object(model.clone()));
        }
    }

    #[test]
    fn prop_apply_is_idempotent(
        setup in prop::collection::vec((prop::collection::vec(segment(), 1..4), leaf()), 0..20),
        path in prop::collection::vec(segment(), 1..4),
        value in leaf(),
    ) {
        let mut tree = tree();
        for (p, v) in &setup {
            tree.apply_remote_change(&format!("/{}", p.join("/")), v, at(0)).unwrap();
        }
        let joined = format!("/{}", path.join("/"));
        tree.apply_remote_change(&joined, &value, at(1)).unwrap();
        let once = (tree.to_json(), tree.render());
        tree.apply_remote_change(&joined, &value, at(2)).unwrap();
        prop_assert_eq!((tree.to_json(), tree.render()), once);
    }
}
