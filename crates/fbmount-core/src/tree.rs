//! The in-memory mirror of the remote store.
//!
//! Nodes live in an arena keyed by [`NodeId`]. Directories map child names to
//! ids in key order. Pruning removes a whole subtree from the arena; since ids
//! are never reissued, any handle still holding a pruned id gets
//! [`TreeError::StaleNode`] on its next access.
//!
//! The tree itself is not synchronized. All access goes through
//! [`SyncCore`](crate::SyncCore), which owns it behind a single lock.

use crate::error::{TreeError, TreeResult};
use crate::ids::{IdAllocator, NodeId, ROOT_ID};
use crate::key::is_valid_key;
use crate::value::{Scalar, bytes_from_value, value_from_bytes};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Content of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// No confirmed remote content.
    Empty,
    /// A leaf holding a primitive value. The node is a file.
    Scalar(Scalar),
    /// Child name to child id, ordered by name. The node is a directory.
    Directory(BTreeMap<String, NodeId>),
}

impl NodeValue {
    fn child(&self, name: &str) -> Option<NodeId> {
        match self {
            NodeValue::Directory(children) => children.get(name).copied(),
            NodeValue::Empty | NodeValue::Scalar(_) => None,
        }
    }

    fn is_empty_directory(&self) -> bool {
        matches!(self, NodeValue::Directory(children) if children.is_empty())
    }
}

/// Whether a node shows up as a directory or a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug)]
struct Node {
    id: NodeId,
    name: String,
    key: String,
    parent: Option<NodeId>,
    created: SystemTime,
    updated: Option<SystemTime>,
    value: NodeValue,
    virtual_new: bool,
    virtual_modified: bool,
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self.value {
            NodeValue::Directory(_) => NodeKind::Directory,
            NodeValue::Empty | NodeValue::Scalar(_) => NodeKind::File,
        }
    }

    fn display_path(&self) -> String {
        display_path(&self.key).to_string()
    }

    fn snapshot(&self) -> NodeSnapshot {
        let scalar = match &self.value {
            NodeValue::Scalar(s) => Some(s.clone()),
            NodeValue::Empty | NodeValue::Directory(_) => None,
        };
        NodeSnapshot {
            id: self.id,
            name: self.name.clone(),
            key: self.key.clone(),
            parent: self.parent,
            kind: self.kind(),
            scalar,
            created: self.created,
            updated: self.updated,
            virtual_new: self.virtual_new,
            virtual_modified: self.virtual_modified,
        }
    }
}

/// A point-in-time copy of one node, taken under the tree lock.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    /// Last path segment; empty for the root.
    pub name: String,
    /// Absolute key in the remote namespace; empty for the root.
    pub key: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    /// The stored value, for files that have one.
    pub scalar: Option<Scalar>,
    pub created: SystemTime,
    pub updated: Option<SystemTime>,
    pub virtual_new: bool,
    pub virtual_modified: bool,
}

impl NodeSnapshot {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// File contents as rendered by the value codec. Empty for directories.
    pub fn content(&self) -> Vec<u8> {
        self.scalar.as_ref().map(bytes_from_value).unwrap_or_default()
    }

    /// Length of [`content`](Self::content).
    pub fn size(&self) -> u64 {
        self.content().len() as u64
    }

    /// Last confirmed touch, or creation time if never confirmed.
    pub fn modified(&self) -> SystemTime {
        self.updated.unwrap_or(self.created)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub id: NodeId,
    pub kind: NodeKind,
}

/// Result of [`MirrorTree::remove_local`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// The entry only existed locally and has already been dropped.
    /// Otherwise the caller must delete `key` remotely.
    pub local_only: bool,
    /// Remote key of the removed entry.
    pub key: String,
}

/// Result of [`MirrorTree::write_local`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWrite {
    /// Remote key the value belongs at.
    pub key: String,
    /// The value now stored locally.
    pub value: Scalar,
}

/// A directory's entries together with its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// `None` for the root.
    pub parent: Option<NodeId>,
    pub entries: Vec<ChildEntry>,
}

/// Tree of nodes mirroring the remote store.
#[derive(Debug)]
pub struct MirrorTree {
    nodes: HashMap<NodeId, Node>,
    ids: Arc<IdAllocator>,
}

impl MirrorTree {
    /// Creates a tree holding only an empty root directory.
    pub fn new(ids: Arc<IdAllocator>, now: SystemTime) -> Self {
        let root = Node {
            id: ROOT_ID,
            name: String::new(),
            key: String::new(),
            parent: None,
            created: now,
            updated: None,
            value: NodeValue::Directory(BTreeMap::new()),
            virtual_new: false,
            virtual_modified: false,
        };
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, root);
        Self { nodes, ids }
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is never removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn value(&self, id: NodeId) -> TreeResult<&NodeValue> {
        Ok(&self.node(id)?.value)
    }

    pub fn snapshot(&self, id: NodeId) -> TreeResult<NodeSnapshot> {
        Ok(self.node(id)?.snapshot())
    }

    /// Looks up the direct child `name` of `parent`.
    ///
    /// Returns `None` when `parent` is not a directory or has no such child.
    pub fn lookup_child(&self, parent: NodeId, name: &str) -> TreeResult<Option<NodeSnapshot>> {
        let Some(child) = self.node(parent)?.value.child(name) else {
            return Ok(None);
        };
        Ok(Some(self.node(child)?.snapshot()))
    }

    /// Lists the children of a directory in key order.
    pub fn children(&self, parent: NodeId) -> TreeResult<Vec<ChildEntry>> {
        let node = self.node(parent)?;
        let NodeValue::Directory(children) = &node.value else {
            return Err(TreeError::NotADirectory(node.display_path()));
        };
        children
            .iter()
            .map(|(name, &id)| {
                Ok(ChildEntry {
                    name: name.clone(),
                    id,
                    kind: self.node(id)?.kind(),
                })
            })
            .collect()
    }

    /// Lists a directory along with its parent.
    pub fn listing(&self, id: NodeId) -> TreeResult<Listing> {
        Ok(Listing {
            parent: self.node(id)?.parent,
            entries: self.children(id)?,
        })
    }

    /// Applies a remote change notification.
    ///
    /// `path` must start with `/`; `/` alone addresses the root. A `null`
    /// value deletes. Nodes left empty are pruned recursively upward, stopping
    /// below the root.
    pub fn apply_remote_change(
        &mut self,
        path: &str,
        value: &Value,
        now: SystemTime,
    ) -> TreeResult<()> {
        let segments = split_path(path)?;
        let before = self.nodes.len();
        // The root reports itself empty but is never pruned.
        self.apply(ROOT_ID, &segments, value, now)?;
        debug!(
            path,
            nodes = self.nodes.len(),
            delta = self.nodes.len().cast_signed() - before.cast_signed(),
            "applied remote change"
        );
        Ok(())
    }

    fn apply(
        &mut self,
        id: NodeId,
        segments: &[&str],
        value: &Value,
        now: SystemTime,
    ) -> TreeResult<bool> {
        let Some((&name, rest)) = segments.split_first() else {
            return self.set_subtree(id, value, now);
        };

        // The remote store decides the shape: a path below a leaf turns the
        // leaf into a directory, even when the change is a delete.
        let node = self.node_mut(id)?;
        if !matches!(node.value, NodeValue::Directory(_)) {
            debug!(path = %display_path(&node.key), "extending leaf into directory");
            node.value = NodeValue::Directory(BTreeMap::new());
        }

        let child = match self.node(id)?.value.child(name) {
            Some(child) => {
                self.remote_touch(child, now)?;
                child
            }
            // Deleting something that was never there.
            None if value.is_null() => {
                self.refresh_virtual(id)?;
                return Ok(false);
            }
            None => {
                let key = self.node(id)?.key.clone();
                let child = self.alloc_child(id, &key, name, now);
                if let NodeValue::Directory(children) = &mut self.node_mut(id)?.value {
                    children.insert(name.to_string(), child);
                }
                child
            }
        };

        if self.apply(child, rest, value, now)? {
            self.detach(id, name)?;
            self.prune(child);
        }
        self.refresh_virtual(id)?;
        Ok(self.node(id)?.value.is_empty_directory())
    }

    fn set_subtree(&mut self, id: NodeId, value: &Value, now: SystemTime) -> TreeResult<bool> {
        self.remote_touch(id, now)?;
        let node = self.node_mut(id)?;
        let key = node.key.clone();
        if let NodeValue::Directory(old) = std::mem::replace(&mut node.value, NodeValue::Empty) {
            for child in old.into_values() {
                self.prune(child);
            }
        }

        let entries: Vec<(String, &Value)> = match value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            Value::Null if id == ROOT_ID => {
                self.node_mut(id)?.value = NodeValue::Directory(BTreeMap::new());
                return Ok(true);
            }
            Value::Null => return Ok(true),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                let node = self.node_mut(id)?;
                if id == ROOT_ID {
                    warn!("ignoring scalar value at root");
                    node.value = NodeValue::Directory(BTreeMap::new());
                    return Ok(true);
                }
                if let Some(scalar) = Scalar::from_json(value) {
                    node.value = NodeValue::Scalar(scalar);
                }
                return Ok(false);
            }
        };

        let mut children = BTreeMap::new();
        for (name, child_value) in entries {
            let child = self.alloc_child(id, &key, &name, now);
            if self.set_subtree(child, child_value, now)? {
                self.prune(child);
            } else {
                children.insert(name, child);
            }
        }
        let empty = children.is_empty();
        self.node_mut(id)?.value = NodeValue::Directory(children);
        self.refresh_virtual(id)?;
        Ok(empty)
    }

    /// Creates a local, not yet pushed, child of `parent`.
    ///
    /// Files start out as the empty string, directories as an empty mapping.
    pub fn create_local(
        &mut self,
        parent: NodeId,
        name: &str,
        now: SystemTime,
        as_directory: bool,
    ) -> TreeResult<NodeSnapshot> {
        if !is_valid_key(name) {
            return Err(TreeError::InvalidKey(name.to_string()));
        }
        let node = self.node(parent)?;
        let NodeValue::Directory(children) = &node.value else {
            return Err(TreeError::NotADirectory(node.display_path()));
        };
        if children.contains_key(name) {
            return Err(TreeError::AlreadyExists(child_key(&node.key, name)));
        }

        let key = node.key.clone();
        let child = self.alloc_child(parent, &key, name, now);
        let node = self.node_mut(child)?;
        node.value = if as_directory {
            NodeValue::Directory(BTreeMap::new())
        } else {
            NodeValue::Scalar(Scalar::String(String::new()))
        };
        node.virtual_new = true;
        let snapshot = node.snapshot();

        if let NodeValue::Directory(children) = &mut self.node_mut(parent)?.value {
            children.insert(name.to_string(), child);
        }
        self.refresh_virtual(parent)?;
        debug!(path = %snapshot.key, dir = as_directory, "created local node");
        Ok(snapshot)
    }

    /// Removes `name` from `parent` if it only exists locally.
    ///
    /// Entries carrying confirmed content, or unconfirmed writes anywhere in
    /// their subtree, are left in place and reported with
    /// `local_only == false`; they disappear once the remote delete echoes.
    pub fn remove_local(&mut self, parent: NodeId, name: &str) -> TreeResult<RemoveOutcome> {
        let node = self.node(parent)?;
        let NodeValue::Directory(children) = &node.value else {
            return Err(TreeError::NotADirectory(node.display_path()));
        };
        let Some(&child) = children.get(name) else {
            return Err(TreeError::NoSuchEntry(child_key(&node.key, name)));
        };

        let child_node = self.node(child)?;
        let key = child_node.key.clone();
        let local_only = child_node.virtual_new && !self.subtree_modified(child);
        if local_only {
            self.detach(parent, name)?;
            self.prune(child);
            self.refresh_virtual(parent)?;
            debug!(path = %key, "dropped local node");
        }
        Ok(RemoveOutcome { local_only, key })
    }

    /// Stores a locally written value ahead of its remote echo.
    pub fn record_local_write(
        &mut self,
        id: NodeId,
        value: Scalar,
        now: SystemTime,
    ) -> TreeResult<()> {
        let node = self.node_mut(id)?;
        if let NodeValue::Directory(_) = node.value {
            return Err(TreeError::IsADirectory(node.display_path()));
        }
        debug!(path = %node.display_path(), kind = value.type_name(), "recorded local write");
        node.value = NodeValue::Scalar(value);
        node.virtual_modified = true;
        node.updated = Some(now);
        Ok(())
    }

    /// Writes `data` into a file at `offset` and records the result.
    ///
    /// Offset 0 replaces the contents and an offset equal to the rendered
    /// length appends; anything else is rejected. The bytes are converted
    /// with the stored value as the type hint.
    pub fn write_local(
        &mut self,
        id: NodeId,
        offset: u64,
        data: &[u8],
        now: SystemTime,
    ) -> TreeResult<LocalWrite> {
        let node = self.node(id)?;
        let previous = match &node.value {
            NodeValue::Directory(_) => return Err(TreeError::IsADirectory(node.display_path())),
            NodeValue::Scalar(scalar) => Some(scalar),
            NodeValue::Empty => None,
        };
        let current = previous.map(bytes_from_value).unwrap_or_default();
        let len = current.len() as u64;
        let bytes = match offset {
            0 => data.to_vec(),
            o if o == len => [current.as_slice(), data].concat(),
            _ => return Err(TreeError::UnsupportedWrite { offset, len }),
        };
        let value = value_from_bytes(&bytes, previous);
        let key = node.key.clone();

        self.record_local_write(id, value.clone(), now)?;
        Ok(LocalWrite { key, value })
    }

    /// Like [`remove_local`](Self::remove_local), but fails unless the entry
    /// is of the expected kind.
    pub fn remove_entry(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
    ) -> TreeResult<RemoveOutcome> {
        if let Some(child) = self.node(parent)?.value.child(name) {
            let child = self.node(child)?;
            match (kind, child.kind()) {
                (NodeKind::File, NodeKind::Directory) => {
                    return Err(TreeError::IsADirectory(child.display_path()));
                }
                (NodeKind::Directory, NodeKind::File) => {
                    return Err(TreeError::NotADirectory(child.display_path()));
                }
                _ => {}
            }
        }
        self.remove_local(parent, name)
    }

    /// Exports the tree as JSON: directories as objects, files as scalars.
    ///
    /// Nodes without content export as `null`.
    pub fn to_json(&self) -> Value {
        self.node_json(ROOT_ID)
    }

    fn node_json(&self, id: NodeId) -> Value {
        match self.nodes.get(&id).map(|n| &n.value) {
            Some(NodeValue::Scalar(s)) => s.to_json(),
            Some(NodeValue::Directory(children)) => Value::Object(
                children
                    .iter()
                    .map(|(name, &child)| (name.clone(), self.node_json(child)))
                    .collect::<Map<_, _>>(),
            ),
            Some(NodeValue::Empty) | None => Value::Null,
        }
    }

    /// Renders an indented listing of the tree.
    ///
    /// Directories end in `/`, files show their value, and unconfirmed nodes
    /// are tagged `[new]` or `[modified]`.
    pub fn render(&self) -> String {
        let mut out = String::from("/\n");
        self.render_children(ROOT_ID, 1, &mut out);
        out
    }

    fn render_children(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(NodeValue::Directory(children)) = self.nodes.get(&id).map(|n| &n.value) else {
            return;
        };
        for (name, &child) in children {
            let Some(node) = self.nodes.get(&child) else {
                continue;
            };
            let indent = "  ".repeat(depth);
            let _ = match &node.value {
                NodeValue::Directory(_) => write!(out, "{indent}{name}/"),
                NodeValue::Scalar(s) => write!(out, "{indent}{name} = {s}"),
                NodeValue::Empty => write!(out, "{indent}{name}"),
            };
            if node.virtual_new {
                out.push_str(" [new]");
            }
            if node.virtual_modified {
                out.push_str(" [modified]");
            }
            out.push('\n');
            self.render_children(child, depth + 1, out);
        }
    }

    fn node(&self, id: NodeId) -> TreeResult<&Node> {
        self.nodes.get(&id).ok_or(TreeError::StaleNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> TreeResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(TreeError::StaleNode(id))
    }

    /// Allocates a fresh node under `parent`, not yet linked into its mapping.
    fn alloc_child(&mut self, parent: NodeId, parent_key: &str, name: &str, now: SystemTime) -> NodeId {
        let id = self.ids.next();
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                key: child_key(parent_key, name),
                parent: Some(parent),
                created: now,
                updated: None,
                value: NodeValue::Empty,
                virtual_new: false,
                virtual_modified: false,
            },
        );
        id
    }

    fn remote_touch(&mut self, id: NodeId, now: SystemTime) -> TreeResult<()> {
        let node = self.node_mut(id)?;
        node.updated = Some(now);
        node.virtual_new = false;
        node.virtual_modified = false;
        Ok(())
    }

    /// A directory is virtual when none of its children is confirmed.
    fn refresh_virtual(&mut self, id: NodeId) -> TreeResult<()> {
        let NodeValue::Directory(children) = &self.node(id)?.value else {
            return Ok(());
        };
        let has_confirmed = children
            .values()
            .any(|child| self.nodes.get(child).is_some_and(|n| !n.virtual_new));
        self.node_mut(id)?.virtual_new = !has_confirmed;
        Ok(())
    }

    fn subtree_modified(&self, id: NodeId) -> bool {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.virtual_modified {
                return true;
            }
            if let NodeValue::Directory(children) = &node.value {
                stack.extend(children.values().copied());
            }
        }
        false
    }

    fn detach(&mut self, parent: NodeId, name: &str) -> TreeResult<()> {
        if let NodeValue::Directory(children) = &mut self.node_mut(parent)?.value {
            children.remove(name);
        }
        Ok(())
    }

    /// Drops `id` and everything below it from the arena.
    fn prune(&mut self, id: NodeId) {
        if id == ROOT_ID {
            return;
        }
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id)
                && let NodeValue::Directory(children) = node.value
            {
                stack.extend(children.into_values());
            }
        }
    }
}

fn child_key(parent_key: &str, name: &str) -> String {
    format!("{parent_key}/{name}")
}

fn display_path(key: &str) -> &str {
    if key.is_empty() { "/" } else { key }
}

/// Splits an absolute remote path into segments; `/` yields none.
fn split_path(path: &str) -> TreeResult<Vec<&str>> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(TreeError::InvalidPath(path.to_string()));
    };
    Ok(rest.split('/').filter(|s| !s.is_empty()).collect())
}
