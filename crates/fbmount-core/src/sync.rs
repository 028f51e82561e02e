//! Single point of serialization for the mirror tree.
//!
//! Remote events (from the event pump) and local filesystem requests (from
//! any number of FUSE worker threads) both mutate the same tree. Every access,
//! reads included, takes the one lock in [`SyncCore`], so no caller ever
//! observes a half-applied change and check-then-act sequences such as
//! "fail if the name exists, else create" are atomic.

use crate::error::TreeResult;
use crate::ids::{IdAllocator, NodeId};
use crate::tree::{ChildEntry, Listing, LocalWrite, MirrorTree, NodeKind, NodeSnapshot, RemoveOutcome};
use crate::value::Scalar;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::SystemTime;

/// Owner of the mirror tree.
#[derive(Debug)]
pub struct SyncCore {
    tree: Mutex<MirrorTree>,
}

impl SyncCore {
    /// Creates a core with an empty root and its own identifier allocator.
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(IdAllocator::new()))
    }

    /// Creates a core whose tree draws identifiers from `ids`.
    pub fn with_allocator(ids: Arc<IdAllocator>) -> Self {
        Self {
            tree: Mutex::new(MirrorTree::new(ids, SystemTime::now())),
        }
    }

    /// Applies one remote change notification.
    ///
    /// Fails only on a malformed path, which the caller should treat as fatal
    /// for the stream that produced it.
    pub fn submit_remote_change(&self, path: &str, value: &Value, now: SystemTime) -> TreeResult<()> {
        self.tree.lock().apply_remote_change(path, value, now)
    }

    pub fn lookup_child(&self, parent: NodeId, name: &str) -> TreeResult<Option<NodeSnapshot>> {
        self.tree.lock().lookup_child(parent, name)
    }

    pub fn create_local(
        &self,
        parent: NodeId,
        name: &str,
        now: SystemTime,
        as_directory: bool,
    ) -> TreeResult<NodeSnapshot> {
        self.tree.lock().create_local(parent, name, now, as_directory)
    }

    pub fn remove_local(&self, parent: NodeId, name: &str) -> TreeResult<RemoveOutcome> {
        self.tree.lock().remove_local(parent, name)
    }

    pub fn record_local_write(&self, id: NodeId, value: Scalar, now: SystemTime) -> TreeResult<()> {
        self.tree.lock().record_local_write(id, value, now)
    }

    /// Checks the offset, converts the bytes and records the write, all
    /// under one lock acquisition.
    pub fn write_local(
        &self,
        id: NodeId,
        offset: u64,
        data: &[u8],
        now: SystemTime,
    ) -> TreeResult<LocalWrite> {
        self.tree.lock().write_local(id, offset, data, now)
    }

    /// Removes `name` from `parent` if it is of the expected kind.
    pub fn remove_entry(&self, parent: NodeId, name: &str, kind: NodeKind) -> TreeResult<RemoveOutcome> {
        self.tree.lock().remove_entry(parent, name, kind)
    }

    pub fn snapshot(&self, id: NodeId) -> TreeResult<NodeSnapshot> {
        self.tree.lock().snapshot(id)
    }

    pub fn list_children(&self, parent: NodeId) -> TreeResult<Vec<ChildEntry>> {
        self.tree.lock().children(parent)
    }

    pub fn listing(&self, id: NodeId) -> TreeResult<Listing> {
        self.tree.lock().listing(id)
    }

    pub fn render(&self) -> String {
        self.tree.lock().render()
    }

    pub fn to_json(&self) -> Value {
        self.tree.lock().to_json()
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.tree.lock().len()
    }

    /// Runs `f` with the tree locked.
    pub fn with_tree<R>(&self, f: impl FnOnce(&MirrorTree) -> R) -> R {
        f(&self.tree.lock())
    }
}

impl Default for SyncCore {
    fn default() -> Self {
        Self::new()
    }
}
