//! Node adapter layer: mirror tree nodes as FUSE inodes.
//!
//! Inode numbers are mirror [`NodeId`]s. Each inode the kernel knows about
//! has exactly one [`NodeAdapter`] in the adapter table, carrying the kernel's
//! lookup count and a cached copy of the file contents. The kernel's
//! `forget` calls drive [`AdapterLayer::release`]; an adapter leaves the table
//! only when its count drops to zero, and the root never leaves.
//!
//! The table has its own sharded locking and never takes the tree lock, so
//! resolving and releasing adapters does not contend with tree mutations.

use crate::async_bridge::RemoteBridge;
use crate::error::{FuseError, FuseResult};
use dashmap::DashMap;
use fbmount_core::{
    Listing, LocalWrite, NodeId, NodeKind, NodeSnapshot, ROOT_ID, RemoteStore, SyncCore, TreeError,
    bytes_from_value, is_valid_key,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// File permissions (rw-r--r--).
pub const FILE_PERM: u16 = 0o644;

/// Directory permissions (rwxr-xr-x).
pub const DIR_PERM: u16 = 0o755;

/// Permissions of a local file with no confirmed content (-w-------).
pub const VIRTUAL_FILE_PERM: u16 = 0o200;

/// Permissions of a local directory with no confirmed content (-wx--x--x).
pub const VIRTUAL_DIR_PERM: u16 = 0o311;

/// Per-inode state shared with the kernel.
#[derive(Debug)]
pub struct NodeAdapter {
    id: NodeId,
    /// Kernel lookup count; the adapter is dropped from the table at zero.
    nlookup: AtomicU64,
    /// Contents as of the last offset-0 read or local write.
    content: Mutex<Option<Arc<[u8]>>>,
}

impl NodeAdapter {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            nlookup: AtomicU64::new(0),
            content: Mutex::new(None),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Acquire)
    }

    fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new count, or `None` if `count` exceeds it.
    fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    fn cached_content(&self) -> Option<Arc<[u8]>> {
        self.content.lock().clone()
    }

    fn store_content(&self, content: Arc<[u8]>) {
        *self.content.lock() = Some(content);
    }
}

/// Attributes of a node, in filesystem terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub id: NodeId,
    pub kind: NodeKind,
    pub size: u64,
    pub perm: u16,
    pub created: SystemTime,
    pub modified: SystemTime,
}

impl NodeAttr {
    fn from_snapshot(snap: &NodeSnapshot) -> Self {
        // The root is always readable, whatever its children.
        let virtual_new = snap.virtual_new && snap.id != ROOT_ID;
        let perm = match (snap.kind, virtual_new) {
            (NodeKind::Directory, false) => DIR_PERM,
            (NodeKind::Directory, true) => VIRTUAL_DIR_PERM,
            (NodeKind::File, false) => FILE_PERM,
            (NodeKind::File, true) => VIRTUAL_FILE_PERM,
        };
        Self {
            id: snap.id,
            kind: snap.kind,
            size: snap.size(),
            perm,
            created: snap.created,
            modified: snap.modified(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// One directory listing entry, `.` and `..` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
}

/// Maps filesystem operations onto the synchronization core and the remote
/// store.
pub struct AdapterLayer {
    sync: Arc<SyncCore>,
    remote: Arc<dyn RemoteStore>,
    bridge: RemoteBridge,
    adapters: DashMap<NodeId, Arc<NodeAdapter>>,
    root: Arc<NodeAdapter>,
}

impl AdapterLayer {
    pub fn new(sync: Arc<SyncCore>, remote: Arc<dyn RemoteStore>, bridge: RemoteBridge) -> Self {
        let root = Arc::new(NodeAdapter::new(ROOT_ID));
        root.inc_nlookup();
        let adapters = DashMap::new();
        adapters.insert(ROOT_ID, Arc::clone(&root));
        Self {
            sync,
            remote,
            bridge,
            adapters,
            root,
        }
    }

    pub fn sync(&self) -> &Arc<SyncCore> {
        &self.sync
    }

    pub fn bridge(&self) -> &RemoteBridge {
        &self.bridge
    }

    // ==================== Identity and lifetime ====================

    /// The root adapter, alive for the whole mount.
    pub fn resolve_root(&self) -> Arc<NodeAdapter> {
        Arc::clone(&self.root)
    }

    /// Returns the adapter for `id`, creating it if needed, and counts one
    /// more kernel reference to it.
    pub fn resolve(&self, id: NodeId) -> Arc<NodeAdapter> {
        // The entry guard holds the shard lock, so a concurrent release
        // cannot remove the adapter between lookup and increment.
        let entry = self
            .adapters
            .entry(id)
            .or_insert_with(|| Arc::new(NodeAdapter::new(id)));
        entry.inc_nlookup();
        Arc::clone(entry.value())
    }

    /// Drops `count` kernel references to `id`.
    ///
    /// Returns true if this removed the adapter from the table.
    pub fn release(&self, id: NodeId, count: u64) -> bool {
        if id == ROOT_ID {
            return false;
        }
        let mut underflow = false;
        let removed = self
            .adapters
            .remove_if(&id, |_, adapter| match adapter.dec_nlookup(count) {
                Some(remaining) => remaining == 0,
                None => {
                    underflow = true;
                    false
                }
            })
            .is_some();
        if underflow {
            warn!(inode = id, count, "forget for more lookups than recorded");
        }
        removed
    }

    /// The cached adapter for `id`, without counting a reference.
    pub fn adapter(&self, id: NodeId) -> Option<Arc<NodeAdapter>> {
        self.adapters.get(&id).map(|a| Arc::clone(a.value()))
    }

    /// Number of adapters in the table, root included.
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    // ==================== Read operations ====================

    pub fn attributes(&self, id: NodeId) -> FuseResult<NodeAttr> {
        Ok(NodeAttr::from_snapshot(&self.sync.snapshot(id)?))
    }

    /// Resolves `name` under `parent`, counting a kernel reference on success.
    ///
    /// A name the database cannot store is reported as missing rather than
    /// invalid, since the kernel also probes names it never creates.
    pub fn lookup_child(&self, parent: NodeId, name: &str) -> FuseResult<NodeAttr> {
        let not_found = || FuseError::Tree(TreeError::NoSuchEntry(name.to_string()));
        if !is_valid_key(name) {
            return Err(not_found());
        }
        let snap = self.sync.lookup_child(parent, name)?.ok_or_else(not_found)?;
        self.resolve(snap.id);
        Ok(NodeAttr::from_snapshot(&snap))
    }

    /// Lists a directory, starting with `.` and `..`.
    pub fn list_children(&self, id: NodeId) -> FuseResult<Vec<DirEntry>> {
        let Listing { parent, entries: children } = self.sync.listing(id)?;
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry {
            id,
            kind: NodeKind::Directory,
            name: ".".to_string(),
        });
        entries.push(DirEntry {
            id: parent.unwrap_or(ROOT_ID),
            kind: NodeKind::Directory,
            name: "..".to_string(),
        });
        entries.extend(children.into_iter().map(|c| DirEntry {
            id: c.id,
            kind: c.kind,
            name: c.name,
        }));
        Ok(entries)
    }

    /// Full contents of a file, freshly rendered from the tree.
    ///
    /// Directories read as empty.
    pub fn read_all(&self, id: NodeId) -> FuseResult<Arc<[u8]>> {
        let content: Arc<[u8]> = self.sync.snapshot(id)?.content().into();
        if let Some(adapter) = self.adapter(id) {
            adapter.store_content(Arc::clone(&content));
        }
        Ok(content)
    }

    /// Reads up to `size` bytes at `offset`.
    ///
    /// A read at offset 0 refreshes the cached contents; later offsets of the
    /// same sequential read are served from the cache without the tree lock.
    pub fn read(&self, id: NodeId, offset: u64, size: usize) -> FuseResult<Vec<u8>> {
        let cached = match self.adapter(id) {
            Some(adapter) if offset > 0 => adapter.cached_content(),
            _ => None,
        };
        let content = match cached {
            Some(content) => content,
            None => self.read_all(id)?,
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let end = start.saturating_add(size).min(content.len());
        Ok(content[start..end].to_vec())
    }

    // ==================== Write operations ====================

    /// Writes `data` at `offset` and pushes the new value to the remote store.
    ///
    /// Only offset 0 (replace) and offset == current length (append) are
    /// accepted. Blocks until the remote store acknowledges the write.
    pub fn write(&self, id: NodeId, offset: u64, data: &[u8]) -> FuseResult<u32> {
        let LocalWrite { key, value } = self.sync.write_local(id, offset, data, SystemTime::now())?;
        if let Some(adapter) = self.adapter(id) {
            adapter.store_content(bytes_from_value(&value).into());
        }

        info!(path = %key, kind = value.type_name(), "set");
        self.push(key, Some(value.to_json()))?;
        Ok(u32::try_from(data.len()).unwrap_or(u32::MAX))
    }

    /// Creates a local file or directory under `parent`, counting a kernel
    /// reference to it. Nothing is sent remotely until the first write.
    pub fn create_child(&self, parent: NodeId, name: &str, as_directory: bool) -> FuseResult<NodeAttr> {
        let snap = self
            .sync
            .create_local(parent, name, SystemTime::now(), as_directory)?;
        self.resolve(snap.id);
        Ok(NodeAttr::from_snapshot(&snap))
    }

    /// Removes `name` from `parent`.
    ///
    /// `kind` is what the caller expects to remove (`unlink` removes files,
    /// `rmdir` directories). A directory goes with its whole remote subtree.
    pub fn remove_child(&self, parent: NodeId, name: &str, kind: NodeKind) -> FuseResult<()> {
        let outcome = self.sync.remove_entry(parent, name, kind)?;
        if outcome.local_only {
            debug!(path = %outcome.key, "removed local-only entry");
            return Ok(());
        }
        info!(path = %outcome.key, "delete");
        self.push(outcome.key, None)
    }

    fn push(&self, key: String, value: Option<Value>) -> FuseResult<()> {
        let remote = Arc::clone(&self.remote);
        let result = self
            .bridge
            .run(async move { remote.set_at_path(&key, value).await });
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "remote write failed");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for AdapterLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterLayer")
            .field("adapters", &self.adapters.len())
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}
