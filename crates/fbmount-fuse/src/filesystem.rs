//! FUSE filesystem over the mirror tree.
//!
//! Implements the fuser `Filesystem` trait by delegating every callback to
//! the [`AdapterLayer`] and translating results into kernel replies.
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | lookup/create/mkdir | count one kernel reference per successful reply |
//! | forget/batch_forget | release references; adapters leave the table at zero |
//! | getattr/setattr | setattr accepts and ignores changes |
//! | readdir | always lists `.` and `..`; does not count references |
//! | read | offset 0 refreshes contents, later offsets reuse them |
//! | write | offset 0 or end of file only; blocks on the remote store |
//! | unlink/rmdir | local-only entries vanish at once, others on echo |
//! | rename/link/symlink/mknod | not supported |

use crate::adapter::{AdapterLayer, DirEntry, NodeAttr};
use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use fbmount_core::NodeKind;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Block size reported in attributes and statfs.
const BLOCK_SIZE: u32 = 4096;

/// Longest key segment the database accepts, in bytes.
const NAME_MAX: u32 = 768;

/// FUSE filesystem backed by the adapter layer.
#[derive(Debug)]
pub struct FirebaseFS {
    layer: AdapterLayer,
    config: MountConfig,
}

impl FirebaseFS {
    pub fn new(layer: AdapterLayer, config: MountConfig) -> Self {
        Self { layer, config }
    }

    pub fn layer(&self) -> &AdapterLayer {
        &self.layer
    }

    fn file_attr(&self, attr: &NodeAttr) -> FileAttr {
        let (kind, nlink) = match attr.kind {
            NodeKind::Directory => (FileType::Directory, 2),
            NodeKind::File => (FileType::RegularFile, 1),
        };
        FileAttr {
            ino: attr.id,
            size: attr.size,
            blocks: attr.size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: attr.modified,
            mtime: attr.modified,
            ctime: attr.modified,
            crtime: attr.created,
            kind,
            perm: attr.perm,
            nlink,
            uid: self.config.uid,
            gid: self.config.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn reply_entry(&self, result: FuseResult<NodeAttr>, reply: ReplyEntry) {
        match result {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &self.file_attr(&attr), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

impl Filesystem for FirebaseFS {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!("FUSE filesystem initialized");
        // Reads within one file may be served concurrently.
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        info!(
            adapters = self.layer.adapter_count(),
            pending_writes = self.layer.bridge().stats().in_flight(),
            "FUSE filesystem destroyed"
        );
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        trace!(parent, name, "lookup");
        self.reply_entry(self.layer.lookup_child(parent, name), reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.layer.release(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.layer.release(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.layer.attributes(ino) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &self.file_attr(&attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Accepts any change without applying it.
    ///
    /// `O_TRUNC` arrives here as a size change; the offset-0 write that
    /// follows replaces the contents anyway.
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, size = ?size, "setattr");
        match self.layer.attributes(ino) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &self.file_attr(&attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, offset, size, "read");
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.layer.read(ino, offset, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, offset, len = data.len(), "write");
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.layer.write(ino, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => {
                debug!(inode = ino, error = %e, "write failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        let entries = match self.layer.list_children(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, DirEntry { id, kind, name }) in entries.into_iter().enumerate().skip(skip) {
            // Offsets are positions in the sorted listing; the next call
            // resumes after the last entry returned.
            let next_offset = i64::try_from(i + 1).unwrap_or(i64::MAX);
            if reply.add(id, next_offset, file_type(kind), &name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(FuseError::InvalidName.to_errno());
            return;
        };
        trace!(parent, name, "create");
        match self.layer.create_child(parent, name, false) {
            Ok(attr) => reply.created(&self.config.attr_ttl, &self.file_attr(&attr), 0, 0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(FuseError::InvalidName.to_errno());
            return;
        };
        trace!(parent, name, "mkdir");
        self.reply_entry(self.layer.create_child(parent, name, true), reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        trace!(parent, name, "unlink");
        match self.layer.remove_child(parent, name, NodeKind::File) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        trace!(parent, name, "rmdir");
        match self.layer.remove_child(parent, name, NodeKind::Directory) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let files = self.layer.sync().node_count() as u64;
        reply.statfs(0, 0, 0, files, 0, BLOCK_SIZE, NAME_MAX, BLOCK_SIZE);
    }
}
