//! Node identifier allocation.
//!
//! Every mirror node carries an identifier that doubles as its FUSE inode
//! number. Identifiers are handed out by an [`IdAllocator`] that is owned by
//! whoever builds the tree and injected into it, never by ambient global
//! state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a node in the mirror tree.
pub type NodeId = u64;

/// Identifier of the root node (FUSE convention for the root inode).
pub const ROOT_ID: NodeId = 1;

/// First identifier handed out for non-root nodes.
///
/// Everything below is reserved for the root and other sentinel uses.
pub const FIRST_DYNAMIC_ID: NodeId = 10_000;

/// Monotonic source of unique node identifiers.
///
/// Safe under concurrent callers; a value is never returned twice.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(FIRST_DYNAMIC_ID)
    }

    /// Creates an allocator whose first identifier is `first`.
    ///
    /// `first` is clamped into the dynamic range.
    pub fn starting_at(first: NodeId) -> Self {
        Self {
            next: AtomicU64::new(first.max(FIRST_DYNAMIC_ID)),
        }
    }

    /// Returns a fresh identifier.
    pub fn next(&self) -> NodeId {
        // Relaxed: the counter is the only state and fetch_add is atomic.
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the identifier the next call to [`next`](Self::next) would issue.
    pub fn peek(&self) -> NodeId {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
