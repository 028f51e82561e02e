//! Error types for the mirror tree and the synchronization core.

use crate::ids::NodeId;
use thiserror::Error;

/// Errors raised while mutating or querying the mirror tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// A remote notification referenced a path that is empty or does not
    /// start with `/`.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// A requested entry name is not a legal key in the remote store.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// The node is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The node is a directory where a file was expected.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A file write at an offset other than 0 or the end of the file.
    #[error("unsupported write at offset {offset} (file length {len})")]
    UnsupportedWrite { offset: u64, len: u64 },

    /// No child with the requested name exists.
    #[error("no such entry: {0}")]
    NoSuchEntry(String),

    /// A child with the requested name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The node was pruned from the tree after the caller obtained its id.
    #[error("stale node: {0}")]
    StaleNode(NodeId),
}

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
