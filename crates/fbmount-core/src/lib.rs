//! Local mirror tree and synchronization engine for a remote, streamed
//! key/value store.
//!
//! The remote store (a Firebase Realtime Database) is hierarchical and
//! schema-less. This crate keeps an in-memory replica of it shaped like a
//! directory tree, merges the store's change notifications into that replica,
//! and serializes those merges with the local mutations issued by a
//! filesystem front end.
//!
//! # Components
//!
//! - [`key`]: path segment validation
//! - [`value`]: conversion between written bytes and typed remote values
//! - [`ids`]: process-wide node identifiers (exposed as inode numbers)
//! - [`tree`]: the mirror tree and its merge/prune algorithm
//! - [`sync`]: the single mutual-exclusion domain around the tree
//! - [`remote`]: the remote store interface and its Firebase REST client
//! - [`pump`]: the task that feeds remote events into the tree
//! - [`testing`]: an in-memory remote store for tests

pub mod error;
pub mod ids;
pub mod key;
pub mod pump;
pub mod remote;
pub mod sync;
pub mod testing;
pub mod tree;
pub mod value;

pub use error::{TreeError, TreeResult};
pub use ids::{IdAllocator, NodeId, ROOT_ID};
pub use key::is_valid_key;
pub use pump::{PumpError, follow, pump_events};
pub use remote::{EventStream, FirebaseClient, FirebaseConfig, RemoteError, RemoteEvent, RemoteStore};
pub use sync::SyncCore;
pub use tree::{
    ChildEntry, Listing, LocalWrite, MirrorTree, NodeKind, NodeSnapshot, NodeValue, RemoveOutcome,
};
pub use value::{Scalar, bytes_from_value, value_from_bytes};
