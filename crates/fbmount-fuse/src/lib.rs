//! FUSE filesystem mirroring a Firebase Realtime Database.
//!
//! The database is shown as a directory tree: objects are directories,
//! primitive values are files. Reading a file renders its value; writing a
//! file sets the value remotely and blocks until the database acknowledges
//! it. Changes from other clients arrive through the event pump in
//! `fbmount_core` and show up immediately.
//!
//! # Usage
//!
//! ```ignore
//! use fbmount_fuse::{AdapterLayer, FirebaseFS, MountConfig, RemoteBridge, mount};
//!
//! let layer = AdapterLayer::new(sync, remote, RemoteBridge::new(handle, config.write_timeout));
//! let session = mount(FirebaseFS::new(layer, config.clone()), mountpoint, &config)?;
//! ```

pub mod adapter;
pub mod async_bridge;
pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;

pub use adapter::{AdapterLayer, DirEntry, NodeAdapter, NodeAttr};
pub use async_bridge::{BridgeError, BridgeStats, RemoteBridge};
pub use backend::{FuseMountHandle, mount, mount_options};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult};
pub use filesystem::FirebaseFS;
