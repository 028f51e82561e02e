//! Interface to the remote key/value store.
//!
//! The mirror only needs two things from the remote side: an ordered stream
//! of change notifications and a way to write (or delete) the value at a
//! path. [`RemoteStore`] captures exactly that, so the Firebase client and the
//! in-memory test double are interchangeable.

pub mod firebase;
mod sse;

pub use firebase::{FirebaseClient, FirebaseConfig};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

/// Errors from the remote store.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport failure (connection, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("remote store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// An event payload was not valid JSON.
    #[error("failed to decode event payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The stream violated the event protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The subscription is gone (already taken or shut down).
    #[error("subscription closed")]
    Closed,
}

/// One change notification from the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Replace the value at `path` with `data` (`null` deletes).
    Put { path: String, data: Value },
    /// Replace each child of `path` named in `data`.
    Patch { path: String, data: Value },
    KeepAlive,
    /// The server cancelled the subscription, typically on a rules change.
    Cancel(String),
    /// The auth credential expired or was revoked.
    AuthRevoked,
    /// The server reported an error without ending the stream.
    Error(String),
    /// Any event type we do not handle.
    Other(String),
}

/// Ordered stream of change notifications.
pub type EventStream = BoxStream<'static, Result<RemoteEvent, RemoteError>>;

/// A remote hierarchical key/value store.
pub trait RemoteStore: Send + Sync + 'static {
    /// Opens the change subscription for the whole store.
    ///
    /// The first event is expected to be a `put` at `/` carrying the
    /// current contents.
    fn subscribe(&self) -> BoxFuture<'_, Result<EventStream, RemoteError>>;

    /// Sets the value at `path`; `None` deletes it.
    ///
    /// `path` is a tree key: empty for the root, otherwise `/`-separated
    /// with a leading `/`.
    fn set_at_path(
        &self,
        path: &str,
        value: Option<Value>,
    ) -> BoxFuture<'_, Result<(), RemoteError>>;
}
