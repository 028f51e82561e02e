//! The event pump: feeds remote notifications into the mirror, in order.
//!
//! Exactly one pump runs per mount. It never blocks on filesystem activity;
//! the only thing it waits for besides the stream is the tree lock.

use crate::error::TreeError;
use crate::remote::{EventStream, RemoteError, RemoteEvent, RemoteStore};
use crate::sync::SyncCore;
use futures::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Why the pump stopped. Every variant is fatal for the mount.
#[derive(Error, Debug)]
pub enum PumpError {
    #[error("remote sent an unusable event: {0}")]
    InvalidPath(#[source] TreeError),

    #[error("subscription cancelled by the server: {0}")]
    Cancelled(String),

    #[error("auth credential revoked")]
    AuthRevoked,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("subscription ended")]
    SubscriptionEnded,
}

/// Subscribes to `remote` and pumps its events into `sync`.
pub async fn follow(
    remote: &dyn RemoteStore,
    sync: Arc<SyncCore>,
    on_applied: impl FnMut(&SyncCore),
) -> Result<Infallible, PumpError> {
    let events = remote.subscribe().await?;
    pump_events(sync, events, on_applied).await
}

/// Applies events from `events` to `sync` until the stream fails or ends.
///
/// `on_applied` runs after each event that changed the tree. The pump only
/// ever returns an error.
pub async fn pump_events(
    sync: Arc<SyncCore>,
    mut events: EventStream,
    mut on_applied: impl FnMut(&SyncCore),
) -> Result<Infallible, PumpError> {
    while let Some(event) = events.next().await {
        match event? {
            RemoteEvent::Put { path, data } => {
                apply(&sync, &path, &data)?;
                on_applied(&sync);
            }
            RemoteEvent::Patch { path, data } => {
                let Value::Object(children) = data else {
                    warn!(path = %path, "ignoring patch without object payload");
                    continue;
                };
                for (name, value) in &children {
                    apply(&sync, &child_path(&path, name), value)?;
                }
                on_applied(&sync);
            }
            RemoteEvent::KeepAlive => trace!("keep-alive"),
            RemoteEvent::Error(message) => warn!(message = %message, "remote reported an error"),
            RemoteEvent::Other(kind) => warn!(event = %kind, "ignoring unknown event"),
            RemoteEvent::Cancel(reason) => {
                error!(reason = %reason, "subscription cancelled");
                return Err(PumpError::Cancelled(reason));
            }
            RemoteEvent::AuthRevoked => {
                error!("auth credential revoked");
                return Err(PumpError::AuthRevoked);
            }
        }
    }
    error!("event stream ended");
    Err(PumpError::SubscriptionEnded)
}

fn apply(sync: &SyncCore, path: &str, value: &Value) -> Result<(), PumpError> {
    debug!(path, "remote change");
    sync.submit_remote_change(path, value, SystemTime::now())
        .map_err(|e| {
            error!(path, error = %e, "dropping malformed event");
            PumpError::InvalidPath(e)
        })
}

fn child_path(path: &str, name: &str) -> String {
    format!("{}/{name}", path.trim_end_matches('/'))
}
