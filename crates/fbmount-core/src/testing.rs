//! Test doubles for code built on the mirror.
//!
//! [`MemoryRemote`] stands in for the remote store: it records every write,
//! can be told to reject writes, and serves a subscription fed by hand (or by
//! echoing its own writes back, like the real store does).
//!
//! ```ignore
//! let remote = MemoryRemote::new().with_echo();
//! remote.push_put("/", json!({"a": 1}));
//! let events = remote.subscribe().await?;
//! ```

use crate::remote::{EventStream, RemoteError, RemoteEvent, RemoteStore};
use futures::future::BoxFuture;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<RemoteEvent, RemoteError>>;
type EventReceiver = mpsc::UnboundedReceiver<Result<RemoteEvent, RemoteError>>;

/// One call to [`RemoteStore::set_at_path`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub path: String,
    /// `None` for deletes.
    pub value: Option<Value>,
}

/// In-memory [`RemoteStore`].
#[derive(Debug)]
pub struct MemoryRemote {
    writes: Mutex<Vec<RecordedWrite>>,
    rejection: Mutex<Option<(u16, String)>>,
    echo: AtomicBool,
    sender: Mutex<Option<EventSender>>,
    receiver: Mutex<Option<EventReceiver>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            writes: Mutex::new(Vec::new()),
            rejection: Mutex::new(None),
            echo: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Makes successful writes show up on the subscription as `put` events.
    #[must_use]
    pub fn with_echo(self) -> Self {
        self.echo.store(true, Ordering::Relaxed);
        self
    }

    /// Queues an event on the subscription.
    pub fn push_event(&self, event: RemoteEvent) {
        self.push(Ok(event));
    }

    pub fn push_put(&self, path: &str, data: Value) {
        self.push_event(RemoteEvent::Put {
            path: path.to_string(),
            data,
        });
    }

    /// Queues a stream failure.
    pub fn push_error(&self, error: RemoteError) {
        self.push(Err(error));
    }

    /// Ends the subscription once queued events are drained.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Makes subsequent writes fail with the given HTTP status.
    pub fn reject_writes(&self, status: u16, body: &str) {
        *self.rejection.lock() = Some((status, body.to_string()));
    }

    pub fn accept_writes(&self) {
        *self.rejection.lock() = None;
    }

    /// Every write attempted so far, rejected ones included.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    fn push(&self, item: Result<RemoteEvent, RemoteError>) {
        if let Some(tx) = self.sender.lock().as_ref() {
            // The receiver may already be gone; tests then see nothing.
            let _ = tx.send(item);
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemote {
    fn subscribe(&self) -> BoxFuture<'_, Result<EventStream, RemoteError>> {
        let receiver = self.receiver.lock().take();
        Box::pin(async move {
            let rx = receiver.ok_or(RemoteError::Closed)?;
            let events = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(Box::pin(events) as EventStream)
        })
    }

    fn set_at_path(
        &self,
        path: &str,
        value: Option<Value>,
    ) -> BoxFuture<'_, Result<(), RemoteError>> {
        self.writes.lock().push(RecordedWrite {
            path: path.to_string(),
            value: value.clone(),
        });
        let result = match self.rejection.lock().clone() {
            Some((status, body)) => Err(RemoteError::Status { status, body }),
            None => {
                if self.echo.load(Ordering::Relaxed) {
                    let path = if path.is_empty() { "/" } else { path };
                    self.push_put(path, value.unwrap_or(Value::Null));
                }
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}
