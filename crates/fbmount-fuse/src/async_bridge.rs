//! Blocking bridge from FUSE worker threads to the async remote client.
//!
//! FUSE callbacks are synchronous and a write must not return before the
//! remote store has acknowledged it. The bridge spawns the remote call on the
//! tokio runtime and parks the calling thread on a oneshot channel, bounded
//! by the mount's write timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::warn;

/// Counters for remote calls made through the bridge.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls that have not finished yet.
    pub fn in_flight(&self) -> u64 {
        let finished = self.completed.load(Ordering::Relaxed)
            + self.timed_out.load(Ordering::Relaxed)
            + self.cancelled.load(Ordering::Relaxed);
        self.started.load(Ordering::Relaxed).saturating_sub(finished)
    }
}

/// Why a bridged call produced no result.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl BridgeError {
    pub fn to_errno(&self) -> i32 {
        match self {
            BridgeError::Timeout(_) => libc::ETIMEDOUT,
            BridgeError::Cancelled => libc::ECANCELED,
        }
    }
}

/// Runs futures on a runtime on behalf of blocking callers.
#[derive(Debug, Clone)]
pub struct RemoteBridge {
    handle: Handle,
    timeout: Duration,
    stats: Arc<BridgeStats>,
}

impl RemoteBridge {
    pub fn new(handle: Handle, timeout: Duration) -> Self {
        Self {
            handle,
            timeout,
            stats: BridgeStats::new(),
        }
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocks the current thread until `future` completes or times out.
    ///
    /// Must not be called from a runtime worker thread. On timeout the task
    /// is aborted so an abandoned request does not linger.
    pub fn run<F, T>(&self, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let timeout = self.timeout;
        let task = self.handle.spawn(async move {
            // The receiver is gone only if the caller gave up.
            let _ = tx.send(tokio::time::timeout(timeout, future).await);
        });

        match rx.blocking_recv() {
            Ok(Ok(value)) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Ok(Err(_elapsed)) => {
                task.abort();
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(timeout = ?timeout, "remote call timed out");
                Err(BridgeError::Timeout(timeout))
            }
            Err(_closed) => {
                task.abort();
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                Err(BridgeError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_returns_value() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let bridge = RemoteBridge::new(rt.handle().clone(), Duration::from_secs(5));
        assert_eq!(bridge.run(async { 42 }).unwrap(), 42);
        assert_eq!(bridge.stats().completed.load(Ordering::Relaxed), 1);
        assert_eq!(bridge.stats().in_flight(), 0);
    }

    #[test]
    fn test_run_times_out() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let bridge = RemoteBridge::new(rt.handle().clone(), Duration::from_millis(10));
        let result = bridge.run(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert_eq!(bridge.stats().timed_out.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_run_from_many_threads() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let bridge = RemoteBridge::new(rt.handle().clone(), Duration::from_secs(5));
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let bridge = bridge.clone();
                std::thread::spawn(move || bridge.run(async move { i * 2 }).unwrap())
            })
            .collect();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 56);
    }
}
