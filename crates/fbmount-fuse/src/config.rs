//! Mount configuration for the FUSE filesystem.

use std::time::Duration;

/// Default kernel cache TTL for attributes and entries.
///
/// Short, since other clients change the tree at any time.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Default bound on a blocking remote write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live the kernel may cache attributes and entries for.
    pub attr_ttl: Duration,

    /// How long a write waits for the remote store before failing with
    /// `ETIMEDOUT`. The node stays marked modified until an echo arrives.
    pub write_timeout: Duration,

    /// Let users other than the mounting user access the mount.
    pub allow_other: bool,

    /// Owner reported for every entry.
    pub uid: u32,

    /// Group reported for every entry.
    pub gid: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        // SAFETY: getuid and getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            allow_other: false,
            uid,
            gid,
        }
    }
}

impl MountConfig {
    /// Sets the kernel cache TTL.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the remote write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    /// Sets the reported owner.
    #[must_use]
    pub fn ownership(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}
