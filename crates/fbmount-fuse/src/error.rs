//! Error handling and errno mapping for the FUSE filesystem.
//!
//! Everything the adapter layer can fail with funnels into [`FuseError`],
//! which knows the POSIX error code to hand back to the kernel.

use crate::async_bridge::BridgeError;
use fbmount_core::{RemoteError, TreeError};
use thiserror::Error;

/// Errors surfaced by filesystem operations.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Mirror tree precondition failure.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// The remote store rejected or failed a write.
    #[error("remote write failed: {0}")]
    Remote(#[from] RemoteError),

    /// The remote write did not finish in time or was dropped.
    #[error("remote write aborted: {0}")]
    Bridge(#[from] BridgeError),

    /// Name that is not valid UTF-8.
    #[error("invalid file name")]
    InvalidName,

}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Tree(e) => tree_error_to_errno(e),
            FuseError::Remote(_) => libc::EIO,
            FuseError::Bridge(e) => e.to_errno(),
            FuseError::InvalidName => libc::EINVAL,
        }
    }
}

/// Maps mirror tree errors onto the filesystem error vocabulary.
pub fn tree_error_to_errno(e: &TreeError) -> i32 {
    match e {
        TreeError::InvalidPath(_) => libc::EIO,
        TreeError::InvalidKey(_) | TreeError::UnsupportedWrite { .. } => libc::EINVAL,
        TreeError::NotADirectory(_) => libc::ENOTDIR,
        TreeError::IsADirectory(_) => libc::EISDIR,
        TreeError::NoSuchEntry(_) | TreeError::StaleNode(_) => libc::ENOENT,
        TreeError::AlreadyExists(_) => libc::EEXIST,
    }
}

/// Result type for FUSE operations.
pub type FuseResult<T> = Result<T, FuseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tree_errors() {
        let cases = [
            (TreeError::InvalidKey("a.b".into()), libc::EINVAL),
            (TreeError::NotADirectory("/f".into()), libc::ENOTDIR),
            (TreeError::NoSuchEntry("/x".into()), libc::ENOENT),
            (TreeError::StaleNode(10_000), libc::ENOENT),
            (TreeError::AlreadyExists("/x".into()), libc::EEXIST),
        ];
        for (e, errno) in cases {
            assert_eq!(FuseError::from(e).to_errno(), errno);
        }
    }

    #[test]
    fn test_write_errors() {
        let e = FuseError::from(TreeError::UnsupportedWrite { offset: 3, len: 10 });
        assert_eq!(e.to_errno(), libc::EINVAL);
        assert!(e.to_string().contains("offset 3"));

        let e = FuseError::from(TreeError::IsADirectory("/d".into()));
        assert_eq!(e.to_errno(), libc::EISDIR);
        assert_eq!(FuseError::InvalidName.to_errno(), libc::EINVAL);

        let e = FuseError::from(RemoteError::Status {
            status: 401,
            body: "Permission denied".into(),
        });
        assert_eq!(e.to_errno(), libc::EIO);

        let e = FuseError::from(BridgeError::Timeout(Duration::from_secs(1)));
        assert_eq!(e.to_errno(), libc::ETIMEDOUT);
    }
}
