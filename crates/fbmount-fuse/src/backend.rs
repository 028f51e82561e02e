//! Mounting and unmounting.

use crate::{FirebaseFS, MountConfig};
use fuser::{BackgroundSession, MountOption};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a graceful session join before falling back to a lazy unmount.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A mounted filesystem. Dropping the handle unmounts it.
#[derive(Debug)]
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FuseMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session to finish.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "unmounting");
        if let Some(session) = self.session.take() {
            session.join();
        }
        info!(mountpoint = %self.mountpoint.display(), "unmounted");
    }

    fn force_unmount(&self) {
        #[cfg(target_os = "macos")]
        let _ = std::process::Command::new("umount")
            .arg("-f")
            .arg(&self.mountpoint)
            .output();

        #[cfg(target_os = "linux")]
        let _ = std::process::Command::new("fusermount")
            .arg("-uz")
            .arg(&self.mountpoint)
            .output();
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(mountpoint = %self.mountpoint.display(), "unmounting on drop");
        // join() blocks while files are open; give it a bounded wait.
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });
        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            warn!(
                mountpoint = %self.mountpoint.display(),
                timeout = ?JOIN_TIMEOUT,
                "session join timed out, forcing unmount"
            );
            self.force_unmount();
        }
    }
}

/// Mount options for a filesystem configured by `config`.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName("fbmount".to_string()),
        MountOption::Subtype("firebase".to_string()),
        MountOption::AutoUnmount,
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

/// Mounts `fs` at `mountpoint` on a background session.
pub fn mount(fs: FirebaseFS, mountpoint: &Path, config: &MountConfig) -> io::Result<FuseMountHandle> {
    let options = mount_options(config);
    let session = fuser::spawn_mount2(fs, mountpoint, &options)?;
    info!(mountpoint = %mountpoint.display(), "mounted");
    Ok(FuseMountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}
