use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::select;
use tracing::{debug, info, warn};

use null_fs::fs::{FsOptions, InodePerms, NullFs, Owner};

use crate::app_config;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Failed to create Tokio runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Mount point '{}' already exists and is not empty.", .0.display())]
    MountPointNotEmpty(PathBuf),

    #[error("Mount point '{}' is not a directory.", .0.display())]
    MountPointNotADirectory(PathBuf),

    #[error("Failed to prepare mount point '{}': {source}", .path.display())]
    MountPoint {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to mount the filesystem: {0}")]
    Mount(std::io::Error),

    #[error("Failed to install signal handlers: {0}")]
    Signal(std::io::Error),
}

mod managed_fuse {
    //! This module helps manage the lifecycle of fuse slightly better. fuser will not attempt to
    //! force an unmount when the `BackgroundSession` is dropped, and will only do a regular
    //! unmount, but we want to be aggressive and force an unmount if possible.
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use fuser::BackgroundSession;
    use nix::errno::Errno;
    use null_fs::fs::NullFs;
    use null_fs::fs::fuser::FuserAdapter;

    use super::{app_config, debug};
    use tracing::error;

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    impl FuseCoreScope {
        fn spawn(config: &app_config::Config, fs: Arc<NullFs>) -> Result<Self, std::io::Error> {
            Ok(Self {
                _session: Self::spawn_fuse(config, fs)?,
            })
        }

        fn spawn_fuse(
            config: &app_config::Config,
            fs: Arc<NullFs>,
        ) -> Result<BackgroundSession, std::io::Error> {
            let fuse_adapter = FuserAdapter::new(fs, config.kernel_ttl());
            let mut mount_opts = vec![
                fuser::MountOption::FSName(config.fs_name.clone()),
                fuser::MountOption::RW,
                fuser::MountOption::NoDev,
                fuser::MountOption::NoSuid,
            ];
            if config.auto_unmount {
                mount_opts.push(fuser::MountOption::AutoUnmount);
            }
            if config.allow_other {
                mount_opts.push(fuser::MountOption::AllowOther);
            }
            debug!(?mount_opts, "Spawning FUSE session...");

            fuser::spawn_mount2(fuse_adapter, &config.mount_point, &mount_opts)
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(config: &app_config::Config) -> Self {
            Self {
                mount_point: config.mount_point.clone(),
            }
        }

        pub fn spawn(
            &self,
            config: &app_config::Config,
            fs: Arc<NullFs>,
        ) -> Result<FuseCoreScope, std::io::Error> {
            _ = self; // self used for calling convention.
            FuseCoreScope::spawn(config, fs)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for i in 0..UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(attempt = i + 1, "Unmounted FUSE filesystem.");
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!(attempt = i + 1, "FUSE filesystem still busy. Retrying...");
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!(attempt = i + 1, "FUSE filesystem already unmounted.");
                        break;
                    }
                    Err(e) => {
                        error!(attempt = i + 1, error = %e, "Failed to unmount FUSE filesystem.");
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the path exists but is not a directory, returns an error.
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents) and logs an info message.
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &Path) -> Result<(), DaemonError> {
    let io_err = |source: std::io::Error| DaemonError::MountPoint {
        path: mount_point.to_path_buf(),
        source,
    };
    match tokio::fs::metadata(mount_point).await {
        Ok(meta) if !meta.is_dir() => {
            return Err(DaemonError::MountPointNotADirectory(
                mount_point.to_path_buf(),
            ));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point)
                .await
                .map_err(io_err)?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            return Ok(());
        }
        Err(e) => return Err(io_err(e)),
    }

    let mut entries = tokio::fs::read_dir(mount_point).await.map_err(io_err)?;
    if entries.next_entry().await.map_err(io_err)?.is_some() {
        return Err(DaemonError::MountPointNotEmpty(mount_point.to_path_buf()));
    }
    Ok(())
}

/// Permission bits for the root directory, copied from the mount point.
async fn root_perms(mount_point: &Path) -> InodePerms {
    match tokio::fs::metadata(mount_point).await {
        Ok(meta) => InodePerms::from_mode(meta.permissions().mode(), 0),
        Err(e) => {
            warn!(error = %e, "Could not read mount point permissions, using 0755.");
            InodePerms::default()
        }
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

/// Main entry point for the daemon.
pub async fn run(config: app_config::Config) -> Result<(), DaemonError> {
    prepare_mount_point(&config.mount_point).await?;

    let options = FsOptions {
        root_perms: root_perms(&config.mount_point).await,
        root_owner: Owner {
            uid: config.uid,
            gid: config.gid,
        },
    };
    let fs = Arc::new(NullFs::new(options));

    info!("Mounting filesystem at {}.", config.mount_point.display());

    let fuse = managed_fuse::ManagedFuse::new(&config);
    {
        let _session = fuse
            .spawn(&config, Arc::clone(&fs))
            .map_err(DaemonError::Mount)?;
        info!("null-fs is running. Press Ctrl+C to stop.");

        wait_for_exit().await.map_err(DaemonError::Signal)?;
    }
    debug!(
        inodes = fs.inode_count(),
        handles = fs.handle_count(),
        "Filesystem unmounted."
    );
    Ok(())
}

pub fn spawn(config: app_config::Config) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;
    runtime.block_on(run(config))
}
