use super::{FileHandle, InodeAddr};

/// Every way a filesystem call can fail.
///
/// Errors are local to the call that produced them; none of them leaves the shared state
/// modified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    /// The inode or directory entry does not exist.
    #[error("no such file or directory")]
    NotFound,

    /// The name is already taken in the parent directory.
    #[error("entry already exists")]
    AlreadyExists,

    /// The directory still has entries.
    #[error("directory not empty")]
    NotEmpty,

    /// A directory was required.
    #[error("not a directory")]
    NotADirectory,

    /// A non-directory was required.
    #[error("is a directory")]
    IsADirectory,

    /// The file was opened with read access.
    #[error("files can only be opened write-only")]
    PermissionDenied,

    /// The handle was never issued or was already released.
    #[error("invalid file handle {0}")]
    InvalidHandle(FileHandle),

    /// The name is empty, contains `/`, or is `.`/`..`.
    #[error("invalid entry name")]
    InvalidName,

    /// The name is longer than [`MAX_NAME_LEN`](super::MAX_NAME_LEN).
    #[error("entry name too long")]
    NameTooLong,

    /// The write would push the logical size past the largest representable offset.
    #[error("file too large")]
    FileTooLarge,

    /// Extended attributes are not stored.
    #[error("no such attribute")]
    NoAttribute,

    /// No inode or handle identifier is left to hand out.
    #[error("identifier space exhausted")]
    Exhausted,

    /// Internal state disagrees with itself.
    #[error("internal invariant violated for inode {addr}: {what}")]
    Invariant {
        /// The inode the inconsistency was detected on.
        addr: InodeAddr,
        /// What was found to be inconsistent.
        what: &'static str,
    },
}

impl FsError {
    /// The POSIX error number reported to the kernel.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NotADirectory => libc::ENOTDIR,
            Self::IsADirectory => libc::EISDIR,
            Self::PermissionDenied => libc::EACCES,
            Self::InvalidHandle(_) => libc::EBADF,
            Self::InvalidName => libc::EINVAL,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::FileTooLarge => libc::EFBIG,
            #[cfg(target_os = "macos")]
            Self::NoAttribute => libc::ENOATTR,
            #[cfg(not(target_os = "macos"))]
            Self::NoAttribute => libc::ENODATA,
            Self::Exhausted => libc::ENOSPC,
            Self::Invariant { .. } => libc::EIO,
        }
    }

    /// Build an [`FsError::Invariant`], logging it so the inconsistency is visible.
    #[must_use]
    pub fn invariant(addr: InodeAddr, what: &'static str) -> Self {
        tracing::error!(addr, what, "filesystem invariant violated, failing the call");
        Self::Invariant { addr, what }
    }
}

impl From<FsError> for std::io::Error {
    fn from(e: FsError) -> Self {
        Self::from_raw_os_error(e.errno())
    }
}
