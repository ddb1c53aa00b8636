//! In-memory write-only filesystem core.
/// Attribute records derived from inode state.
pub mod attr;
/// Directory tree: per-parent entry maps with stable listing order.
pub mod dcache;
/// Error taxonomy shared by every handler.
pub mod error;
/// FUSE adapter: maps `fuser::Filesystem` callbacks to [`NullFs`].
pub mod fuser;
/// Open file and directory handles.
pub mod handles;
/// Inode table with lookup, link and handle reference counts.
pub mod itable;
/// The protocol-facing operation handlers.
pub mod null_fs;

pub use attr::FileAttr;
pub use error::FsError;
pub use null_fs::{Created, Entry, FsOptions, NullFs, SetAttr, TimeSpec};

use std::ffi::OsStr;
use std::time::SystemTime;

use bitflags::bitflags;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Type representing a file handle.
pub type FileHandle = u64;

/// The identifier of the root directory. It is never removed or recycled.
pub const ROOT_INODE: InodeAddr = 1;

/// Longest accepted entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

bitflags! {
    /// Permission bits for an inode, similar to Unix file permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InodePerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Sticky bit.
        const STICKY        = 1 << 9;
        /// Set-group-ID bit.
        const SETGID        = 1 << 10;
        /// Set-user-ID bit.
        const SETUID        = 1 << 11;

        /// Owner: read, write, and execute.
        const OWNER_RWX = Self::OWNER_READ.bits()
            | Self::OWNER_WRITE.bits()
            | Self::OWNER_EXECUTE.bits();
    }
}

impl InodePerms {
    /// Permission bits for a `mode` argument after applying `umask`.
    ///
    /// File type bits in `mode` are ignored.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "masked to the low 12 bits before narrowing"
    )]
    pub fn from_mode(mode: u32, umask: u32) -> Self {
        Self::from_bits_truncate((mode & !umask & 0o7777) as u16)
    }
}

impl Default for InodePerms {
    /// `0o755`.
    fn default() -> Self {
        Self::OWNER_RWX
            | Self::GROUP_READ
            | Self::GROUP_EXECUTE
            | Self::OTHER_READ
            | Self::OTHER_EXECUTE
    }
}

bitflags! {
    /// Flags for opening a file, similar to Unix open(2) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        /// Open for reading only.
        const RDONLY = libc::O_RDONLY;
        /// Open for writing only.
        const WRONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const RDWR = libc::O_RDWR;

        /// Append on each write.
        const APPEND = libc::O_APPEND;
        /// Truncate to zero length.
        const TRUNC = libc::O_TRUNC;
        /// Create file if it does not exist.
        const CREAT = libc::O_CREAT;
        /// Error if file already exists (with `CREAT`).
        const EXCL = libc::O_EXCL;

        /// Non-blocking mode.
        const NONBLOCK = libc::O_NONBLOCK;
        /// Synchronous writes.
        const SYNC = libc::O_SYNC;
        /// Synchronous data integrity writes.
        const DSYNC = libc::O_DSYNC;
        /// Do not follow symlinks.
        const NOFOLLOW = libc::O_NOFOLLOW;
        /// Set close-on-exec.
        const CLOEXEC = libc::O_CLOEXEC;
        /// Fail if not a directory.
        const DIRECTORY = libc::O_DIRECTORY;

        /// Do not update access time (Linux only).
        #[cfg(target_os = "linux")]
        const NOATIME = libc::O_NOATIME;
    }
}

impl OpenFlags {
    /// Whether the access mode bits request write-only access.
    ///
    /// `RDONLY` is zero, so the access mode has to be compared as a whole rather than tested
    /// with `contains`.
    #[must_use]
    pub fn is_write_only(self) -> bool {
        self.bits() & libc::O_ACCMODE == libc::O_WRONLY
    }
}

impl From<i32> for OpenFlags {
    fn from(val: i32) -> Self {
        Self::from_bits_truncate(val)
    }
}

/// The type of an inode entry in the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum INodeType {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// Representation of an inode.
///
/// Reference counts live beside this record in the [`itable::InodeTable`]; everything here is
/// what gets reported to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct INode {
    /// The address of this inode, which serves as its unique identifier.
    pub addr: InodeAddr,
    /// Distinguishes successive lives of a recycled `addr`.
    pub generation: u64,
    /// The permissions associated with this inode, represented as a bitfield.
    pub permissions: InodePerms,
    /// The user ID of the owner of this inode.
    pub uid: u32,
    /// The group ID of the owner of this inode.
    pub gid: u32,
    /// The time this inode was created at.
    pub create_time: SystemTime,
    /// The time this inode was last modified at.
    pub last_modified_at: SystemTime,
    /// The time this inode was last accessed at.
    pub last_accessed_at: SystemTime,
    /// The time this inode's metadata last changed.
    pub last_changed_at: SystemTime,
    /// The logical size of the file, in bytes. Nothing is ever stored.
    pub size: u64,
    /// Number of directory entries naming this inode.
    pub nlink: u32,
    /// Number of child directories, for directories.
    pub child_dirs: u32,
    /// Additional information about the type of this inode (e.g., file vs directory).
    pub itype: INodeType,
}

impl INode {
    /// Check if this inode is the root inode.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.addr == ROOT_INODE
    }

    /// Stamp modification and change times with `now`.
    ///
    /// Automatic timestamps never move backwards, even if the wall clock does. An mtime set
    /// into the future by `setattr` therefore stays put until the clock passes it.
    pub fn touch_modified(&mut self, now: SystemTime) {
        self.last_modified_at = self.last_modified_at.max(now);
        self.touch_changed(now);
    }

    /// Stamp the change time with `now`, keeping it monotonic.
    pub fn touch_changed(&mut self, now: SystemTime) {
        self.last_changed_at = self.last_changed_at.max(now);
    }
}

/// The owner of a newly created inode, taken from the requesting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Owner {
    /// User ID.
    pub uid: u32,
    /// Group ID.
    pub gid: u32,
}

/// A directory entry yielded by [`NullFs::readdir`].
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    /// The name of this entry within its parent directory.
    pub name: &'a OsStr,
    /// The inode this entry names.
    pub addr: InodeAddr,
    /// The type of that inode.
    pub itype: INodeType,
}

/// Filesystem statistics returned by [`NullFs::statfs`].
///
/// Block-related sizes are in units of `block_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsStats {
    /// Filesystem block size (bytes).
    pub block_size: u32,
    /// Total number of data blocks.
    pub total_blocks: u64,
    /// Number of free blocks.
    pub free_blocks: u64,
    /// Number of blocks available to unprivileged users.
    pub available_blocks: u64,
    /// Total number of file nodes (inodes).
    pub total_inodes: u64,
    /// Number of free file nodes.
    pub free_inodes: u64,
    /// Maximum filename length (bytes).
    pub max_filename_length: u32,
}
