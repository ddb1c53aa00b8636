//! The filesystem state machine behind every FUSE callback.
//!
//! [`NullFs`] owns the inode table, the directory tree and the handle table behind one mutex.
//! Each handler applies its whole mutation inside a single critical section and checks every
//! failure condition before touching anything, so an error never leaves partial state behind.
//!
//! Writes are accepted and thrown away. The only trace they leave is the logical file size and
//! the modification time.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::{debug, trace};

use super::attr::{BLOCK_SIZE, FileAttr, compute_attributes};
use super::dcache::{Cursor, DCache, DValue, RemoveKind};
use super::handles::{HandleKind, HandleTable, OpenHandle};
use super::itable::{InodeTable, Refs};
use super::{
    DirEntry, FileHandle, FsError, FsStats, INode, INodeType, InodeAddr, InodePerms,
    MAX_NAME_LEN, OpenFlags, Owner,
};

/// Entries copied out of the tree per lock acquisition during `readdir`.
const READDIR_BATCH: usize = 128;

/// Inode capacity reported by `statfs`.
const TOTAL_INODES: u64 = 0xFFFF_FFFF;

/// Block capacity reported by `statfs`: 4 PiB of blocks that are always free.
const TOTAL_BLOCKS: u64 = 1 << 40;

/// Settings fixed for the lifetime of a mount.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsOptions {
    /// Permission bits of the root directory.
    pub root_perms: InodePerms,
    /// Owner of the root directory.
    pub root_owner: Owner,
}

/// An inode introduced to the kernel, with the generation to report alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Attributes of the inode.
    pub attr: FileAttr,
    /// Generation of the inode's address.
    pub generation: u64,
}

/// Result of a successful `create`: the new entry and the handle opened on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    /// The new file.
    pub entry: Entry,
    /// Write handle opened on it.
    pub fh: FileHandle,
}

/// A timestamp supplied to `setattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// The current time.
    Now,
    /// An explicit instant, which may lie in the past.
    At(SystemTime),
}

impl TimeSpec {
    fn resolve(self, now: SystemTime) -> SystemTime {
        match self {
            Self::Now => now,
            Self::At(t) => t,
        }
    }
}

/// Attribute changes requested by `setattr`. `None` leaves a field alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// New mode; only the permission bits are kept.
    pub mode: Option<u32>,
    /// New owner.
    pub uid: Option<u32>,
    /// New group.
    pub gid: Option<u32>,
    /// New logical size. Files only.
    pub size: Option<u64>,
    /// New access time.
    pub atime: Option<TimeSpec>,
    /// New modification time.
    pub mtime: Option<TimeSpec>,
}

#[derive(Debug)]
struct FsState {
    inodes: InodeTable,
    tree: DCache,
    handles: HandleTable,
}

impl FsState {
    /// The live directory at `ino`.
    fn dir(&self, ino: InodeAddr) -> Result<&INode, FsError> {
        let inode = self.inodes.get(ino)?;
        if inode.itype != INodeType::Directory {
            return Err(FsError::NotADirectory);
        }
        Ok(inode)
    }

    /// The live inode a directory entry points at.
    fn target(&self, parent: InodeAddr, entry: DValue) -> Result<&INode, FsError> {
        self.inodes
            .get(entry.ino)
            .map_err(|_| FsError::invariant(parent, "directory entry names a missing inode"))
    }

    /// Drop whatever else refers to an inode that was just reclaimed.
    fn dispose(&mut self, reclaimed: Option<INode>) {
        let Some(inode) = reclaimed else {
            return;
        };
        if inode.itype == INodeType::Directory {
            self.tree.remove_dir(inode.addr);
        }
        debug!(addr = inode.addr, generation = inode.generation, "inode reclaimed");
    }

    /// Everything `create` and `mkdir` check before allocating.
    fn check_insert(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        validate_name(name)?;
        let dir = self.dir(parent)?;
        if dir.nlink == 0 {
            // The directory has been removed; POSIX refuses new entries in it.
            return Err(FsError::NotFound);
        }
        match self.tree.lookup(parent, name) {
            Ok(_) => Err(FsError::AlreadyExists),
            Err(FsError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Link the freshly allocated `child` under `parent` and hand the kernel its first lookup.
    fn attach(
        &mut self,
        parent: InodeAddr,
        name: &OsStr,
        child: InodeAddr,
        itype: INodeType,
        now: SystemTime,
    ) -> Result<Entry, FsError> {
        self.tree.insert(
            parent,
            name.to_os_string(),
            DValue { ino: child, itype },
        )?;
        self.inodes.link(child)?;
        self.inodes.retain(child, 1)?;
        let dir = self.inodes.get_mut(parent)?;
        if itype == INodeType::Directory {
            dir.child_dirs = dir.child_dirs.saturating_add(1);
        }
        dir.touch_modified(now);
        Ok(entry_of(self.inodes.get(child)?))
    }

    /// Remove `name` from `parent`, dropping the link it held.
    fn detach(&mut self, parent: InodeAddr, name: &OsStr, kind: RemoveKind) -> Result<(), FsError> {
        self.dir(parent)?;
        let found = self.tree.lookup(parent, name)?;
        self.target(parent, found)?;
        let removed = self.tree.remove(parent, name, kind)?;
        let reclaimed = self.inodes.unlink(removed.ino)?;
        self.dispose(reclaimed);

        let now = SystemTime::now();
        let dir = self.inodes.get_mut(parent)?;
        if removed.is_dir() {
            dir.child_dirs = dir.child_dirs.saturating_sub(1);
        }
        dir.touch_modified(now);
        if let Ok(child) = self.inodes.get_mut(removed.ino) {
            child.touch_changed(now);
        }
        Ok(())
    }

    fn close(&mut self, fh: FileHandle, dir: bool) -> Result<(), FsError> {
        let handle = self.handles.get(fh)?;
        if !self.inodes.contains(handle.ino) {
            return Err(FsError::invariant(handle.ino, "open handle on a missing inode"));
        }
        let handle = self.handles.close(fh, dir)?;
        let reclaimed = self.inodes.close_handle(handle.ino)?;
        self.dispose(reclaimed);
        Ok(())
    }
}

fn entry_of(inode: &INode) -> Entry {
    Entry {
        attr: compute_attributes(inode),
        generation: inode.generation,
    }
}

/// Reject names that cannot be stored as a single path component.
fn validate_name(name: &OsStr) -> Result<(), FsError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes == b"." || bytes == b".." || bytes.contains(&b'/') {
        return Err(FsError::InvalidName);
    }
    if bytes.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// In-memory filesystem that discards everything written to it.
///
/// Share it between threads with an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct NullFs {
    state: Mutex<FsState>,
}

impl NullFs {
    /// Create a filesystem holding only an empty root directory.
    #[must_use]
    pub fn new(options: FsOptions) -> Self {
        let inodes = InodeTable::new(options.root_perms, options.root_owner, SystemTime::now());
        let mut tree = DCache::new();
        tree.add_dir(super::ROOT_INODE);
        Self {
            state: Mutex::new(FsState {
                inodes,
                tree,
                handles: HandleTable::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `name` in `parent` and take one kernel reference on the result.
    pub fn lookup(&self, parent: InodeAddr, name: &OsStr) -> Result<Entry, FsError> {
        let mut st = self.lock();
        st.dir(parent)?;
        let found = st.tree.lookup(parent, name)?;
        let entry = entry_of(st.target(parent, found)?);
        st.inodes.retain(found.ino, 1)?;
        Ok(entry)
    }

    /// Attributes of `ino`.
    pub fn getattr(&self, ino: InodeAddr) -> Result<FileAttr, FsError> {
        let st = self.lock();
        st.inodes.get(ino).map(compute_attributes)
    }

    /// Apply the requested attribute changes to `ino` and return the result.
    ///
    /// Explicit timestamps are stored as given, even if they move backwards. The change time
    /// always advances.
    pub fn setattr(&self, ino: InodeAddr, changes: SetAttr) -> Result<FileAttr, FsError> {
        let mut st = self.lock();
        let inode = st.inodes.get_mut(ino)?;
        if changes.size.is_some() && inode.itype == INodeType::Directory {
            return Err(FsError::IsADirectory);
        }

        let now = SystemTime::now();
        if let Some(mode) = changes.mode {
            inode.permissions = InodePerms::from_mode(mode, 0);
        }
        if let Some(uid) = changes.uid {
            inode.uid = uid;
        }
        if let Some(gid) = changes.gid {
            inode.gid = gid;
        }
        if let Some(size) = changes.size {
            trace!(ino, old = inode.size, new = size, "resizing");
            inode.size = size;
            inode.touch_modified(now);
        }
        if let Some(atime) = changes.atime {
            inode.last_accessed_at = atime.resolve(now);
        }
        if let Some(mtime) = changes.mtime {
            inode.last_modified_at = mtime.resolve(now);
        }
        inode.touch_changed(now);
        Ok(compute_attributes(inode))
    }

    /// Create a regular file and open a write handle on it.
    ///
    /// The open flags of the new handle are recorded but not checked: a file created by the
    /// kernel is always writable by its creator.
    pub fn create(
        &self,
        parent: InodeAddr,
        name: &OsStr,
        mode: u32,
        umask: u32,
        owner: Owner,
        flags: OpenFlags,
    ) -> Result<Created, FsError> {
        let mut st = self.lock();
        st.check_insert(parent, name)?;

        let now = SystemTime::now();
        let perms = InodePerms::from_mode(mode, umask);
        let ino = st.inodes.allocate(INodeType::File, perms, owner, now)?;
        let fh = match st.handles.open(OpenHandle {
            ino,
            kind: HandleKind::File { flags },
        }) {
            Ok(fh) => fh,
            Err(e) => {
                let reclaimed = st.inodes.reclaim_check(ino);
                st.dispose(reclaimed);
                return Err(e);
            }
        };
        st.inodes.open_handle(ino)?;
        let entry = st.attach(parent, name, ino, INodeType::File, now)?;
        debug!(parent, ?name, ino, fh, "created file");
        Ok(Created { entry, fh })
    }

    /// Create an empty directory.
    pub fn mkdir(
        &self,
        parent: InodeAddr,
        name: &OsStr,
        mode: u32,
        umask: u32,
        owner: Owner,
    ) -> Result<Entry, FsError> {
        let mut st = self.lock();
        st.check_insert(parent, name)?;

        let now = SystemTime::now();
        let perms = InodePerms::from_mode(mode, umask);
        let ino = st.inodes.allocate(INodeType::Directory, perms, owner, now)?;
        st.tree.add_dir(ino);
        let entry = st.attach(parent, name, ino, INodeType::Directory, now)?;
        debug!(parent, ?name, ino, "created directory");
        Ok(entry)
    }

    /// Open an existing file for writing.
    ///
    /// Any access mode other than write-only is refused. `O_TRUNC` resets the logical size.
    pub fn open(&self, ino: InodeAddr, flags: OpenFlags) -> Result<FileHandle, FsError> {
        let mut st = self.lock();
        let inode = st.inodes.get(ino)?;
        if inode.itype == INodeType::Directory {
            return Err(FsError::IsADirectory);
        }
        if !flags.is_write_only() {
            return Err(FsError::PermissionDenied);
        }

        let fh = st.handles.open(OpenHandle {
            ino,
            kind: HandleKind::File { flags },
        })?;
        st.inodes.open_handle(ino)?;
        if flags.contains(OpenFlags::TRUNC) {
            let inode = st.inodes.get_mut(ino)?;
            inode.size = 0;
            inode.touch_modified(SystemTime::now());
        }
        Ok(fh)
    }

    /// Accept `len` bytes at `offset` and throw them away.
    ///
    /// The logical size grows to cover the written range. Returns `len`.
    pub fn write(&self, fh: FileHandle, offset: u64, len: u32) -> Result<u32, FsError> {
        let mut st = self.lock();
        let (ino, _flags) = st.handles.get_file(fh)?;
        let end = offset
            .checked_add(u64::from(len))
            .filter(|end| i64::try_from(*end).is_ok())
            .ok_or(FsError::FileTooLarge)?;
        let inode = st
            .inodes
            .get_mut(ino)
            .map_err(|_| FsError::invariant(ino, "open handle on a missing inode"))?;
        inode.size = inode.size.max(end);
        inode.touch_modified(SystemTime::now());
        trace!(fh, ino, offset, len, size = inode.size, "discarded write");
        Ok(len)
    }

    /// Acknowledge a flush. Nothing is buffered, so there is nothing to do.
    pub fn flush(&self, fh: FileHandle) -> Result<(), FsError> {
        self.lock().handles.get(fh).map(|_| ())
    }

    /// Close a file handle.
    pub fn release(&self, fh: FileHandle) -> Result<(), FsError> {
        self.lock().close(fh, false)
    }

    /// Open a directory for listing.
    pub fn opendir(&self, ino: InodeAddr) -> Result<FileHandle, FsError> {
        let mut st = self.lock();
        st.dir(ino)?;
        let fh = st.handles.open(OpenHandle {
            ino,
            kind: HandleKind::Dir,
        })?;
        st.inodes.open_handle(ino)?;
        Ok(fh)
    }

    /// Close a directory handle.
    pub fn releasedir(&self, fh: FileHandle) -> Result<(), FsError> {
        self.lock().close(fh, true)
    }

    /// Remove a non-directory entry.
    ///
    /// The inode survives while the kernel still references it or a handle is open on it.
    pub fn unlink(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        self.lock().detach(parent, name, RemoveKind::NonDirectory)
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        self.lock().detach(parent, name, RemoveKind::EmptyDirectory)
    }

    /// List the entries of `ino` that come after `cursor`.
    ///
    /// `filler` receives each entry with the cursor that resumes after it, and returns `true`
    /// once it cannot take more. It is called with the lock released, so it may block.
    pub fn readdir(
        &self,
        ino: InodeAddr,
        mut cursor: Cursor,
        mut filler: impl FnMut(DirEntry<'_>, Cursor) -> bool,
    ) -> Result<(), FsError> {
        let mut first = true;
        loop {
            let batch: Vec<(Cursor, OsString, DValue)> = {
                let st = self.lock();
                if first {
                    st.dir(ino)?;
                    first = false;
                }
                match st.tree.list(ino, cursor) {
                    Ok(iter) => iter
                        .take(READDIR_BATCH)
                        .map(|(seq, name, value)| (seq, name.to_os_string(), value))
                        .collect(),
                    // Reclaimed between batches: nothing more to list.
                    Err(_) => Vec::new(),
                }
            };

            let exhausted = batch.len() < READDIR_BATCH;
            for (seq, name, value) in &batch {
                let entry = DirEntry {
                    name: name.as_os_str(),
                    addr: value.ino,
                    itype: value.itype,
                };
                if filler(entry, *seq) {
                    return Ok(());
                }
                cursor = *seq;
            }
            if exhausted {
                return Ok(());
            }
        }
    }

    /// Drop `nlookup` kernel references to `ino`.
    ///
    /// Unknown inodes are ignored; the kernel may forget an inode we already reclaimed.
    pub fn forget(&self, ino: InodeAddr, nlookup: u64) {
        let mut st = self.lock();
        let reclaimed = st.inodes.release(ino, nlookup);
        st.dispose(reclaimed);
    }

    /// Extended attributes are not stored; every request fails with `NoAttribute`.
    pub fn getxattr(&self, ino: InodeAddr, name: &OsStr) -> Result<Vec<u8>, FsError> {
        self.lock().inodes.get(ino)?;
        debug!(ino, ?name, "extended attribute requested");
        Err(FsError::NoAttribute)
    }

    /// Usage statistics. Space is virtual, so the disk never looks full.
    #[must_use]
    pub fn statfs(&self) -> FsStats {
        let used = u64::try_from(self.lock().inodes.len()).unwrap_or(TOTAL_INODES);
        FsStats {
            block_size: BLOCK_SIZE,
            total_blocks: TOTAL_BLOCKS,
            free_blocks: TOTAL_BLOCKS,
            available_blocks: TOTAL_BLOCKS,
            total_inodes: TOTAL_INODES,
            free_inodes: TOTAL_INODES.saturating_sub(used),
            max_filename_length: u32::try_from(MAX_NAME_LEN).unwrap_or(u32::MAX),
        }
    }

    /// Number of live inodes, the root included.
    #[must_use]
    pub fn inode_count(&self) -> usize {
        self.lock().inodes.len()
    }

    /// Number of open file and directory handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.lock().handles.len()
    }

    /// Reference counts of `ino`, or `None` once it has been reclaimed.
    #[must_use]
    pub fn refs(&self, ino: InodeAddr) -> Option<Refs> {
        self.lock().inodes.refs(ino)
    }
}
