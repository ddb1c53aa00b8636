use rustc_hash::FxHashMap;
use tracing::trace;

use super::{FileHandle, FsError, InodeAddr, OpenFlags};

/// What an open handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// A regular file opened for writing.
    File {
        /// Flags the file was opened with.
        flags: OpenFlags,
    },
    /// A directory opened for listing.
    Dir,
}

/// A single open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenHandle {
    /// The inode the handle was opened on.
    pub ino: InodeAddr,
    /// File or directory.
    pub kind: HandleKind,
}

/// Open handles, keyed by the id handed to the kernel.
///
/// Ids start at 1 and are never reused within a mount.
#[derive(Debug)]
pub struct HandleTable {
    open: FxHashMap<FileHandle, OpenHandle>,
    next_fh: FileHandle,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Creates an empty handle table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: FxHashMap::default(),
            next_fh: 1,
        }
    }

    /// Register a new handle and return its id.
    pub fn open(&mut self, handle: OpenHandle) -> Result<FileHandle, FsError> {
        let fh = self.next_fh;
        self.next_fh = fh.checked_add(1).ok_or_else(|| {
            tracing::error!("file handle space exhausted");
            FsError::Exhausted
        })?;
        trace!(fh, ino = handle.ino, kind = ?handle.kind, "opened handle");
        self.open.insert(fh, handle);
        Ok(fh)
    }

    #[cfg(test)]
    pub(crate) fn set_next_fh(&mut self, fh: FileHandle) {
        self.next_fh = fh;
    }

    /// Look up an open handle.
    pub fn get(&self, fh: FileHandle) -> Result<OpenHandle, FsError> {
        self.open.get(&fh).copied().ok_or(FsError::InvalidHandle(fh))
    }

    /// Look up an open file handle; directory handles are rejected.
    pub fn get_file(&self, fh: FileHandle) -> Result<(InodeAddr, OpenFlags), FsError> {
        match self.get(fh)? {
            OpenHandle {
                ino,
                kind: HandleKind::File { flags },
            } => Ok((ino, flags)),
            OpenHandle {
                kind: HandleKind::Dir,
                ..
            } => Err(FsError::InvalidHandle(fh)),
        }
    }

    /// Forget a handle of the given kind, returning what it referred to.
    ///
    /// A handle of the other kind is left open and reported as invalid.
    pub fn close(&mut self, fh: FileHandle, dir: bool) -> Result<OpenHandle, FsError> {
        let handle = self.get(fh)?;
        if matches!(handle.kind, HandleKind::Dir) != dir {
            return Err(FsError::InvalidHandle(fh));
        }
        self.open.remove(&fh);
        trace!(fh, ino = handle.ino, "closed handle");
        Ok(handle)
    }

    /// Number of open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Whether no handle is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(ino: InodeAddr) -> OpenHandle {
        OpenHandle {
            ino,
            kind: HandleKind::File {
                flags: OpenFlags::WRONLY,
            },
        }
    }

    #[test]
    fn ids_start_at_one_and_are_never_reused() {
        let mut table = HandleTable::new();
        let a = table.open(file(2)).unwrap();
        assert_eq!(a, 1);
        table.close(a, false).unwrap();
        let b = table.open(file(2)).unwrap();
        assert_eq!(b, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn closing_twice_is_invalid() {
        let mut table = HandleTable::new();
        let fh = table.open(file(2)).unwrap();
        table.close(fh, false).unwrap();
        assert_eq!(table.close(fh, false), Err(FsError::InvalidHandle(fh)));
        assert!(table.is_empty());
    }

    #[test]
    fn directory_handles_are_not_file_handles() {
        let mut table = HandleTable::new();
        let fh = table
            .open(OpenHandle {
                ino: 1,
                kind: HandleKind::Dir,
            })
            .unwrap();
        assert_eq!(table.get_file(fh), Err(FsError::InvalidHandle(fh)));
        assert_eq!(table.close(fh, false), Err(FsError::InvalidHandle(fh)));
        assert_eq!(table.close(fh, true).unwrap().ino, 1);
    }

    #[test]
    fn exhausted_ids_fail_without_registering() {
        let mut table = HandleTable::new();
        table.set_next_fh(FileHandle::MAX);
        assert_eq!(table.open(file(2)), Err(FsError::Exhausted));
        assert_eq!(table.open(file(2)), Err(FsError::Exhausted));
        assert!(table.is_empty());
    }
}
