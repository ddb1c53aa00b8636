use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::ops::Bound;

use rustc_hash::FxHashMap;

use super::{FsError, INodeType, InodeAddr};

/// What a directory entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DValue {
    /// Inode address of this entry.
    pub ino: InodeAddr,
    /// Type of that inode.
    pub itype: INodeType,
}

impl DValue {
    /// Whether this entry is itself a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.itype == INodeType::Directory
    }
}

/// Which kind of child a removal is allowed to take out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveKind {
    /// `unlink`: anything but a directory.
    NonDirectory,
    /// `rmdir`: an empty directory.
    EmptyDirectory,
}

/// Position of an entry inside its directory's listing.
///
/// Sequence numbers start at 1, only ever grow, and are never reused within a directory, so
/// "everything after sequence `n`" names the same suffix of the listing before and after any
/// number of removals.
pub type Cursor = u64;

/// The children of a single directory.
#[derive(Debug)]
struct DirState {
    /// Entries in insertion order, keyed by sequence number.
    entries: BTreeMap<Cursor, (OsString, DValue)>,
    /// Name → sequence number, for lookups.
    by_name: FxHashMap<OsString, Cursor>,
    next_seq: Cursor,
}

impl DirState {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_name: FxHashMap::default(),
            next_seq: 1,
        }
    }
}

/// Directory tree with one child map per directory inode.
///
/// Parent/child relations are addresses, never owning pointers; the inode records themselves
/// live in the [`InodeTable`](super::itable::InodeTable). Every directory inode has exactly one
/// listing here, registered by [`add_dir`](Self::add_dir) when it is created and dropped by
/// [`remove_dir`](Self::remove_dir) when it is reclaimed.
#[derive(Debug, Default)]
pub struct DCache {
    dirs: FxHashMap<InodeAddr, DirState>,
}

impl DCache {
    /// Creates an empty directory tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty listing for the directory `ino`.
    pub fn add_dir(&mut self, ino: InodeAddr) {
        self.dirs.entry(ino).or_insert_with(DirState::new);
    }

    /// Drop the listing of `ino`. Returns `true` if there was one.
    ///
    /// Only empty directories are ever reclaimed, so nothing is orphaned.
    pub fn remove_dir(&mut self, ino: InodeAddr) -> bool {
        match self.dirs.remove(&ino) {
            Some(state) => {
                debug_assert!(state.entries.is_empty(), "dropped a non-empty listing");
                true
            }
            None => false,
        }
    }

    /// Number of entries in directory `ino`, or `None` if it is not a directory.
    #[must_use]
    pub fn len(&self, ino: InodeAddr) -> Option<usize> {
        self.dirs.get(&ino).map(|state| state.entries.len())
    }

    fn state(&self, parent: InodeAddr) -> Result<&DirState, FsError> {
        self.dirs.get(&parent).ok_or(FsError::NotADirectory)
    }

    fn state_mut(&mut self, parent: InodeAddr) -> Result<&mut DirState, FsError> {
        self.dirs.get_mut(&parent).ok_or(FsError::NotADirectory)
    }

    /// Looks up a single child entry by parent inode and name.
    ///
    /// Fails with [`FsError::NotADirectory`] if `parent` has no listing and with
    /// [`FsError::NotFound`] if the name is absent.
    pub fn lookup(&self, parent: InodeAddr, name: &OsStr) -> Result<DValue, FsError> {
        let state = self.state(parent)?;
        let seq = state.by_name.get(name).ok_or(FsError::NotFound)?;
        state
            .entries
            .get(seq)
            .map(|(_, value)| *value)
            .ok_or_else(|| FsError::invariant(parent, "name index points at a missing entry"))
    }

    /// Insert a new entry. Existing entries are never overwritten.
    pub fn insert(
        &mut self,
        parent: InodeAddr,
        name: OsString,
        value: DValue,
    ) -> Result<(), FsError> {
        let state = self.state_mut(parent)?;
        if state.by_name.contains_key(&name) {
            return Err(FsError::AlreadyExists);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.by_name.insert(name.clone(), seq);
        state.entries.insert(seq, (name, value));
        Ok(())
    }

    /// Remove the entry `name` from `parent`, provided it is the kind of child `kind` allows.
    ///
    /// Nothing is modified when an error is returned.
    pub fn remove(
        &mut self,
        parent: InodeAddr,
        name: &OsStr,
        kind: RemoveKind,
    ) -> Result<DValue, FsError> {
        let target = self.lookup(parent, name)?;
        match (kind, target.is_dir()) {
            (RemoveKind::NonDirectory, true) => return Err(FsError::IsADirectory),
            (RemoveKind::EmptyDirectory, false) => return Err(FsError::NotADirectory),
            (RemoveKind::EmptyDirectory, true) => {
                let children = self
                    .len(target.ino)
                    .ok_or_else(|| FsError::invariant(target.ino, "directory without listing"))?;
                if children > 0 {
                    return Err(FsError::NotEmpty);
                }
            }
            (RemoveKind::NonDirectory, false) => {}
        }

        let state = self.state_mut(parent)?;
        if let Some(seq) = state.by_name.remove(name) {
            state.entries.remove(&seq);
        }
        Ok(target)
    }

    /// Iterate the entries of `parent` that come after `cursor`, in listing order.
    ///
    /// Each item carries the cursor that resumes right after it. A `cursor` of 0 starts from
    /// the beginning.
    pub fn list(
        &self,
        parent: InodeAddr,
        cursor: Cursor,
    ) -> Result<impl Iterator<Item = (Cursor, &OsStr, DValue)> + '_, FsError> {
        let state = self.state(parent)?;
        Ok(state
            .entries
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .map(|(seq, (name, value))| (*seq, name.as_os_str(), *value)))
    }
}
