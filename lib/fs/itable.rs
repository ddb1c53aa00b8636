//! Inode records and the three reference counts that decide when they die.
//!
//! An inode stays alive while any of the following holds:
//!
//! - the kernel remembers it (lookup count, balanced by `forget`),
//! - a directory entry names it (link count),
//! - a file or directory handle is open on it.
//!
//! The counts are plain fields next to each record rather than `Arc`s: `forget` arrives
//! whenever the kernel feels like it, so lifetime is driven by explicit arithmetic.
//! When all three counts hit zero the record is destroyed, the slot's generation is bumped and
//! the address is queued for reuse.

use std::collections::VecDeque;
use std::time::SystemTime;

use rustc_hash::FxHashMap;
use tracing::trace;

use super::{FsError, INode, INodeType, InodeAddr, InodePerms, Owner, ROOT_INODE};

/// Reference counts attached to a live inode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Refs {
    /// References the kernel holds, introduced by lookup/create/mkdir.
    pub lookups: u64,
    /// Directory entries naming the inode.
    pub links: u32,
    /// Open file or directory handles.
    pub handles: u32,
}

impl Refs {
    fn is_unreferenced(self) -> bool {
        self.lookups == 0 && self.links == 0 && self.handles == 0
    }
}

#[derive(Debug)]
struct Slot {
    inode: INode,
    refs: Refs,
}

/// Owner of every inode record.
#[derive(Debug)]
pub struct InodeTable {
    slots: FxHashMap<InodeAddr, Slot>,
    /// Next never-used address.
    next_addr: InodeAddr,
    /// Reclaimed addresses, oldest first.
    recycled: VecDeque<InodeAddr>,
    /// Generation to hand out with each recycled address.
    generations: FxHashMap<InodeAddr, u64>,
}

impl InodeTable {
    /// Create a table holding only the root directory.
    #[must_use]
    pub fn new(root_perms: InodePerms, owner: Owner, now: SystemTime) -> Self {
        let mut root = blank_inode(ROOT_INODE, 0, INodeType::Directory, root_perms, owner, now);
        root.nlink = 1;
        let mut slots = FxHashMap::default();
        slots.insert(
            ROOT_INODE,
            Slot {
                inode: root,
                // The root has no parent entry, but it is linked by the mount itself.
                refs: Refs {
                    links: 1,
                    ..Refs::default()
                },
            },
        );
        Self {
            slots,
            next_addr: ROOT_INODE + 1,
            recycled: VecDeque::new(),
            generations: FxHashMap::default(),
        }
    }

    /// Allocate a fresh, unreferenced inode and return its address.
    ///
    /// Recycled addresses are preferred, oldest first, and come back with a larger generation
    /// than any previous life of the same address.
    pub fn allocate(
        &mut self,
        itype: INodeType,
        permissions: InodePerms,
        owner: Owner,
        now: SystemTime,
    ) -> Result<InodeAddr, FsError> {
        let addr = if let Some(addr) = self.recycled.pop_front() {
            addr
        } else {
            let addr = self.next_addr;
            if addr == InodeAddr::MAX {
                tracing::error!("inode address space exhausted");
                return Err(FsError::Exhausted);
            }
            self.next_addr += 1;
            addr
        };
        let generation = self.generations.get(&addr).copied().unwrap_or(0);
        trace!(addr, generation, ?itype, "allocating inode");
        self.slots.insert(
            addr,
            Slot {
                inode: blank_inode(addr, generation, itype, permissions, owner, now),
                refs: Refs::default(),
            },
        );
        Ok(addr)
    }

    /// Get the inode at `addr`.
    pub fn get(&self, addr: InodeAddr) -> Result<&INode, FsError> {
        self.slots
            .get(&addr)
            .map(|slot| &slot.inode)
            .ok_or(FsError::NotFound)
    }

    /// Get the inode at `addr` for modification.
    pub fn get_mut(&mut self, addr: InodeAddr) -> Result<&mut INode, FsError> {
        self.slots
            .get_mut(&addr)
            .map(|slot| &mut slot.inode)
            .ok_or(FsError::NotFound)
    }

    /// Reference counts of the inode at `addr`, if it is alive.
    #[must_use]
    pub fn refs(&self, addr: InodeAddr) -> Option<Refs> {
        self.slots.get(&addr).map(|slot| slot.refs)
    }

    /// Whether `addr` names a live inode.
    #[must_use]
    pub fn contains(&self, addr: InodeAddr) -> bool {
        self.slots.contains_key(&addr)
    }

    #[cfg(test)]
    pub(crate) fn set_next_addr(&mut self, addr: InodeAddr) {
        self.next_addr = addr;
    }

    /// Number of live inodes, the root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always `false`: the root cannot be removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record `n` more kernel references to `addr`. Returns the new lookup count.
    pub fn retain(&mut self, addr: InodeAddr, n: u64) -> Result<u64, FsError> {
        let slot = self.slots.get_mut(&addr).ok_or(FsError::NotFound)?;
        slot.refs.lookups = slot.refs.lookups.saturating_add(n);
        Ok(slot.refs.lookups)
    }

    /// Drop `n` kernel references to `addr`, reclaiming the inode if nothing else holds it.
    ///
    /// Unknown addresses are ignored, and the count saturates at zero. Returns the reclaimed
    /// inode, if any.
    pub fn release(&mut self, addr: InodeAddr, n: u64) -> Option<INode> {
        let slot = self.slots.get_mut(&addr)?;
        slot.refs.lookups = slot.refs.lookups.saturating_sub(n);
        self.reclaim_check(addr)
    }

    /// Record a new directory entry naming `addr`.
    pub fn link(&mut self, addr: InodeAddr) -> Result<(), FsError> {
        let slot = self.slots.get_mut(&addr).ok_or(FsError::NotFound)?;
        slot.refs.links += 1;
        slot.inode.nlink = slot.refs.links;
        Ok(())
    }

    /// Record the removal of a directory entry naming `addr`.
    ///
    /// Returns the reclaimed inode, if that was the last reference.
    pub fn unlink(&mut self, addr: InodeAddr) -> Result<Option<INode>, FsError> {
        let slot = self.slots.get_mut(&addr).ok_or(FsError::NotFound)?;
        if slot.refs.links == 0 {
            return Err(FsError::invariant(addr, "unlink of an inode with no links"));
        }
        slot.refs.links -= 1;
        slot.inode.nlink = slot.refs.links;
        Ok(self.reclaim_check(addr))
    }

    /// Record a new open handle on `addr`.
    pub fn open_handle(&mut self, addr: InodeAddr) -> Result<(), FsError> {
        let slot = self.slots.get_mut(&addr).ok_or(FsError::NotFound)?;
        slot.refs.handles += 1;
        Ok(())
    }

    /// Record that a handle on `addr` was closed.
    ///
    /// Returns the reclaimed inode, if that was the last reference.
    pub fn close_handle(&mut self, addr: InodeAddr) -> Result<Option<INode>, FsError> {
        let slot = self.slots.get_mut(&addr).ok_or(FsError::NotFound)?;
        if slot.refs.handles == 0 {
            return Err(FsError::invariant(addr, "close of an inode with no open handles"));
        }
        slot.refs.handles -= 1;
        Ok(self.reclaim_check(addr))
    }

    /// Destroy the inode at `addr` if no lookup, link or handle refers to it.
    ///
    /// The root is never reclaimed. Returns the destroyed record.
    pub fn reclaim_check(&mut self, addr: InodeAddr) -> Option<INode> {
        if addr == ROOT_INODE {
            return None;
        }
        if !self.slots.get(&addr)?.refs.is_unreferenced() {
            return None;
        }
        let slot = self.slots.remove(&addr)?;
        self.generations.insert(addr, slot.inode.generation + 1);
        self.recycled.push_back(addr);
        trace!(addr, generation = slot.inode.generation, "reclaimed inode");
        Some(slot.inode)
    }
}

fn blank_inode(
    addr: InodeAddr,
    generation: u64,
    itype: INodeType,
    permissions: InodePerms,
    owner: Owner,
    now: SystemTime,
) -> INode {
    INode {
        addr,
        generation,
        permissions,
        uid: owner.uid,
        gid: owner.gid,
        create_time: now,
        last_modified_at: now,
        last_accessed_at: now,
        last_changed_at: now,
        size: 0,
        nlink: 0,
        child_dirs: 0,
        itype,
    }
}
