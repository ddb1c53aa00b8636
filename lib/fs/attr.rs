use std::time::SystemTime;

use super::{INode, INodeType, InodeAddr};

/// Block size reported for every inode.
pub const BLOCK_SIZE: u32 = 4096;

/// POSIX-style attributes of a single inode, as handed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    /// Inode address.
    pub ino: InodeAddr,
    /// Logical size in bytes.
    pub size: u64,
    /// Allocated 512-byte blocks. Always 0: nothing is stored.
    pub blocks: u64,
    /// Last access.
    pub atime: SystemTime,
    /// Last modification.
    pub mtime: SystemTime,
    /// Last metadata change.
    pub ctime: SystemTime,
    /// Creation.
    pub crtime: SystemTime,
    /// File or directory.
    pub kind: INodeType,
    /// Permission bits.
    pub perm: u16,
    /// Reported hard link count.
    pub nlink: u32,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Preferred I/O block size.
    pub blksize: u32,
}

/// Derive the attribute record of `inode`.
///
/// Directories report `2 + child directories` links while they are linked into the tree and 0
/// once removed; files report their link count.
#[must_use]
pub fn compute_attributes(inode: &INode) -> FileAttr {
    let nlink = match inode.itype {
        INodeType::File => inode.nlink,
        INodeType::Directory if inode.nlink == 0 => 0,
        INodeType::Directory => inode.child_dirs.saturating_add(2),
    };
    FileAttr {
        ino: inode.addr,
        size: inode.size,
        blocks: 0,
        atime: inode.last_accessed_at,
        mtime: inode.last_modified_at,
        ctime: inode.last_changed_at,
        crtime: inode.create_time,
        kind: inode.itype,
        perm: inode.permissions.bits(),
        nlink,
        uid: inode.uid,
        gid: inode.gid,
        blksize: BLOCK_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fs::InodePerms;

    fn inode(itype: INodeType) -> INode {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        INode {
            addr: 7,
            generation: 3,
            permissions: InodePerms::from_mode(0o644, 0o022),
            uid: 1000,
            gid: 100,
            create_time: t0,
            last_modified_at: t0 + Duration::from_secs(2),
            last_accessed_at: t0 + Duration::from_secs(1),
            last_changed_at: t0 + Duration::from_secs(3),
            size: 12_345,
            nlink: 1,
            child_dirs: 0,
            itype,
        }
    }

    #[test]
    fn file_attributes_mirror_the_record() {
        let node = inode(INodeType::File);
        let attr = compute_attributes(&node);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.size, 12_345);
        assert_eq!(attr.blocks, 0);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.nlink, 1);
        assert_eq!((attr.uid, attr.gid), (1000, 100));
        assert_eq!(attr.blksize, BLOCK_SIZE);
        assert_eq!(attr.atime, node.last_accessed_at);
        assert_eq!(attr.mtime, node.last_modified_at);
        assert_eq!(attr.ctime, node.last_changed_at);
        assert_eq!(attr.crtime, node.create_time);
    }

    #[test]
    fn unlinked_file_reports_zero_links() {
        let mut node = inode(INodeType::File);
        node.nlink = 0;
        assert_eq!(compute_attributes(&node).nlink, 0);
    }

    #[test]
    fn directory_links_count_subdirectories() {
        let mut node = inode(INodeType::Directory);
        assert_eq!(compute_attributes(&node).nlink, 2);
        node.child_dirs = 3;
        assert_eq!(compute_attributes(&node).nlink, 5);
        node.nlink = 0;
        assert_eq!(compute_attributes(&node).nlink, 0);
    }
}
