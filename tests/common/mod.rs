#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::ffi::{OsStr, OsString};

use null_fs::fs::{
    Created, Entry, FsOptions, InodeAddr, InodePerms, NullFs, OpenFlags, Owner, ROOT_INODE,
};

pub const OWNER: Owner = Owner {
    uid: 1000,
    gid: 100,
};

/// A fresh filesystem with a `0o755` root owned by [`OWNER`].
pub fn new_fs() -> NullFs {
    NullFs::new(FsOptions {
        root_perms: InodePerms::default(),
        root_owner: OWNER,
    })
}

pub fn wronly() -> OpenFlags {
    OpenFlags::from(libc::O_WRONLY)
}

/// `create` with a typical `0o644` mode and `0o022` umask.
pub fn create_file(fs: &NullFs, parent: InodeAddr, name: &str) -> Created {
    fs.create(parent, OsStr::new(name), 0o100_644, 0o022, OWNER, wronly())
        .unwrap()
}

/// `mkdir` with a typical `0o755` mode and `0o022` umask.
pub fn make_dir(fs: &NullFs, parent: InodeAddr, name: &str) -> Entry {
    fs.mkdir(parent, OsStr::new(name), 0o040_755, 0o022, OWNER)
        .unwrap()
}

/// Create a file and drop every reference except its directory entry.
pub fn touch(fs: &NullFs, parent: InodeAddr, name: &str) -> InodeAddr {
    let created = create_file(fs, parent, name);
    fs.release(created.fh).unwrap();
    fs.forget(created.entry.attr.ino, 1);
    created.entry.attr.ino
}

/// Every entry name of `dir`, read in a single pass.
pub fn list(fs: &NullFs, dir: InodeAddr) -> Vec<OsString> {
    let mut names = Vec::new();
    fs.readdir(dir, 0, |entry, _| {
        names.push(entry.name.to_os_string());
        false
    })
    .unwrap();
    names
}

/// Read one page of at most `page` entries starting after `cursor`.
///
/// Returns the names and the cursor to resume from, mimicking a kernel buffer that fills up.
pub fn read_page(fs: &NullFs, dir: InodeAddr, cursor: u64, page: usize) -> (Vec<String>, u64) {
    let mut names = Vec::new();
    let mut next_cursor = cursor;
    fs.readdir(dir, cursor, |entry, next| {
        if names.len() == page {
            return true;
        }
        names.push(entry.name.to_string_lossy().into_owned());
        next_cursor = next;
        false
    })
    .unwrap();
    (names, next_cursor)
}

/// Every entry name of `dir`, read `page` entries at a time.
pub fn list_paged(fs: &NullFs, dir: InodeAddr, page: usize) -> Vec<String> {
    let mut all = Vec::new();
    let mut cursor = 0;
    loop {
        let (names, next) = read_page(fs, dir, cursor, page);
        if names.is_empty() {
            return all;
        }
        all.extend(names);
        cursor = next;
    }
}

/// Whether the filesystem is back to its freshly mounted state.
pub fn is_pristine(fs: &NullFs) -> bool {
    fs.inode_count() == 1 && fs.handle_count() == 0 && list(fs, ROOT_INODE).is_empty()
}
