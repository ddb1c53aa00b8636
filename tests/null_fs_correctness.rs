#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use null_fs::fs::{FsError, INodeType, OpenFlags, ROOT_INODE, SetAttr, TimeSpec};

use common::{OWNER, create_file, list, make_dir, new_fs, touch, wronly};

#[test]
fn root_is_an_empty_directory() {
    let fs = new_fs();
    let attr = fs.getattr(ROOT_INODE).unwrap();
    assert_eq!(attr.kind, INodeType::Directory);
    assert_eq!(attr.perm, 0o755);
    assert_eq!(attr.nlink, 2);
    assert_eq!((attr.uid, attr.gid), (OWNER.uid, OWNER.gid));
    assert!(list(&fs, ROOT_INODE).is_empty());
}

#[test]
fn lookup_missing_is_not_found() {
    let fs = new_fs();
    assert_eq!(
        fs.lookup(ROOT_INODE, OsStr::new("missing")),
        Err(FsError::NotFound)
    );
}

#[test]
fn create_twice_is_already_exists() {
    let fs = new_fs();
    create_file(&fs, ROOT_INODE, "x");
    let err = fs
        .create(ROOT_INODE, OsStr::new("x"), 0o644, 0, OWNER, wronly())
        .unwrap_err();
    assert_eq!(err, FsError::AlreadyExists);
    assert_eq!(fs.inode_count(), 2, "failed create must not allocate");
    assert_eq!(fs.handle_count(), 1, "failed create must not open a handle");
}

#[test]
fn mkdir_over_existing_file_is_already_exists() {
    let fs = new_fs();
    touch(&fs, ROOT_INODE, "x");
    let err = fs
        .mkdir(ROOT_INODE, OsStr::new("x"), 0o755, 0, OWNER)
        .unwrap_err();
    assert_eq!(err, FsError::AlreadyExists);
}

#[test]
fn create_applies_umask_and_owner() {
    let fs = new_fs();
    let created = create_file(&fs, ROOT_INODE, "f");
    let attr = created.entry.attr;
    assert_eq!(attr.kind, INodeType::File);
    assert_eq!(attr.perm, 0o644);
    assert_eq!(attr.size, 0);
    assert_eq!(attr.nlink, 1);
    assert_eq!(attr.blocks, 0);
    assert_eq!((attr.uid, attr.gid), (OWNER.uid, OWNER.gid));
    assert_eq!(created.entry.generation, 0);
}

#[test]
fn create_takes_a_lookup_and_a_handle() {
    let fs = new_fs();
    let created = create_file(&fs, ROOT_INODE, "f");
    let refs = fs.refs(created.entry.attr.ino).unwrap();
    assert_eq!(refs.lookups, 1);
    assert_eq!(refs.links, 1);
    assert_eq!(refs.handles, 1);
}

#[test]
fn lookup_returns_the_created_inode_and_retains_it() {
    let fs = new_fs();
    let created = create_file(&fs, ROOT_INODE, "f");
    let ino = created.entry.attr.ino;

    let found = fs.lookup(ROOT_INODE, OsStr::new("f")).unwrap();
    assert_eq!(found.attr.ino, ino);
    assert_eq!(found.generation, created.entry.generation);
    assert_eq!(fs.refs(ino).unwrap().lookups, 2);
}

#[test]
fn readdir_does_not_retain() {
    let fs = new_fs();
    let ino = touch(&fs, ROOT_INODE, "f");
    assert_eq!(fs.refs(ino).unwrap().lookups, 0);
    assert_eq!(list(&fs, ROOT_INODE), vec!["f"]);
    assert_eq!(fs.refs(ino).unwrap().lookups, 0);
}

#[test]
fn mkdir_updates_parent_link_count() {
    let fs = new_fs();
    let dir = make_dir(&fs, ROOT_INODE, "d");
    assert_eq!(dir.attr.kind, INodeType::Directory);
    assert_eq!(dir.attr.nlink, 2);
    assert_eq!(dir.attr.perm, 0o755);
    assert_eq!(fs.refs(dir.attr.ino).unwrap().links, 1);
    assert_eq!(fs.getattr(ROOT_INODE).unwrap().nlink, 3);

    make_dir(&fs, dir.attr.ino, "sub");
    create_file(&fs, dir.attr.ino, "file");
    assert_eq!(fs.getattr(dir.attr.ino).unwrap().nlink, 3);
}

#[test]
fn entries_under_a_file_are_not_a_directory() {
    let fs = new_fs();
    let file = touch(&fs, ROOT_INODE, "f");
    assert_eq!(
        fs.lookup(file, OsStr::new("x")),
        Err(FsError::NotADirectory)
    );
    assert_eq!(
        fs.create(file, OsStr::new("x"), 0o644, 0, OWNER, wronly())
            .unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(
        fs.mkdir(file, OsStr::new("x"), 0o755, 0, OWNER).unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(fs.opendir(file), Err(FsError::NotADirectory));
}

#[test]
fn operations_on_missing_inodes_are_not_found() {
    let fs = new_fs();
    assert_eq!(fs.getattr(99), Err(FsError::NotFound));
    assert_eq!(fs.lookup(99, OsStr::new("x")), Err(FsError::NotFound));
    assert_eq!(fs.open(99, wronly()), Err(FsError::NotFound));
    assert_eq!(fs.opendir(99), Err(FsError::NotFound));
    assert_eq!(
        fs.create(99, OsStr::new("x"), 0o644, 0, OWNER, wronly())
            .unwrap_err(),
        FsError::NotFound
    );
    assert_eq!(
        fs.setattr(99, SetAttr::default()).unwrap_err(),
        FsError::NotFound
    );
    assert_eq!(fs.readdir(99, 0, |_, _| false), Err(FsError::NotFound));
}

#[test]
fn invalid_names_are_rejected() {
    let fs = new_fs();
    for name in ["", ".", "..", "a/b"] {
        assert_eq!(
            fs.create(ROOT_INODE, OsStr::new(name), 0o644, 0, OWNER, wronly())
                .unwrap_err(),
            FsError::InvalidName,
            "{name:?}"
        );
    }
    let long = "n".repeat(256);
    assert_eq!(
        fs.mkdir(ROOT_INODE, OsStr::new(&long), 0o755, 0, OWNER)
            .unwrap_err(),
        FsError::NameTooLong
    );
    assert!(list(&fs, ROOT_INODE).is_empty());
    assert_eq!(fs.inode_count(), 1);
}

#[test]
fn open_requires_write_only_access() {
    let fs = new_fs();
    let ino = touch(&fs, ROOT_INODE, "f");
    for flags in [libc::O_RDONLY, libc::O_RDWR, libc::O_RDONLY | libc::O_APPEND] {
        assert_eq!(
            fs.open(ino, OpenFlags::from(flags)),
            Err(FsError::PermissionDenied),
            "{flags:#o}"
        );
    }
    assert_eq!(fs.handle_count(), 0);

    let fh = fs.open(ino, wronly()).unwrap();
    assert_eq!(fs.refs(ino).unwrap().handles, 1);
    fs.release(fh).unwrap();
    assert_eq!(fs.refs(ino).unwrap().handles, 0);
}

#[test]
fn opening_a_directory_is_is_a_directory() {
    let fs = new_fs();
    assert_eq!(fs.open(ROOT_INODE, wronly()), Err(FsError::IsADirectory));
}

#[test]
fn open_with_trunc_resets_size() {
    let fs = new_fs();
    let created = create_file(&fs, ROOT_INODE, "f");
    let ino = created.entry.attr.ino;
    fs.write(created.fh, 0, 4096).unwrap();

    let fh = fs.open(ino, wronly()).unwrap();
    assert_eq!(fs.getattr(ino).unwrap().size, 4096);
    fs.release(fh).unwrap();

    let fh = fs
        .open(ino, OpenFlags::from(libc::O_WRONLY | libc::O_TRUNC))
        .unwrap();
    assert_eq!(fs.getattr(ino).unwrap().size, 0);
    fs.release(fh).unwrap();
}

#[test]
fn setattr_resizes_files_only() {
    let fs = new_fs();
    let ino = touch(&fs, ROOT_INODE, "f");
    let attr = fs
        .setattr(
            ino,
            SetAttr {
                size: Some(1 << 20),
                ..SetAttr::default()
            },
        )
        .unwrap();
    assert_eq!(attr.size, 1 << 20);

    let dir = make_dir(&fs, ROOT_INODE, "d").attr.ino;
    assert_eq!(
        fs.setattr(
            dir,
            SetAttr {
                size: Some(0),
                ..SetAttr::default()
            }
        ),
        Err(FsError::IsADirectory)
    );
}

#[test]
fn setattr_updates_mode_and_owner() {
    let fs = new_fs();
    let ino = touch(&fs, ROOT_INODE, "f");
    let attr = fs
        .setattr(
            ino,
            SetAttr {
                mode: Some(0o100_600),
                uid: Some(0),
                gid: Some(0),
                ..SetAttr::default()
            },
        )
        .unwrap();
    assert_eq!(attr.perm, 0o600);
    assert_eq!((attr.uid, attr.gid), (0, 0));
    assert_eq!(fs.getattr(ino).unwrap(), attr);
}

#[test]
fn setattr_stores_explicit_times() {
    let fs = new_fs();
    let ino = touch(&fs, ROOT_INODE, "f");
    let at = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);
    let before = fs.getattr(ino).unwrap();
    let attr = fs
        .setattr(
            ino,
            SetAttr {
                atime: Some(TimeSpec::At(at)),
                mtime: Some(TimeSpec::At(at)),
                ..SetAttr::default()
            },
        )
        .unwrap();
    assert_eq!(attr.atime, at);
    assert_eq!(attr.mtime, at);
    assert!(attr.ctime >= before.ctime);

    let attr = fs
        .setattr(
            ino,
            SetAttr {
                mtime: Some(TimeSpec::Now),
                ..SetAttr::default()
            },
        )
        .unwrap();
    assert!(attr.mtime > at);
}

#[test]
fn flush_acknowledges_open_handles_only() {
    let fs = new_fs();
    let created = create_file(&fs, ROOT_INODE, "f");
    assert_eq!(fs.flush(created.fh), Ok(()));
    fs.release(created.fh).unwrap();
    assert_eq!(fs.flush(created.fh), Err(FsError::InvalidHandle(created.fh)));
}

#[test]
fn release_twice_is_invalid_handle() {
    let fs = new_fs();
    let created = create_file(&fs, ROOT_INODE, "f");
    fs.release(created.fh).unwrap();
    assert_eq!(fs.release(created.fh), Err(FsError::InvalidHandle(created.fh)));
}

#[test]
fn handle_kinds_are_not_interchangeable() {
    let fs = new_fs();
    let created = create_file(&fs, ROOT_INODE, "f");
    let dh = fs.opendir(ROOT_INODE).unwrap();
    assert_eq!(fs.release(dh), Err(FsError::InvalidHandle(dh)));
    assert_eq!(
        fs.releasedir(created.fh),
        Err(FsError::InvalidHandle(created.fh))
    );
    fs.releasedir(dh).unwrap();
    fs.release(created.fh).unwrap();
    assert_eq!(fs.handle_count(), 0);
}

#[test]
fn handle_ids_are_never_reused() {
    let fs = new_fs();
    let a = create_file(&fs, ROOT_INODE, "a").fh;
    fs.release(a).unwrap();
    let b = fs.opendir(ROOT_INODE).unwrap();
    assert!(b > a);
    fs.releasedir(b).unwrap();
    let ino = fs.lookup(ROOT_INODE, OsStr::new("a")).unwrap().attr.ino;
    let c = fs.open(ino, wronly()).unwrap();
    assert!(c > b);
}

#[test]
fn getxattr_reports_no_attribute() {
    let fs = new_fs();
    assert_eq!(
        fs.getxattr(ROOT_INODE, OsStr::new("user.test")),
        Err(FsError::NoAttribute)
    );
    assert_eq!(
        fs.getxattr(42, OsStr::new("user.test")),
        Err(FsError::NotFound)
    );
}

#[test]
fn statfs_counts_inodes() {
    let fs = new_fs();
    let before = fs.statfs();
    touch(&fs, ROOT_INODE, "a");
    make_dir(&fs, ROOT_INODE, "b");
    let after = fs.statfs();
    assert_eq!(after.total_inodes, before.total_inodes);
    assert_eq!(after.free_inodes, before.free_inodes - 2);
    assert!(after.available_blocks > 0);
    assert_eq!(after.max_filename_length, 255);
}

#[test]
fn forget_of_root_or_unknown_inode_is_harmless() {
    let fs = new_fs();
    fs.forget(ROOT_INODE, 10);
    fs.forget(12_345, 1);
    assert!(fs.getattr(ROOT_INODE).is_ok());
    assert_eq!(fs.refs(ROOT_INODE).unwrap().lookups, 0);
}

#[test]
fn scenario_file_lifecycle_inside_a_directory() {
    let fs = new_fs();

    let x = make_dir(&fs, ROOT_INODE, "d").attr.ino;
    assert_eq!(fs.refs(x).unwrap().links, 1);

    let created = create_file(&fs, x, "f");
    let f = created.entry.attr.ino;
    assert_eq!(fs.write(created.fh, 0, 4096), Ok(4096));
    assert_eq!(fs.getattr(f).unwrap().size, 4096);

    fs.unlink(x, OsStr::new("f")).unwrap();
    assert_eq!(fs.lookup(x, OsStr::new("f")), Err(FsError::NotFound));
    let attr = fs.getattr(f).expect("open file survives its unlink");
    assert_eq!(attr.nlink, 0);
    assert_eq!(attr.size, 4096);

    fs.release(created.fh).unwrap();
    assert!(fs.getattr(f).is_ok(), "kernel still holds a lookup");
    fs.forget(f, 1);
    assert_eq!(fs.getattr(f), Err(FsError::NotFound));

    fs.rmdir(ROOT_INODE, OsStr::new("d")).unwrap();
    assert_eq!(fs.getattr(x).unwrap().nlink, 0);
    fs.forget(x, 1);
    assert_eq!(fs.getattr(x), Err(FsError::NotFound));

    assert!(common::is_pristine(&fs));
}
