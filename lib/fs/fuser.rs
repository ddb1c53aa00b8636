//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`NullFs`].

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument};

use super::null_fs::{NullFs, SetAttr, TimeSpec};
use super::{FileAttr, FsError, INodeType, OpenFlags, Owner};

/// Trait abstracting the `.error(errno)` method common to all fuser reply types.
trait FuseReply {
    fn error(self, errno: i32);
}

macro_rules! impl_fuse_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl FuseReply for $ty {
            fn error(self, errno: i32) {
                // Calls the inherent fuser method (not this trait method).
                self.error(errno);
            }
        })*
    };
}

// ReplyStatfs is excluded: statfs cannot fail.
impl_fuse_reply!(
    fuser::ReplyEntry,
    fuser::ReplyAttr,
    fuser::ReplyDirectory,
    fuser::ReplyOpen,
    fuser::ReplyCreate,
    fuser::ReplyWrite,
    fuser::ReplyEmpty,
    fuser::ReplyXattr,
);

/// Extension trait on `Result<T, FsError>` for FUSE reply handling.
///
/// Centralizes the error-logging + errno-reply path so each FUSE callback
/// only has to express its success path.
trait FuseResultExt<T> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R));
}

impl<T> FuseResultExt<T> for Result<T, FsError> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R)) {
        match self {
            Ok(val) => on_ok(val, reply),
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
            }
        }
    }
}

impl From<INodeType> for fuser::FileType {
    fn from(itype: INodeType) -> Self {
        match itype {
            INodeType::File => Self::RegularFile,
            INodeType::Directory => Self::Directory,
        }
    }
}

impl From<FileAttr> for fuser::FileAttr {
    fn from(attr: FileAttr) -> Self {
        Self {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.crtime,
            kind: attr.kind.into(),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: attr.blksize,
            flags: 0,
        }
    }
}

impl From<fuser::TimeOrNow> for TimeSpec {
    fn from(t: fuser::TimeOrNow) -> Self {
        match t {
            fuser::TimeOrNow::Now => Self::Now,
            fuser::TimeOrNow::SpecificTime(at) => Self::At(at),
        }
    }
}

fn owner_of(req: &fuser::Request<'_>) -> Owner {
    Owner {
        uid: req.uid(),
        gid: req.gid(),
    }
}

/// Bridges a shared [`NullFs`] to the [`fuser::Filesystem`] trait.
///
/// The adapter holds no state of its own beyond the attribute TTL, so any number of adapters
/// may drive the same filesystem.
pub struct FuserAdapter {
    fs: Arc<NullFs>,
    ttl: Duration,
}

impl FuserAdapter {
    /// Create an adapter serving `fs`, letting the kernel cache entries and attributes for `ttl`.
    #[must_use]
    pub fn new(fs: Arc<NullFs>, ttl: Duration) -> Self {
        Self { fs, ttl }
    }
}

impl fuser::Filesystem for FuserAdapter {
    #[instrument(name = "FuserAdapter::destroy", skip(self))]
    fn destroy(&mut self) {
        debug!(
            inodes = self.fs.inode_count(),
            handles = self.fs.handle_count(),
            "session ending"
        );
    }

    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        self.fs.lookup(parent, name).fuse_reply(reply, |entry, reply| {
            let f_attr = fuser::FileAttr::from(entry.attr);
            debug!(?f_attr, generation = entry.generation, "replying...");
            reply.entry(&self.ttl, &f_attr, entry.generation);
        });
    }

    #[instrument(name = "FuserAdapter::forget", skip(self, _req))]
    fn forget(&mut self, _req: &fuser::Request<'_>, ino: u64, nlookup: u64) {
        self.fs.forget(ino, nlookup);
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        self.fs.getattr(ino).fuse_reply(reply, |attr, reply| {
            let attr = fuser::FileAttr::from(attr);
            debug!(?attr, "replying...");
            reply.attr(&self.ttl, &attr);
        });
    }

    #[instrument(
        name = "FuserAdapter::setattr",
        skip(self, _req, _ctime, _fh, _crtime, _chgtime, _bkuptime, _flags, reply)
    )]
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let changes = SetAttr {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(TimeSpec::from),
            mtime: mtime.map(TimeSpec::from),
        };
        self.fs.setattr(ino, changes).fuse_reply(reply, |attr, reply| {
            let attr = fuser::FileAttr::from(attr);
            debug!(?attr, "replying...");
            reply.attr(&self.ttl, &attr);
        });
    }

    #[instrument(name = "FuserAdapter::mkdir", skip(self, req, reply))]
    fn mkdir(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        self.fs
            .mkdir(parent, name, mode, umask, owner_of(req))
            .fuse_reply(reply, |entry, reply| {
                let f_attr = fuser::FileAttr::from(entry.attr);
                debug!(?f_attr, generation = entry.generation, "replying...");
                reply.entry(&self.ttl, &f_attr, entry.generation);
            });
    }

    #[instrument(name = "FuserAdapter::unlink", skip(self, _req, reply))]
    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.unlink(parent, name).fuse_reply(reply, |(), reply| {
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::rmdir", skip(self, _req, reply))]
    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.rmdir(parent, name).fuse_reply(reply, |(), reply| {
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        self.fs
            .open(ino, OpenFlags::from(flags))
            .fuse_reply(reply, |fh, reply| {
                debug!(handle = fh, "replying...");
                reply.opened(fh, 0);
            });
    }

    #[instrument(
        name = "FuserAdapter::write",
        skip(self, _req, _ino, data, _write_flags, _flags, _lock_owner, reply),
        fields(len = data.len())
    )]
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            debug!(offset, "negative offset, replying error");
            reply.error(libc::EINVAL);
            return;
        };
        let Ok(len) = u32::try_from(data.len()) else {
            error!(len = data.len(), "write larger than the protocol allows");
            reply.error(libc::EINVAL);
            return;
        };
        self.fs
            .write(fh, offset, len)
            .fuse_reply(reply, |written, reply| {
                debug!(written, "replying...");
                reply.written(written);
            });
    }

    #[instrument(name = "FuserAdapter::flush", skip(self, _req, _ino, _lock_owner, reply))]
    fn flush(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.flush(fh).fuse_reply(reply, |(), reply| {
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.release(fh).fuse_reply(reply, |(), reply| {
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::opendir", skip(self, _req, _flags, reply))]
    fn opendir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        self.fs.opendir(ino).fuse_reply(reply, |fh, reply| {
            debug!(handle = fh, "replying...");
            reply.opened(fh, 0);
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let Ok(cursor) = u64::try_from(offset) else {
            debug!(offset, "negative offset, replying error");
            reply.error(libc::EINVAL);
            return;
        };

        let result = self.fs.readdir(ino, cursor, |entry, next| {
            let Ok(next) = i64::try_from(next) else {
                error!(next, "directory cursor too large for fuser");
                return true;
            };
            debug!(name = ?entry.name, ino = entry.addr, "adding entry to reply...");
            let full = reply.add(entry.addr, next, entry.itype.into(), entry.name);
            if full {
                debug!("buffer full for now, stopping readdir");
            }
            full
        });

        match result {
            Ok(()) => {
                debug!("finalizing reply...");
                reply.ok();
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
            }
        }
    }

    #[instrument(name = "FuserAdapter::releasedir", skip(self, _req, _ino, _flags, reply))]
    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.releasedir(fh).fuse_reply(reply, |(), reply| {
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.fs.statfs();
        debug!(?stats, "replying...");
        reply.statfs(
            stats.total_blocks,
            stats.free_blocks,
            stats.available_blocks,
            stats.total_inodes,
            stats.free_inodes,
            stats.block_size,
            stats.max_filename_length,
            stats.block_size,
        );
    }

    #[instrument(name = "FuserAdapter::getxattr", skip(self, _req, _size, reply))]
    fn getxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        name: &OsStr,
        _size: u32,
        reply: fuser::ReplyXattr,
    ) {
        self.fs.getxattr(ino, name).fuse_reply(reply, |value, reply| {
            debug!(len = value.len(), "replying...");
            reply.data(&value);
        });
    }

    #[instrument(name = "FuserAdapter::create", skip(self, req, reply))]
    fn create(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        self.fs
            .create(parent, name, mode, umask, owner_of(req), OpenFlags::from(flags))
            .fuse_reply(reply, |created, reply| {
                let f_attr = fuser::FileAttr::from(created.entry.attr);
                debug!(?f_attr, handle = created.fh, "replying...");
                reply.created(
                    &self.ttl,
                    &f_attr,
                    created.entry.generation,
                    created.fh,
                    0,
                );
            });
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn attributes_convert_field_for_field() {
        let now = SystemTime::now();
        let attr = FileAttr {
            ino: 9,
            size: 4096,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: INodeType::Directory,
            perm: 0o750,
            nlink: 3,
            uid: 1,
            gid: 2,
            blksize: 4096,
        };
        let f_attr = fuser::FileAttr::from(attr);
        assert_eq!(f_attr.ino, 9);
        assert_eq!(f_attr.size, 4096);
        assert_eq!(f_attr.kind, fuser::FileType::Directory);
        assert_eq!(f_attr.perm, 0o750);
        assert_eq!(f_attr.nlink, 3);
        assert_eq!((f_attr.uid, f_attr.gid), (1, 2));
        assert_eq!(f_attr.rdev, 0);
    }

    #[test]
    fn time_or_now_converts() {
        let at = SystemTime::UNIX_EPOCH;
        assert_eq!(TimeSpec::from(fuser::TimeOrNow::Now), TimeSpec::Now);
        assert_eq!(
            TimeSpec::from(fuser::TimeOrNow::SpecificTime(at)),
            TimeSpec::At(at)
        );
    }
}
