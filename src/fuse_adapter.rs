//! Implementation of `fuser::Filesystem` over a [`crate::meta::MetaStore`]
//! and [`crate::cache::Cache`]. Ported from `g8ufs.go`'s `FileSystem`
//! (which in turn implements `bazil.org/fuse/fs`'s `Node`/`Handle`
//! interfaces), using the synchronous-`fuser`-plus-`block_on` pattern
//! `pantsbuild/pants`'s `brfs` uses, since `fuser::Filesystem` itself is
//! inherently synchronous.
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, UNIX_EPOCH};

use fuser::{FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyXattr, Request};
use tracing::warn;

use crate::cache::Cache;
use crate::error::Error;
use crate::inode::{Node, SpecialKind};
use crate::meta::MetaStore;
use crate::pipeline::Downloader;

/// Attribute cache TTL handed back to the kernel; this filesystem never
/// mutates, so there is nothing to invalidate, but fuser requires a value.
const TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE_BYTES: u32 = 4096;

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Bidirectional map between FUSE inode numbers and metadata-store paths,
/// populated lazily as the kernel walks the tree (the metadata store itself
/// is path-addressed, not inode-addressed).
struct InodeTable {
    next: u64,
    path_to_ino: HashMap<String, u64>,
    ino_to_path: HashMap<u64, String>,
}

impl InodeTable {
    fn new() -> Self {
        let mut t = Self {
            next: fuser::FUSE_ROOT_ID + 1,
            path_to_ino: HashMap::new(),
            ino_to_path: HashMap::new(),
        };
        t.path_to_ino.insert(String::new(), fuser::FUSE_ROOT_ID);
        t.ino_to_path.insert(fuser::FUSE_ROOT_ID, String::new());
        t
    }

    fn ino_for(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_ino.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.path_to_ino.insert(path.to_string(), ino);
        self.ino_to_path.insert(ino, path.to_string());
        ino
    }

    fn path_for(&self, ino: u64) -> Option<&str> {
        self.ino_to_path.get(&ino).map(String::as_str)
    }
}

/// Exposes a [`MetaStore`] as a read-only FUSE filesystem. The store
/// pointer is held behind a lock so a `SIGHUP` reload can swap it
/// atomically between requests (see [`crate::engine`]).
pub struct Adapter {
    store: RwLock<Arc<dyn MetaStore>>,
    cache: Arc<Cache>,
    downloader: Downloader,
    inodes: Mutex<InodeTable>,
    handles: Mutex<HashMap<u64, std::fs::File>>,
    next_fh: Mutex<u64>,
    runtime: tokio::runtime::Handle,
}

impl Adapter {
    pub fn new(
        store: Arc<dyn MetaStore>,
        cache: Arc<Cache>,
        downloader: Downloader,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            store: RwLock::new(store),
            cache,
            downloader,
            inodes: Mutex::new(InodeTable::new()),
            handles: Mutex::new(HashMap::new()),
            next_fh: Mutex::new(1),
            runtime,
        }
    }

    /// Atomically replace the backing store, e.g. in response to `SIGHUP`.
    pub fn swap_store(&self, store: Arc<dyn MetaStore>) {
        *self.store.write().unwrap() = store;
    }

    fn resolve(&self, path: &str) -> Result<Arc<Node>, Error> {
        let store = self.store.read().unwrap().clone();
        Ok(store.get(path)?)
    }

    fn attr_for(&self, ino: u64, node: &Node) -> FileAttr {
        let access = node.access();
        let (kind, size, rdev) = match node {
            Node::Directory(d) => (FileType::Directory, d.attr().size, 0),
            Node::File(f) => (FileType::RegularFile, f.attr().size, 0),
            Node::Symlink(s) => (FileType::Symlink, s.target.len() as u64, 0),
            Node::Special(s) => {
                let rdev = parse_rdev(&s.data).unwrap_or(0);
                let kind = match s.kind {
                    SpecialKind::BlockDevice => FileType::BlockDevice,
                    SpecialKind::CharDevice => FileType::CharDevice,
                    SpecialKind::Fifo => FileType::NamedPipe,
                    SpecialKind::Socket => FileType::Socket,
                };
                (kind, s.attr().size, rdev)
            }
        };
        FileAttr {
            ino,
            size,
            blocks: size / BLOCK_SIZE_BYTES as u64,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind,
            perm: (access.mode & 0o777) as u16,
            nlink: 1,
            uid: access.uid,
            gid: access.gid,
            rdev,
            blksize: BLOCK_SIZE_BYTES,
            flags: 0,
        }
    }
}

fn parse_rdev(data: &str) -> Option<u32> {
    let (major, minor) = data.split_once(',')?;
    let major: u32 = major.trim().parse().ok()?;
    let minor: u32 = minor.trim().parse().ok()?;
    Some((major << 8) | minor)
}

fn dirent_kind(node: &Node) -> FileType {
    match node {
        Node::Directory(_) => FileType::Directory,
        Node::File(_) => FileType::RegularFile,
        Node::Symlink(_) => FileType::Symlink,
        Node::Special(s) => match s.kind {
            SpecialKind::BlockDevice => FileType::BlockDevice,
            SpecialKind::CharDevice => FileType::CharDevice,
            SpecialKind::Fifo => FileType::NamedPipe,
            SpecialKind::Socket => FileType::Socket,
        },
    }
}

// Every handler below takes `&self`, not `&mut self`: all shared state lives
// behind the locks on `Adapter`'s fields. This lets `crate::engine` hand
// `fuser` an `Arc<Adapter>`-backed handle while keeping the same `Adapter`
// reachable elsewhere for a `SIGHUP` reload, without a `get_mut`-on-`Arc`
// dance that would silently stop working the moment the `Arc` is shared.
impl Adapter {
    pub(crate) fn do_lookup(&self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.lock().unwrap().path_for(parent).map(str::to_string) else {
            return reply.error(Error::InvalidInode(parent).to_errno());
        };
        let Some(name) = name.to_str() else {
            return reply.error(libc::EINVAL);
        };
        let path = join(&parent_path, name);
        match self.resolve(&path) {
            Ok(node) => {
                let ino = self.inodes.lock().unwrap().ino_for(&path);
                reply.entry(&TTL, &self.attr_for(ino, &node), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    pub(crate) fn do_getattr(&self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.lock().unwrap().path_for(ino).map(str::to_string) else {
            return reply.error(Error::InvalidInode(ino).to_errno());
        };
        match self.resolve(&path) {
            Ok(node) => reply.attr(&TTL, &self.attr_for(ino, &node)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    pub(crate) fn do_readlink(&self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.lock().unwrap().path_for(ino).map(str::to_string) else {
            return reply.error(Error::InvalidInode(ino).to_errno());
        };
        match self.resolve(&path) {
            Ok(node) => match node.as_ref() {
                Node::Symlink(s) => reply.data(s.target.as_bytes()),
                _ => reply.error(libc::EINVAL),
            },
            Err(e) => reply.error(e.to_errno()),
        }
    }

    pub(crate) fn do_open(&self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return reply.error(Error::ReadOnly.to_errno());
        }
        let Some(path) = self.inodes.lock().unwrap().path_for(ino).map(str::to_string) else {
            return reply.error(Error::InvalidInode(ino).to_errno());
        };
        let node = match self.resolve(&path) {
            Ok(n) => n,
            Err(e) => return reply.error(e.to_errno()),
        };
        let Node::File(file) = node.as_ref() else {
            return reply.error(libc::EINVAL);
        };
        let blocks = file.blocks.get_or_init(Vec::new).clone();
        let fingerprint = *file.fingerprint(&blocks);
        let size = file.attr().size;
        let block_size = file.block_size;

        let cache = self.cache.clone();
        let downloader = &self.downloader;
        let result = self.runtime.block_on(async {
            cache
                .check_and_get(&fingerprint, size, &blocks, block_size, downloader)
                .await
        });
        match result {
            Ok(std_file) => {
                let mut next_fh = self.next_fh.lock().unwrap();
                let fh = *next_fh;
                *next_fh += 1;
                self.handles.lock().unwrap().insert(fh, std_file);
                reply.opened(fh, 0);
            }
            Err(e) => {
                warn!(path, error = %e, "failed to materialize file into cache");
                reply.error(Error::from(e).to_errno());
            }
        }
    }

    pub(crate) fn do_read(
        &self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        use std::io::{Read, Seek, SeekFrom};
        let mut handles = self.handles.lock().unwrap();
        let Some(file) = handles.get_mut(&fh) else {
            return reply.error(libc::EBADF);
        };
        if let Err(e) = file.seek(SeekFrom::Start(offset as u64)) {
            return reply.error(e.raw_os_error().unwrap_or(libc::EIO));
        }
        let mut buf = vec![0u8; size as usize];
        let mut total = 0;
        loop {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => return reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
            }
        }
        reply.data(&buf[..total]);
    }

    pub(crate) fn do_release(
        &self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.lock().unwrap().remove(&fh);
        reply.ok();
    }

    pub(crate) fn do_opendir(&self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    pub(crate) fn do_readdir(
        &self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.lock().unwrap().path_for(ino).map(str::to_string) else {
            return reply.error(Error::InvalidInode(ino).to_errno());
        };
        let store = self.store.read().unwrap().clone();
        let children = match store.children(&path) {
            Ok(c) => c,
            Err(e) => return reply.error(Error::from(e).to_errno()),
        };
        for (i, child) in children.iter().enumerate().skip(offset as usize) {
            let child_path = join(&path, child.name());
            let ino = self.inodes.lock().unwrap().ino_for(&child_path);
            if reply.add(ino, (i + 1) as i64, dirent_kind(child), child.name()) {
                break;
            }
        }
        reply.ok();
    }

    pub(crate) fn do_access(&self, _req: &Request<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    pub(crate) fn do_statfs(&self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, BLOCK_SIZE_BYTES, 255, BLOCK_SIZE_BYTES);
    }

    pub(crate) fn do_getxattr(
        &self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(Error::Unsupported.to_errno());
    }

    pub(crate) fn do_listxattr(&self, _req: &Request<'_>, _ino: u64, _size: u32, reply: ReplyXattr) {
        reply.error(Error::Unsupported.to_errno());
    }
}

impl Filesystem for Adapter {
    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.do_lookup(req, parent, name, reply)
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        self.do_getattr(req, ino, reply)
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        self.do_readlink(req, ino, reply)
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.do_open(req, ino, flags, reply)
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.do_read(req, ino, fh, offset, size, flags, lock_owner, reply)
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
        reply: ReplyEmpty,
    ) {
        self.do_release(req, ino, fh, flags, lock_owner, flush, reply)
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.do_opendir(req, ino, flags, reply)
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        self.do_readdir(req, ino, fh, offset, reply)
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        self.do_access(req, ino, mask, reply)
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        self.do_statfs(req, ino, reply)
    }

    fn getxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        self.do_getxattr(req, ino, name, size, reply)
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        self.do_listxattr(req, ino, size, reply)
    }
}
