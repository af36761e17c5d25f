//! Mount lifecycle: lays out the backend working directories, mounts the
//! read-only FUSE tree, optionally composes a writable overlay on top, and
//! tears everything down again. Ported from `g8ufs.go`'s `Mount`/`Unmount`/
//! `Wait`/`watch`.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use inotify::{Inotify, WatchMask};
use nix::mount::{mount as nix_mount, umount2, MntFlags, MsFlags};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::error::Error;
use crate::fuse_adapter::Adapter;
use crate::meta::{LayeredStore, MetaStore, SqliteStore};
use crate::pipeline::Downloader;
use crate::router::Router;

const MOUNTPOINT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MOUNTPOINT_POLL_ATTEMPTS: usize = 5;

/// Mount options, mirroring `g8ufs.go`'s `Options` plus the knobs a
/// standalone binary needs (worker count, debug logging, a local router
/// overlay).
#[derive(Parser, Debug, Clone)]
pub struct Options {
    /// Working directory where the filesystem keeps its overlay layers and
    /// cache; created if missing.
    #[clap(long)]
    pub backend: PathBuf,
    /// Cache directory for downloaded blocks. Defaults to `<backend>/ca`.
    #[clap(long)]
    pub cache: Option<PathBuf>,
    /// Wipe the backend directory before mounting.
    #[clap(long)]
    pub reset: bool,
    /// Mount read-only: skip overlay composition, mount the FUSE tree
    /// directly at the target.
    #[clap(long)]
    pub read_only: bool,
    /// Number of concurrent block-download workers per file.
    #[clap(long, default_value_t = 4)]
    pub readers: usize,
    /// Path to a router.yaml merged ahead of the metadata's own router,
    /// with pools renamed `{index}.{name}`.
    #[clap(long)]
    pub local_router: Option<PathBuf>,
    #[clap(long)]
    pub debug: bool,
}

impl Options {
    fn cache_dir(&self) -> PathBuf {
        self.cache.clone().unwrap_or_else(|| self.backend.join("ca"))
    }

    fn ro_dir(&self, target: &Path) -> PathBuf {
        if self.read_only {
            target.to_path_buf()
        } else {
            self.backend.join("ro")
        }
    }
}

/// A mounted filesystem: owns the FUSE session and any overlay layer, and
/// can be reloaded (new metadata layers stacked on top) or torn down.
pub struct G8ufs {
    backend: PathBuf,
    layers: Mutex<Vec<PathBuf>>,
    overlay_mounted: AtomicBool,
    session: Mutex<Option<fuser::BackgroundSession>>,
    adapter: Arc<Adapter>,
    base_layers: Mutex<Vec<Arc<dyn MetaStore>>>,
    unmounted: Arc<Notify>,
}

impl G8ufs {
    /// Mount `target`, using `meta` as the initial (bottom) metadata layer
    /// and `router` to resolve block content.
    pub async fn mount(
        meta: Arc<dyn MetaStore>,
        router: Arc<Router>,
        target: &Path,
        options: Options,
        runtime: tokio::runtime::Handle,
    ) -> Result<Arc<Self>, Error> {
        if options.reset {
            let _ = std::fs::remove_dir_all(&options.backend);
        }

        let ca = options.cache_dir();
        std::fs::create_dir_all(&ca).map_err(Error::Io)?;

        let ro = options.ro_dir(target);
        std::fs::create_dir_all(&ro).map_err(Error::Io)?;

        let cache = Arc::new(Cache::new(ca));
        let downloader = Downloader::new(router).with_workers(options.readers);
        let adapter = Arc::new(Adapter::new(meta.clone(), cache, downloader, runtime));

        let mount_options = [
            fuser::MountOption::RO,
            fuser::MountOption::Async,
            fuser::MountOption::AllowOther,
            fuser::MountOption::FSName("g8ufs".to_string()),
        ];
        debug!(path = %ro.display(), "mounting read-only layer");
        let session = fuser::spawn_mount2(AdapterHandle(adapter.clone()), &ro, &mount_options)
            .map_err(|e| Error::Mount(format!("failed to mount read-only layer: {e}")))?;

        let mut layers = vec![ro.clone()];

        let fs = Arc::new(Self {
            backend: options.backend.clone(),
            layers: Mutex::new(layers.clone()),
            overlay_mounted: AtomicBool::new(false),
            session: Mutex::new(Some(session)),
            adapter,
            base_layers: Mutex::new(vec![meta]),
            unmounted: Arc::new(Notify::new()),
        });

        if options.read_only {
            fs.spawn_watch(ro);
            return Ok(fs);
        }

        let rw = options.backend.join("rw");
        let wd = options.backend.join("wd");
        for dir in [&rw, &wd] {
            std::fs::create_dir_all(dir).map_err(Error::Io)?;
        }
        if let Ok(meta) = std::fs::metadata(&ro) {
            let _ = std::fs::set_permissions(&rw, meta.permissions());
        }

        let data = format!(
            "lowerdir={},upperdir={},workdir={}",
            ro.display(),
            rw.display(),
            wd.display()
        );
        nix_mount(
            Some("overlay"),
            target,
            Some("overlay"),
            MsFlags::MS_NOATIME,
            Some(data.as_str()),
        )
        .map_err(|e| {
            let _ = fs.unmount();
            Error::Mount(format!("failed to mount overlay: {e}"))
        })?;
        fs.overlay_mounted.store(true, Ordering::SeqCst);
        layers.push(target.to_path_buf());
        *fs.layers.lock().unwrap() = layers;

        if !wait_for_mountpoint(target).await {
            let _ = fs.unmount();
            return Err(Error::Mount(format!(
                "{} did not register as a mount point in time",
                target.display()
            )));
        }

        fs.spawn_watch(target.to_path_buf());
        Ok(fs)
    }

    fn spawn_watch(self: &Arc<Self>, watched: PathBuf) {
        let unmounted = self.unmounted.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_for_external_unmount(&watched).await {
                warn!(path = %watched.display(), error = %e, "failed watching target for external unmount");
            }
            unmounted.notify_waiters();
        });
    }

    /// Block until the filesystem is unmounted (externally or via
    /// [`Self::unmount`]), then tear down any remaining layers.
    pub async fn wait(&self) -> Result<(), Error> {
        self.unmounted.notified().await;
        self.unmount()
    }

    /// Tear down every layer, in reverse mount order.
    pub fn unmount(&self) -> Result<(), Error> {
        if self.overlay_mounted.swap(false, Ordering::SeqCst) {
            if let Some(top) = self.layers.lock().unwrap().last().cloned() {
                if let Err(e) = umount2(&top, MntFlags::MNT_FORCE | MntFlags::MNT_DETACH) {
                    warn!(path = %top.display(), error = %e, "failed to unmount overlay layer");
                }
            }
        }
        if let Some(session) = self.session.lock().unwrap().take() {
            drop(session);
        }
        info!("g8ufs unmounted");
        Ok(())
    }

    /// Reload the metadata stack: read `backend/.layered` (one path per
    /// line, each a directory holding a `SqliteStore`) and stack them above
    /// the layers already in use, atomically swapping the pointer the FUSE
    /// adapter resolves through.
    pub fn reload(&self) -> Result<(), Error> {
        let layered_file = self.backend.join(".layered");
        let contents = match std::fs::read_to_string(&layered_file) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut base = self.base_layers.lock().unwrap();
        let mut changed = false;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let store = SqliteStore::open(Path::new(line))?;
            base.push(Arc::new(store));
            changed = true;
        }
        if !changed {
            return Ok(());
        }

        let new_store: Arc<dyn MetaStore> = Arc::new(LayeredStore::new(base.clone()));
        self.adapter.swap_store(new_store);
        info!(layers = base.len(), "metadata stack reloaded");
        Ok(())
    }
}

/// Wraps `Adapter` so the `fuser` crate can own a handle by value while the
/// engine keeps its own `Arc<Adapter>` for `swap_store` on reload. Every
/// `Adapter` handler is implemented over `&self` (see `fuse_adapter.rs`), so
/// this just forwards through the `Arc` without needing exclusive access.
struct AdapterHandle(Arc<Adapter>);

impl fuser::Filesystem for AdapterHandle {
    fn lookup(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEntry,
    ) {
        self.0.do_lookup(req, parent, name, reply)
    }

    fn getattr(&mut self, req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        self.0.do_getattr(req, ino, reply)
    }

    fn readlink(&mut self, req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyData) {
        self.0.do_readlink(req, ino, reply)
    }

    fn open(&mut self, req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        self.0.do_open(req, ino, flags, reply)
    }

    fn read(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        self.0.do_read(req, ino, fh, offset, size, flags, lock_owner, reply)
    }

    fn release(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.0.do_release(req, ino, fh, flags, lock_owner, flush, reply)
    }

    fn opendir(&mut self, req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        self.0.do_opendir(req, ino, flags, reply)
    }

    fn readdir(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: fuser::ReplyDirectory,
    ) {
        self.0.do_readdir(req, ino, fh, offset, reply)
    }

    fn access(&mut self, req: &fuser::Request<'_>, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        self.0.do_access(req, ino, mask, reply)
    }

    fn statfs(&mut self, req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyStatfs) {
        self.0.do_statfs(req, ino, reply)
    }

    fn getxattr(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        name: &std::ffi::OsStr,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        self.0.do_getxattr(req, ino, name, size, reply)
    }

    fn listxattr(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        self.0.do_listxattr(req, ino, size, reply)
    }
}

async fn wait_for_mountpoint(target: &Path) -> bool {
    for _ in 0..MOUNTPOINT_POLL_ATTEMPTS {
        tokio::time::sleep(MOUNTPOINT_POLL_INTERVAL).await;
        if is_mountpoint(target) {
            return true;
        }
    }
    false
}

/// Shells out to `mountpoint -q`, matching the original's own choice to
/// delegate this check rather than parse `/proc/mounts` itself.
fn is_mountpoint(target: &Path) -> bool {
    std::process::Command::new("mountpoint")
        .arg("-q")
        .arg(target)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn watch_for_external_unmount(target: &Path) -> std::io::Result<()> {
    use futures::StreamExt;

    let mut inotify = Inotify::init()?;
    inotify.watches().add(target, WatchMask::IGNORED | WatchMask::UNMOUNT)?;
    let mut stream = inotify.into_event_stream([0u8; 4096])?;
    while let Some(event) = stream.next().await {
        event?;
    }
    Ok(())
}
