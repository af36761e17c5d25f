//! Read-only, content-addressed, lazily-fetched union filesystem surfaced
//! through FUSE.
//!
//! Given one or more metadata databases (each describing a directory tree)
//! and a network of content-addressed object stores, this presents a POSIX
//! directory tree where file data is fetched, decrypted, decompressed,
//! verified, cached on local disk, and served on demand through the kernel's
//! FUSE interface. An optional writable overlay above the read-only mount
//! permits mutations that live only on the local host.
pub mod cache;
pub mod engine;
pub mod error;
pub mod fuse_adapter;
pub mod inode;
pub mod meta;
pub mod pipeline;
pub mod router;
pub mod storage;
#[doc(hidden)]
pub mod testutil;
#[doc(hidden)]
pub mod utils;

use std::path::Path;
use std::sync::Arc;

pub use engine::{G8ufs, Options};
pub use error::Error;

/// `router.yaml`'s conventional name alongside a metadata database, per the
/// external-interfaces contract: picked up automatically if present.
const ROUTER_CONFIG_NAME: &str = "router.yaml";

/// Open the metadata database at `meta_path`, resolve its router (picking up
/// a sibling `router.yaml` and merging in `options.local_router` ahead of
/// it, if given), and mount at `target`.
///
/// This is the convenience entry point a CLI front-end wires flags into; the
/// lower-level pieces (`meta::SqliteStore`, `router::Config`, `engine::G8ufs`)
/// remain usable directly for callers that assemble their own stack (e.g. a
/// layered multi-flist mount).
pub async fn mount(
    meta_path: &Path,
    target: &Path,
    options: Options,
) -> Result<Arc<G8ufs>, Error> {
    let store: Arc<dyn meta::MetaStore> = Arc::new(meta::SqliteStore::open(meta_path)?);

    let mut routers = Vec::new();
    if let Some(local_path) = &options.local_router {
        routers.push(load_router(local_path)?);
    }
    if let Some(parent) = meta_path.parent() {
        let sibling = parent.join(ROUTER_CONFIG_NAME);
        if sibling.is_file() {
            routers.push(load_router(&sibling)?);
        }
    }
    let router = Arc::new(router::Router::merge(routers)?);

    let runtime = tokio::runtime::Handle::current();
    G8ufs::mount(store, router, target, options, runtime).await
}

fn load_router(path: &Path) -> Result<router::Router, Error> {
    let text = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config = router::Config::from_yaml(&text)?;
    Ok(config.router()?)
}
