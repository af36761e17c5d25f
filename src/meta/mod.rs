//! Metadata store: resolves a path to a [`Node`](crate::inode::Node),
//! backed by an opaque key-value lookup (historically SQLite) and a
//! capability-style binary record format for directories and ACLs. Ported
//! from `meta/*.go`.
mod decode;
pub mod layered;
pub(crate) mod record;
pub mod store;

use std::sync::Arc;

pub use layered::LayeredStore;
pub use store::SqliteStore;

use crate::inode::{Access, Node};

pub const DEFAULT_ACCESS: Access = Access {
    uid: 1000,
    gid: 1000,
    mode: 0o400,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found")]
    NotFound(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Db(String),
    #[error("acl resolution error: {0}")]
    Acl(String),
}

/// Resolves paths to filesystem nodes. Implementations are synchronous:
/// both the SQLite-backed store and the layered façade only ever do local,
/// uncontended reads.
pub trait MetaStore: Send + Sync {
    /// Resolve `path` (no leading slash, `""` for root) to its node.
    fn get(&self, path: &str) -> Result<Arc<Node>, Error>;

    /// List the direct children of the directory at `path`. Errors if
    /// `path` does not resolve to a directory.
    fn children(&self, path: &str) -> Result<Vec<Arc<Node>>, Error>;
}

/// Split `a/b/c` into (`a/b`, `c`); `c` into (`""`, `c`).
pub(crate) fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_path_handles_root_level_entries() {
        assert_eq!(split_path("hello"), ("", "hello"));
        assert_eq!(split_path("a/b/c"), ("a/b", "c"));
    }
}
