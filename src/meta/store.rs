//! SQLite-backed metadata store, ported from `meta/store.go`'s `rocksStore`
//! (swapping the backing KV engine but keeping the same resolution
//! algorithm): directories are looked up directly by path hash; anything
//! else is reached by resolving its parent directory's child list.
use std::sync::{Arc, Mutex};

use lru::LruCache;
use nix::unistd::{Group, User};
use rusqlite::Connection;
use tracing::debug;

use super::decode::{self, RawChild};
use super::{split_path, Error, MetaStore, DEFAULT_ACCESS};
use crate::inode::{Access, Directory, File, Node, Special, Symlink};
use crate::utils::blake2b128_hex;

const DEFAULT_DIR_CACHE_SIZE: usize = 1024;
const DEFAULT_ACL_CACHE_SIZE: usize = 64;

/// A directory record, decoded once and cached: its own node plus its
/// (possibly still-unresolved) children.
struct CachedDir {
    node: Arc<Node>,
    entries: Vec<CachedEntry>,
}

enum CachedEntry {
    SubDir { key: String },
    Leaf(Arc<Node>),
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    dir_cache: Mutex<LruCache<String, Arc<CachedDir>>>,
    acl_cache: Mutex<LruCache<String, Access>>,
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(|e| Error::Db(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            dir_cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(DEFAULT_DIR_CACHE_SIZE).unwrap(),
            )),
            acl_cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(DEFAULT_ACL_CACHE_SIZE).unwrap(),
            )),
        })
    }

    fn raw_get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM entries WHERE key = ?1",
            [key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(Error::Db(other.to_string())),
        })
    }

    fn get_dir_by_hash(&self, hash: &str) -> Result<Arc<CachedDir>, Error> {
        if let Some(dir) = self.dir_cache.lock().unwrap().get(hash) {
            return Ok(dir.clone());
        }

        let bytes = self
            .raw_get(hash)?
            .ok_or_else(|| Error::NotFound(hash.to_string()))?;
        let raw = decode::decode_dir(&bytes)?;
        let access = self.resolve_access(&raw.acl_key);

        let fixed_attr = crate::inode::Attr {
            creation_time: raw.creation_time,
            modification_time: raw.modification_time,
            access,
            size: 4096,
        };
        let node = Arc::new(Node::Directory(Directory::new(raw.name, access, fixed_attr)));

        let entries = raw
            .children
            .into_iter()
            .map(|child| self.resolve_child(child))
            .collect();

        let cached = Arc::new(CachedDir { node, entries });
        self.dir_cache
            .lock()
            .unwrap()
            .put(hash.to_string(), cached.clone());
        Ok(cached)
    }

    fn resolve_child(&self, child: RawChild) -> CachedEntry {
        match child {
            RawChild::SubDir { key } => CachedEntry::SubDir { key },
            RawChild::File {
                name,
                creation_time,
                modification_time,
                acl_key,
                size,
                block_size,
                blocks,
            } => {
                let access = self.resolve_access(&acl_key);
                let file = File::new(name, access, block_size, size, creation_time, modification_time);
                let _ = file.blocks.set(blocks);
                CachedEntry::Leaf(Arc::new(Node::File(file)))
            }
            RawChild::Link {
                name,
                creation_time,
                modification_time,
                acl_key,
                size,
                target,
            } => {
                let access = self.resolve_access(&acl_key);
                CachedEntry::Leaf(Arc::new(Node::Symlink(Symlink::new(
                    name,
                    access,
                    target,
                    size,
                    creation_time,
                    modification_time,
                ))))
            }
            RawChild::Special {
                name,
                creation_time,
                modification_time,
                acl_key,
                size,
                kind,
                data,
            } => {
                let access = self.resolve_access(&acl_key);
                CachedEntry::Leaf(Arc::new(Node::Special(Special::new(
                    name,
                    access,
                    kind,
                    data,
                    size,
                    creation_time,
                    modification_time,
                ))))
            }
        }
    }

    /// Resolve an ACL key to an access triple. A missing or malformed ACL
    /// record is not fatal: it falls back to [`DEFAULT_ACCESS`], matching
    /// the original's handling of `errNoACI`.
    fn resolve_access(&self, acl_key: &str) -> Access {
        if acl_key.is_empty() {
            return DEFAULT_ACCESS;
        }
        if let Some(access) = self.acl_cache.lock().unwrap().get(acl_key) {
            return *access;
        }
        let access = match self.raw_get(acl_key) {
            Ok(Some(bytes)) => match decode::decode_aci(&bytes) {
                Ok(aci) => Access {
                    uid: resolve_uid(&aci.uname),
                    gid: resolve_gid(&aci.gname),
                    mode: aci.mode & 0o777,
                },
                Err(e) => {
                    debug!(acl_key, error = %e, "failed to decode acl record, using default access");
                    DEFAULT_ACCESS
                }
            },
            Ok(None) => DEFAULT_ACCESS,
            Err(e) => {
                debug!(acl_key, error = %e, "failed to fetch acl record, using default access");
                DEFAULT_ACCESS
            }
        };
        self.acl_cache
            .lock()
            .unwrap()
            .put(acl_key.to_string(), access);
        access
    }
}

fn resolve_uid(uname: &str) -> u32 {
    User::from_name(uname)
        .ok()
        .flatten()
        .map(|u| u.uid.as_raw())
        .unwrap_or(DEFAULT_ACCESS.uid)
}

fn resolve_gid(gname: &str) -> u32 {
    Group::from_name(gname)
        .ok()
        .flatten()
        .map(|g| g.gid.as_raw())
        .unwrap_or(DEFAULT_ACCESS.gid)
}

impl MetaStore for SqliteStore {
    fn get(&self, path: &str) -> Result<Arc<Node>, Error> {
        let hash = blake2b128_hex(path.as_bytes());
        match self.get_dir_by_hash(&hash) {
            Ok(dir) => return Ok(dir.node.clone()),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if path.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }

        let (parent, name) = split_path(path);
        self.children(parent)?
            .into_iter()
            .find(|n| n.name() == name)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    fn children(&self, path: &str) -> Result<Vec<Arc<Node>>, Error> {
        let hash = blake2b128_hex(path.as_bytes());
        let dir = self.get_dir_by_hash(&hash)?;
        dir.entries
            .iter()
            .map(|entry| match entry {
                CachedEntry::Leaf(node) => Ok(node.clone()),
                CachedEntry::SubDir { key } => Ok(self.get_dir_by_hash(key)?.node.clone()),
            })
            .collect()
    }
}
