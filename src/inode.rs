//! The node types surfaced by a metadata store: [`Node`], its [`Access`]
//! control triple, and the block-addressing types ([`BlockRef`],
//! [`FileFingerprint`]) used to retrieve and verify file content.
use std::fmt;

use md5::{Digest, Md5};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Owner/group/mode triple, the only ACL this filesystem understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// A reference to one block of a file's content: where to fetch it, and the
/// key both to decrypt and to verify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub storage_key: Vec<u8>,
    pub cipher_key: Vec<u8>,
}

/// MD5 of the concatenation of a file's `storage_key`s, in order. Used as
/// the local-cache file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileFingerprint([u8; 16]);

impl FileFingerprint {
    pub fn compute(blocks: &[BlockRef]) -> Self {
        let mut hasher = Md5::new();
        for block in blocks {
            hasher.update(&block.storage_key);
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Kind discriminant mirroring the `st_mode` file-type bits the FUSE layer
/// needs, independent of any particular metadata store's encoding of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

/// Attributes common to every node, computed once and cached the way the
/// original's `sync.Once`-guarded `Info()` accessors are: cheap to call
/// repeatedly, expensive (a decode) only the first time.
#[derive(Debug, Clone)]
pub struct Attr {
    pub creation_time: u32,
    pub modification_time: u32,
    pub access: Access,
    pub size: u64,
}

/// A single entry in the filesystem tree.
///
/// Named `Node` rather than `Inode` to avoid colliding with the FUSE kernel
/// inode number, which is a separate (u64) concept tracked by the engine's
/// inode table.
pub enum Node {
    Directory(Directory),
    File(File),
    Symlink(Symlink),
    Special(Special),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Directory(d) => &d.name,
            Node::File(f) => &f.name,
            Node::Symlink(s) => &s.name,
            Node::Special(s) => &s.name,
        }
    }

    pub fn access(&self) -> Access {
        match self {
            Node::Directory(d) => d.access,
            Node::File(f) => f.access,
            Node::Symlink(s) => s.access,
            Node::Special(s) => s.access,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    /// Blocks making up a file's content; empty for every other node kind.
    pub fn blocks(&self) -> &[BlockRef] {
        match self {
            Node::File(f) => f.blocks.get_or_init(Vec::new),
            _ => &[],
        }
    }
}

#[derive(Debug)]
pub struct Directory {
    pub name: String,
    pub access: Access,
    attr: OnceCell<Attr>,
    /// Directory metadata is cheap (fixed 4096 size, no blocks): computed
    /// eagerly rather than lazily, unlike file attributes.
    pub fixed_attr: Attr,
}

impl Directory {
    pub fn new(name: String, access: Access, fixed_attr: Attr) -> Self {
        Self {
            name,
            access,
            attr: OnceCell::new(),
            fixed_attr,
        }
    }

    pub fn attr(&self) -> &Attr {
        self.attr.get_or_init(|| self.fixed_attr.clone())
    }
}

pub struct File {
    pub name: String,
    pub access: Access,
    pub block_size: u64,
    attr: OnceCell<Attr>,
    size: u64,
    creation_time: u32,
    modification_time: u32,
    /// Lazily decoded from the record on first access, then reused; the
    /// fingerprint used for the local cache is derived from this.
    pub blocks: OnceCell<Vec<BlockRef>>,
    fingerprint: OnceCell<FileFingerprint>,
}

impl File {
    pub fn new(
        name: String,
        access: Access,
        block_size: u64,
        size: u64,
        creation_time: u32,
        modification_time: u32,
    ) -> Self {
        Self {
            name,
            access,
            block_size,
            attr: OnceCell::new(),
            size,
            creation_time,
            modification_time,
            blocks: OnceCell::new(),
            fingerprint: OnceCell::new(),
        }
    }

    pub fn attr(&self) -> &Attr {
        self.attr.get_or_init(|| Attr {
            creation_time: self.creation_time,
            modification_time: self.modification_time,
            access: self.access,
            size: self.size,
        })
    }

    pub fn fingerprint(&self, blocks: &[BlockRef]) -> &FileFingerprint {
        self.fingerprint
            .get_or_init(|| FileFingerprint::compute(blocks))
    }
}

#[derive(Debug)]
pub struct Symlink {
    pub name: String,
    pub access: Access,
    pub target: String,
    attr: OnceCell<Attr>,
    size: u64,
    creation_time: u32,
    modification_time: u32,
}

impl Symlink {
    pub fn new(
        name: String,
        access: Access,
        target: String,
        size: u64,
        creation_time: u32,
        modification_time: u32,
    ) -> Self {
        Self {
            name,
            access,
            target,
            attr: OnceCell::new(),
            size,
            creation_time,
            modification_time,
        }
    }

    pub fn attr(&self) -> &Attr {
        self.attr.get_or_init(|| Attr {
            creation_time: self.creation_time,
            modification_time: self.modification_time,
            access: self.access,
            size: self.size,
        })
    }
}

#[derive(Debug)]
pub struct Special {
    pub name: String,
    pub access: Access,
    pub kind: SpecialKind,
    pub data: String,
    attr: OnceCell<Attr>,
    size: u64,
    creation_time: u32,
    modification_time: u32,
}

impl Special {
    pub fn new(
        name: String,
        access: Access,
        kind: SpecialKind,
        data: String,
        size: u64,
        creation_time: u32,
        modification_time: u32,
    ) -> Self {
        Self {
            name,
            access,
            kind,
            data,
            attr: OnceCell::new(),
            size,
            creation_time,
            modification_time,
        }
    }

    pub fn attr(&self) -> &Attr {
        self.attr.get_or_init(|| Attr {
            creation_time: self.creation_time,
            modification_time: self.modification_time,
            access: self.access,
            size: self.size,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_order_sensitive() {
        let a = BlockRef {
            storage_key: b"a".to_vec(),
            cipher_key: vec![],
        };
        let b = BlockRef {
            storage_key: b"b".to_vec(),
            cipher_key: vec![],
        };
        let fp_ab = FileFingerprint::compute(&[a.clone(), b.clone()]);
        let fp_ba = FileFingerprint::compute(&[b, a]);
        assert_ne!(fp_ab, fp_ba);
        assert_eq!(fp_ab, FileFingerprint::compute(&[
            BlockRef { storage_key: b"a".to_vec(), cipher_key: vec![] },
            BlockRef { storage_key: b"b".to_vec(), cipher_key: vec![] },
        ]));
    }
}
