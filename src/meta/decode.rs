//! Turns the capnp records in [`super::record`] into plain data the store
//! can cache and resolve against. ACL keys are returned unresolved — access
//! resolution goes through the store's own ACL cache (§4.E).
use capnp::message::ReaderOptions;

use super::record;
use super::Error;
use crate::inode::{BlockRef, SpecialKind};

/// No artificial traversal limit: a directory record with a deep or wide
/// child list must still decode, per the metadata store design.
fn reader_options() -> ReaderOptions {
    ReaderOptions {
        traversal_limit_in_words: u64::MAX,
        nesting_limit: i32::MAX,
    }
}

pub struct RawDir {
    pub name: String,
    pub creation_time: u32,
    pub modification_time: u32,
    pub acl_key: String,
    pub children: Vec<RawChild>,
}

pub enum RawChild {
    SubDir {
        key: String,
    },
    File {
        name: String,
        creation_time: u32,
        modification_time: u32,
        acl_key: String,
        size: u64,
        block_size: u64,
        blocks: Vec<BlockRef>,
    },
    Link {
        name: String,
        creation_time: u32,
        modification_time: u32,
        acl_key: String,
        size: u64,
        target: String,
    },
    Special {
        name: String,
        creation_time: u32,
        modification_time: u32,
        acl_key: String,
        size: u64,
        kind: SpecialKind,
        data: String,
    },
}

pub fn decode_dir(bytes: &[u8]) -> Result<RawDir, Error> {
    let message = capnp::serialize::read_message(&mut std::io::Cursor::new(bytes), reader_options())
        .map_err(|e| Error::Decode(e.to_string()))?;
    let dir = message
        .get_root::<record::dir::Reader>()
        .map_err(|e| Error::Decode(e.to_string()))?;

    let mut children = Vec::new();
    for inode in dir.get_contents().map_err(|e| Error::Decode(e.to_string()))?.iter() {
        children.push(decode_inode(inode)?);
    }

    Ok(RawDir {
        name: text(dir.get_name())?,
        creation_time: dir.get_creation_time(),
        modification_time: dir.get_modification_time(),
        acl_key: text(dir.get_acl_key())?,
        children,
    })
}

fn decode_inode(inode: record::inode::Reader) -> Result<RawChild, Error> {
    let name = text(inode.get_name())?;
    let creation_time = inode.get_creation_time();
    let modification_time = inode.get_modification_time();
    let acl_key = text(inode.get_acl_key())?;

    use record::inode::Which;
    match inode.which().map_err(|e| Error::Decode(e.to_string()))? {
        Which::Dir(dir_ref) => {
            let dir_ref = dir_ref.map_err(|e| Error::Decode(e.to_string()))?;
            Ok(RawChild::SubDir {
                key: text(dir_ref.get_key())?,
            })
        }
        Which::File(file) => {
            let file = file.map_err(|e| Error::Decode(e.to_string()))?;
            let mut blocks = Vec::new();
            for block in file.get_blocks().map_err(|e| Error::Decode(e.to_string()))?.iter() {
                blocks.push(BlockRef {
                    storage_key: block.get_hash().map_err(|e| Error::Decode(e.to_string()))?.to_vec(),
                    cipher_key: block.get_key().map_err(|e| Error::Decode(e.to_string()))?.to_vec(),
                });
            }
            Ok(RawChild::File {
                name,
                creation_time,
                modification_time,
                acl_key,
                size: file.get_size(),
                block_size: file.get_block_size() as u64 * 4096,
                blocks,
            })
        }
        Which::Link(link) => {
            let link = link.map_err(|e| Error::Decode(e.to_string()))?;
            Ok(RawChild::Link {
                name,
                creation_time,
                modification_time,
                acl_key,
                size: link.get_size(),
                target: text(link.get_target())?,
            })
        }
        Which::Special(special) => {
            let special = special.map_err(|e| Error::Decode(e.to_string()))?;
            let kind = match special
                .get_type()
                .map_err(|e| Error::Decode(e.to_string()))?
            {
                record::SpecialType::Socket => SpecialKind::Socket,
                record::SpecialType::Block => SpecialKind::BlockDevice,
                record::SpecialType::Chardev => SpecialKind::CharDevice,
                record::SpecialType::Fifopipe => SpecialKind::Fifo,
                record::SpecialType::Unknown => {
                    return Err(Error::Decode("special node of unknown type".into()))
                }
            };
            Ok(RawChild::Special {
                name,
                creation_time,
                modification_time,
                acl_key,
                size: special.get_size(),
                kind,
                data: text(special.get_data())?,
            })
        }
    }
}

/// Resolved ACL: the `uname`/`gname` pair is not looked up here, so the
/// store can memoize user/group resolution independently of ACL records.
pub struct RawAci {
    pub uname: String,
    pub gname: String,
    pub mode: u32,
}

pub fn decode_aci(bytes: &[u8]) -> Result<RawAci, Error> {
    let message = capnp::serialize::read_message(&mut std::io::Cursor::new(bytes), reader_options())
        .map_err(|e| Error::Decode(e.to_string()))?;
    let aci = message
        .get_root::<record::aci::Reader>()
        .map_err(|e| Error::Decode(e.to_string()))?;
    Ok(RawAci {
        uname: text(aci.get_uname())?,
        gname: text(aci.get_gname())?,
        mode: aci.get_mode(),
    })
}

fn text(r: capnp::Result<capnp::text::Reader>) -> Result<String, Error> {
    let reader = r.map_err(|e| Error::Decode(e.to_string()))?;
    reader
        .to_str()
        .map(str::to_string)
        .map_err(|e| Error::Decode(e.to_string()))
}
