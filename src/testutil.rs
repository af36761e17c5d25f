//! Builders for the capnp directory/ACL records a [`crate::meta::SqliteStore`]
//! expects, used by the integration tests under `tests/` to assemble a
//! throwaway metadata database without a real flist-building tool.
use crate::meta::record;

/// One entry of a [`encode_dir`] call. `acl_key` is left empty (falls back
/// to [`crate::meta::DEFAULT_ACCESS`]) unless a test cares about ownership.
pub enum ChildSpec {
    SubDir {
        name: String,
        key: String,
    },
    File {
        name: String,
        size: u64,
        block_size_bytes: u32,
        blocks: Vec<(Vec<u8>, Vec<u8>)>,
    },
    Link {
        name: String,
        target: String,
        size: u64,
    },
    Special {
        name: String,
        kind: SpecialTypeSpec,
        data: String,
        size: u64,
    },
}

#[derive(Clone, Copy)]
pub enum SpecialTypeSpec {
    Socket,
    Block,
    Chardev,
    Fifopipe,
}

/// Encode a `Dir` record: `name`/times fixed at 0 unless given, `acl_key`
/// empty, `children` built in order.
pub fn encode_dir(name: &str, children: &[ChildSpec]) -> Vec<u8> {
    let mut message = capnp::message::Builder::new_default();
    {
        let mut dir: record::dir::Builder = message.init_root();
        dir.set_name(name);
        dir.set_creation_time(0);
        dir.set_modification_time(0);
        dir.set_acl_key("");

        let mut contents = dir.init_contents(children.len() as u32);
        for (i, child) in children.iter().enumerate() {
            let mut inode = contents.reborrow().get(i as u32);
            match child {
                ChildSpec::SubDir { name, key } => {
                    inode.set_name(name);
                    inode.set_creation_time(0);
                    inode.set_modification_time(0);
                    inode.set_acl_key("");
                    inode.init_dir().set_key(key);
                }
                ChildSpec::File {
                    name,
                    size,
                    block_size_bytes,
                    blocks,
                } => {
                    inode.set_name(name);
                    inode.set_creation_time(0);
                    inode.set_modification_time(0);
                    inode.set_acl_key("");
                    let mut file = inode.init_file();
                    file.set_size(*size);
                    file.set_block_size(block_size_bytes / 4096);
                    let mut block_list = file.reborrow().init_blocks(blocks.len() as u32);
                    for (j, (storage_key, cipher_key)) in blocks.iter().enumerate() {
                        let mut block = block_list.reborrow().get(j as u32);
                        block.set_hash(storage_key);
                        block.set_key(cipher_key);
                    }
                }
                ChildSpec::Link { name, target, size } => {
                    inode.set_name(name);
                    inode.set_creation_time(0);
                    inode.set_modification_time(0);
                    inode.set_acl_key("");
                    let mut link = inode.init_link();
                    link.set_size(*size);
                    link.set_target(target);
                }
                ChildSpec::Special {
                    name,
                    kind,
                    data,
                    size,
                } => {
                    inode.set_name(name);
                    inode.set_creation_time(0);
                    inode.set_modification_time(0);
                    inode.set_acl_key("");
                    let mut special = inode.init_special();
                    special.set_size(*size);
                    special.set_type(match kind {
                        SpecialTypeSpec::Socket => record::SpecialType::Socket,
                        SpecialTypeSpec::Block => record::SpecialType::Block,
                        SpecialTypeSpec::Chardev => record::SpecialType::Chardev,
                        SpecialTypeSpec::Fifopipe => record::SpecialType::Fifopipe,
                    });
                    special.set_data(data);
                }
            }
        }
    }
    capnp::serialize::write_message_to_words(&message)
}
