//! Generated accessors for the capnp schema in `schema/g8ufs.capnp`.
#![allow(clippy::all, dead_code)]

include!(concat!(env!("OUT_DIR"), "/g8ufs_capnp.rs"));
