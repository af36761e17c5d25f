//! Error taxonomy for the filesystem engine.
//!
//! Each subsystem gets its own enum, composed into a single top-level
//! [`Error`] via `#[from]`. This keeps `?` working across module boundaries
//! while letting each subsystem describe its own failure modes.
use crate::{meta, pipeline, router};

/// Top-level engine error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("metadata error: {0}")]
    Meta(#[from] meta::Error),
    #[error("router error: {0}")]
    Router(#[from] router::Error),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] pipeline::Error),
    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid inode {0}")]
    InvalidInode(u64),
    #[error("write operations are not supported on this read-only mount")]
    ReadOnly,
    #[error("operation not supported")]
    Unsupported,
    #[error("mount setup failed: {0}")]
    Mount(String),
}

impl Error {
    /// Translate to the errno surfaced to the kernel: NotFound -> ENOENT,
    /// transport/decode failures -> EIO, a disallowed write -> EPERM,
    /// unimplemented operations -> ENOSYS.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::Meta(meta::Error::NotFound(_)) => libc::ENOENT,
            Error::Meta(_) => libc::EIO,
            Error::Router(router::Error::NotRoutable) => libc::EIO,
            Error::Router(_) => libc::EIO,
            Error::Pipeline(_) => libc::EIO,
            Error::Cache(_) => libc::EIO,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::InvalidInode(_) => libc::EINVAL,
            Error::ReadOnly => libc::EPERM,
            Error::Unsupported => libc::ENOSYS,
            Error::Mount(_) => libc::EIO,
        }
    }
}
