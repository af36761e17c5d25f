//! Block store client: a minimal key-value wire protocol (historically
//! Redis-compatible `GET`/`SET`/`PING`) spoken over a pooled TCP connection
//! to a single endpoint. The router (see [`crate::router`]) is what maps a
//! key to an endpoint; this module only knows how to talk to one.
pub mod client;
pub mod dns;

pub use client::{Client, Endpoint};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not found")]
    NotFound,
    #[error("timeout")]
    Timeout,
}
