use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// BLAKE2b-128 of `data`, raw bytes. Used to verify decrypted/decompressed
/// block plaintext against its `cipher_key`.
pub fn blake2b128(data: &[u8]) -> [u8; 16] {
    let mut hasher = Blake2b::<U16>::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE2b-128 of `data`, lowercase hex. Used for path-derived metadata keys.
pub fn blake2b128_hex(data: &[u8]) -> String {
    hex::encode(blake2b128(data))
}

pub fn setup_logger(debug: bool) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(Some(tracing_subscriber::fmt::layer().with_filter(
            if debug {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            },
        )))
        .init();

    Ok(())
}
