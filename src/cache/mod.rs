//! Local, content-addressed cache of materialized file blocks. Ported from
//! `rofs/cache.go`'s `checkAndGet`, with the two-level fan-out directory
//! layout the metadata-store design calls for.
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::inode::{BlockRef, FileFingerprint};
use crate::pipeline::Downloader;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cache I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("failed to acquire cache file lock: {0}")]
    Lock(#[source] std::io::Error),
    #[error(transparent)]
    Pipeline(#[from] crate::pipeline::Error),
}

/// A directory holding materialized file content, keyed by
/// [`FileFingerprint`].
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `root/h[0:2]/h[2:4]/h`.
    pub fn path_for(&self, fingerprint: &FileFingerprint) -> PathBuf {
        let hex = fingerprint.to_string();
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    /// Ensure the file identified by `fingerprint` is present and complete
    /// on disk, downloading it through `downloader` if it is missing or
    /// short, then return a read-only handle positioned at offset 0.
    ///
    /// At most one caller materializes a given fingerprint at a time,
    /// including across processes sharing this cache directory: the
    /// exclusive file lock serializes writers, but an already-complete
    /// file can still be read concurrently during the brief lock window.
    pub async fn check_and_get(
        &self,
        fingerprint: &FileFingerprint,
        declared_size: u64,
        blocks: &[BlockRef],
        block_size: u64,
        downloader: &Downloader,
    ) -> Result<std::fs::File, Error> {
        let path = self.path_for(fingerprint);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Error::Io)?;
        }

        let std_file = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
                std::fs::OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .open(path)
            })
            .await
            .expect("cache file open task panicked")
            .map_err(Error::Io)?
        };

        let mut locked = fd_lock::RwLock::new(std_file);
        {
            let mut guard = locked.write().map_err(Error::Lock)?;

            let len = guard.metadata().map_err(Error::Io)?.len();
            if len != declared_size {
                debug!(
                    path = %path.display(),
                    on_disk = len,
                    declared = declared_size,
                    "cache miss, materializing from storage"
                );
                if let Err(e) = materialize(&mut guard, blocks, block_size, downloader).await {
                    warn!(path = %path.display(), error = %e, "materialization failed, discarding partial cache file");
                    drop(guard);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(e);
                }
            } else {
                debug!(path = %path.display(), "cache hit");
            }
        }

        let std_file = locked.into_inner();
        Ok(std_file)
    }
}

async fn materialize(
    file: &mut std::fs::File,
    blocks: &[BlockRef],
    block_size: u64,
    downloader: &Downloader,
) -> Result<(), Error> {
    let cloned = file.try_clone().map_err(Error::Io)?;
    let mut tokio_file = tokio::fs::File::from_std(cloned);
    downloader
        .download(blocks, block_size, &mut tokio_file)
        .await?;
    tokio_file.sync_all().await.map_err(Error::Io)?;

    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(0)).map_err(Error::Io)?;
    Ok(())
}

/// Shared by the metadata store and this module: both want the on-disk
/// layout rooted the same way, so this stays a free function rather than
/// getting duplicated at call sites.
pub fn ensure_root(root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(root)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_layout_uses_first_two_hex_byte_pairs_as_fanout() {
        let cache = Cache::new("/var/cache/g8ufs");
        let blocks = [BlockRef {
            storage_key: b"a".to_vec(),
            cipher_key: vec![],
        }];
        let fp = FileFingerprint::compute(&blocks);
        let hex = fp.to_string();
        let path = cache.path_for(&fp);
        assert_eq!(
            path,
            PathBuf::from("/var/cache/g8ufs")
                .join(&hex[0..2])
                .join(&hex[2..4])
                .join(&hex)
        );
    }
}
