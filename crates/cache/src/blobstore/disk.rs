//! Local directory backend

use super::{Backpressure, Blobstore, BlobstoreKind};
use crate::storage::{decode_frame, encode_frame, BlobKey, CompressionConfig};
use async_trait::async_trait;
use remcache_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Stores each object as one framed file under `root`
pub struct DiskBlobstore {
    root: PathBuf,
    compression: CompressionConfig,
    backpressure: Backpressure,
}

impl DiskBlobstore {
    /// Create the backend, creating `root` if needed
    pub async fn new(
        root: PathBuf,
        compression: CompressionConfig,
        backpressure: Backpressure,
    ) -> Result<Self> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::from_io("disk", &root.display().to_string(), e))?;

        Ok(Self {
            root,
            compression,
            backpressure,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &BlobKey) -> PathBuf {
        key.to_path(&self.root)
    }
}

#[async_trait]
impl Blobstore for DiskBlobstore {
    fn kind(&self) -> BlobstoreKind {
        BlobstoreKind::Disk
    }

    async fn write(&self, key: &BlobKey, data: &[u8]) -> Result<u64> {
        let _permit = self.backpressure.acquire().await?;
        let frame = encode_frame(key.as_str(), data, &self.compression)?;

        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io("disk", key.as_str(), e))?;
        }

        // Concurrent writers of the same key each use their own temp file;
        // the last rename wins and every candidate is a complete frame.
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&frame).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::from_io("disk", key.as_str(), e));
        }

        debug!(key = %key, bytes = data.len(), stored = frame.len(), "disk write");
        Ok(data.len() as u64)
    }

    async fn read(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let _permit = self.backpressure.acquire().await?;
        let frame = fs::read(self.path_for(key))
            .await
            .map_err(|e| Error::from_io("disk", key.as_str(), e))?;
        decode_frame(key.as_str(), &frame)
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let _permit = self.backpressure.acquire().await?;
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from_io("disk", key.as_str(), e)),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let _permit = self.backpressure.acquire().await?;
        match fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::from_io("disk", key.as_str(), e)),
        }
    }
}
