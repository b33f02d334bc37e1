//! In-process backend for tests and ephemeral deployments

use super::{Backpressure, Blobstore, BlobstoreKind};
use crate::storage::{decode_frame, encode_frame, BlobKey, CompressionConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use remcache_core::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct CallCounts {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub deletes: AtomicU64,
    pub exists: AtomicU64,
}

impl CallCounts {
    /// Sum of every backend call so far
    pub fn total(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
            + self.writes.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
            + self.exists.load(Ordering::Relaxed)
    }
}

/// Framed objects held in a concurrent map
pub struct MemoryBlobstore {
    objects: DashMap<BlobKey, Vec<u8>>,
    compression: CompressionConfig,
    backpressure: Backpressure,
    calls: CallCounts,
}

impl MemoryBlobstore {
    pub fn new(compression: CompressionConfig, backpressure: Backpressure) -> Self {
        Self {
            objects: DashMap::new(),
            compression,
            backpressure,
            calls: CallCounts::default(),
        }
    }

    /// Convenience constructor with default compression and a generous permit count
    pub fn unbounded() -> Self {
        Self::new(
            CompressionConfig::default(),
            Backpressure::new(1024, BlobstoreKind::Memory),
        )
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Overwrite the stored frame bytes directly, bypassing encoding
    pub fn put_raw(&self, key: &BlobKey, frame: Vec<u8>) {
        self.objects.insert(key.clone(), frame);
    }

    /// The stored frame bytes, if present
    pub fn get_raw(&self, key: &BlobKey) -> Option<Vec<u8>> {
        self.objects.get(key).map(|v| v.value().clone())
    }
}

#[async_trait]
impl Blobstore for MemoryBlobstore {
    fn kind(&self) -> BlobstoreKind {
        BlobstoreKind::Memory
    }

    async fn write(&self, key: &BlobKey, data: &[u8]) -> Result<u64> {
        let _permit = self.backpressure.acquire().await?;
        self.calls.writes.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(key.as_str(), data, &self.compression)?;
        self.objects.insert(key.clone(), frame);
        Ok(data.len() as u64)
    }

    async fn read(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let _permit = self.backpressure.acquire().await?;
        self.calls.reads.fetch_add(1, Ordering::Relaxed);
        let frame = self
            .objects
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::blob_not_found(key.as_str()))?;
        decode_frame(key.as_str(), &frame)
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let _permit = self.backpressure.acquire().await?;
        self.calls.deletes.fetch_add(1, Ordering::Relaxed);
        self.objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let _permit = self.backpressure.acquire().await?;
        self.calls.exists.fetch_add(1, Ordering::Relaxed);
        Ok(self.objects.contains_key(key))
    }
}
