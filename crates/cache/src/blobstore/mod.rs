//! Blobstore: uniform byte storage over interchangeable backends
//!
//! Exactly one backend is active per process, chosen from configuration at
//! start-up by [`from_config`]. Backends map their native failures onto the
//! shared error taxonomy and never retry; retry policy belongs to callers.
//! Every backend call first takes a permit from a shared [`Backpressure`]
//! semaphore so a burst of requests queues instead of exhausting the backend.

mod disk;
mod instrumented;
mod memory;
mod object;

pub use disk::DiskBlobstore;
pub use instrumented::InstrumentedBlobstore;
pub use memory::MemoryBlobstore;
pub use object::{ObjectProvider, ObjectStoreBlobstore};

use crate::config::{BlobstoreConfig, CacheConfig};
use crate::observer::CacheObserver;
use crate::storage::BlobKey;
use async_trait::async_trait;
use remcache_core::{Error, Result};
use std::fmt::{self, Display};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Backend family, used as a metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobstoreKind {
    Disk,
    Gcs,
    Http,
    Memory,
}

impl BlobstoreKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Gcs => "gcs",
            Self::Http => "http",
            Self::Memory => "memory",
        }
    }
}

impl Display for BlobstoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set implemented identically by every backend
#[async_trait]
pub trait Blobstore: Send + Sync {
    fn kind(&self) -> BlobstoreKind;

    /// Replace the object at `key`; readers never observe a partial write
    async fn write(&self, key: &BlobKey, data: &[u8]) -> Result<u64>;

    /// Read the full object; `NotFound` if absent
    async fn read(&self, key: &BlobKey) -> Result<Vec<u8>>;

    /// Remove the object; removing an absent object succeeds
    async fn delete(&self, key: &BlobKey) -> Result<()>;

    async fn exists(&self, key: &BlobKey) -> Result<bool>;
}

#[async_trait]
impl<B: Blobstore + ?Sized> Blobstore for Arc<B> {
    fn kind(&self) -> BlobstoreKind {
        (**self).kind()
    }

    async fn write(&self, key: &BlobKey, data: &[u8]) -> Result<u64> {
        (**self).write(key, data).await
    }

    async fn read(&self, key: &BlobKey) -> Result<Vec<u8>> {
        (**self).read(key).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        (**self).exists(key).await
    }
}

/// Bounded concurrency shared by every backend call
#[derive(Debug, Clone)]
pub struct Backpressure {
    semaphore: Arc<Semaphore>,
    backend: BlobstoreKind,
}

impl Backpressure {
    pub fn new(permits: usize, backend: BlobstoreKind) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            backend,
        }
    }

    /// Wait for a permit; fails only once the semaphore has been closed
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.semaphore.acquire().await.map_err(|_| {
            Error::unavailable(self.backend.as_str(), "I/O semaphore closed")
        })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse all further backend calls, used during shutdown
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Build the configured backend, wrapped for observation
pub async fn from_config(
    config: &CacheConfig,
    observer: Arc<dyn CacheObserver>,
) -> Result<Arc<dyn Blobstore>> {
    let compression = config.compression;
    let permits = config.max_concurrent_backend_ops;

    let store: Arc<dyn Blobstore> = match &config.blobstore {
        BlobstoreConfig::Disk { root } => Arc::new(InstrumentedBlobstore::new(
            DiskBlobstore::new(
                root.clone(),
                compression,
                Backpressure::new(permits, BlobstoreKind::Disk),
            )
            .await?,
            observer,
        )),
        BlobstoreConfig::Gcs {
            bucket,
            prefix,
            endpoint,
            bearer_token,
        } => Arc::new(InstrumentedBlobstore::new(
            ObjectStoreBlobstore::new(
                ObjectProvider::gcs(bucket, endpoint.as_deref())?,
                prefix.clone(),
                bearer_token.clone(),
                compression,
                Backpressure::new(permits, BlobstoreKind::Gcs),
            )?,
            observer,
        )),
        BlobstoreConfig::Http {
            base_url,
            prefix,
            bearer_token,
        } => Arc::new(InstrumentedBlobstore::new(
            ObjectStoreBlobstore::new(
                ObjectProvider::http(base_url)?,
                prefix.clone(),
                bearer_token.clone(),
                compression,
                Backpressure::new(permits, BlobstoreKind::Http),
            )?,
            observer,
        )),
        BlobstoreConfig::Memory => Arc::new(InstrumentedBlobstore::new(
            MemoryBlobstore::new(compression, Backpressure::new(permits, BlobstoreKind::Memory)),
            observer,
        )),
    };

    tracing::info!(backend = %store.kind(), "blobstore ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;

    #[tokio::test]
    async fn test_backpressure_limits_and_closes() {
        let bp = Backpressure::new(2, BlobstoreKind::Memory);
        let a = bp.acquire().await.unwrap();
        let _b = bp.acquire().await.unwrap();
        assert_eq!(bp.available(), 0);
        drop(a);
        assert_eq!(bp.available(), 1);

        bp.close();
        let err = bp.acquire().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_from_config_builds_selected_backend() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = CacheConfig {
            blobstore: BlobstoreConfig::Disk {
                root: temp.path().to_path_buf(),
            },
            ..CacheConfig::default()
        };
        let store = from_config(&config, Arc::new(NoopObserver)).await.unwrap();
        assert_eq!(store.kind(), BlobstoreKind::Disk);

        let config = CacheConfig {
            blobstore: BlobstoreConfig::Memory,
            ..CacheConfig::default()
        };
        let store = from_config(&config, Arc::new(NoopObserver)).await.unwrap();
        assert_eq!(store.kind(), BlobstoreKind::Memory);
    }
}
