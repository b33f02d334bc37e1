//! Cache engine for remcache
//!
//! This crate provides the storage side of a remote build cache:
//! - Content-addressable blob storage with integrity checks
//! - An action cache that refuses dangling output references
//! - Resumable chunked uploads and stateless ranged downloads
//! - Interchangeable disk, object-store and in-memory backends
//! - Operation observers, including Prometheus metrics

pub mod action_cache;
pub mod blobstore;
pub mod bytestream;
pub mod cas;
pub mod config;
pub mod existence;
pub mod observer;
pub mod storage;

pub use action_cache::ActionCache;
pub use blobstore::{Backpressure, Blobstore, BlobstoreKind};
pub use bytestream::{ByteStreamService, DownloadResource, UploadResource, WriteStatus};
pub use cas::ContentAddressableStore;
pub use config::{ActionCacheConfig, BlobstoreConfig, ByteStreamConfig, CacheConfig, CasConfig};
pub use observer::{
    CacheEvent, CacheObserver, FanoutObserver, NoopObserver, PrometheusObserver, TracingObserver,
};
pub use storage::{BlobKey, CompressionConfig};

use remcache_core::Result;
use std::sync::Arc;

/// Fully wired cache engine sharing one observer and one backend
pub struct CacheEngine {
    pub cas: Arc<ContentAddressableStore>,
    pub action_cache: Arc<ActionCache>,
    pub bytestream: Arc<ByteStreamService>,
    pub blobstore: Arc<dyn Blobstore>,
}

impl CacheEngine {
    /// Build the engine from validated configuration
    pub async fn from_config(config: &CacheConfig, observer: Arc<dyn CacheObserver>) -> Result<Self> {
        config.validate()?;

        let blobstore = blobstore::from_config(config, observer.clone()).await?;
        let cas = Arc::new(ContentAddressableStore::new(
            blobstore.clone(),
            observer.clone(),
            config,
        ));
        let action_cache = Arc::new(ActionCache::new(
            blobstore.clone(),
            cas.clone(),
            observer,
            config.action_cache.clone(),
        ));
        let bytestream = Arc::new(ByteStreamService::new(cas.clone(), config.bytestream.clone()));

        tracing::info!(
            digest_function = %config.digest_function,
            backend = %blobstore.kind(),
            "cache engine ready"
        );
        Ok(Self {
            cas,
            action_cache,
            bytestream,
            blobstore,
        })
    }
}
