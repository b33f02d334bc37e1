//! Observer-reporting wrapper around any backend

use super::{Blobstore, BlobstoreKind};
use crate::observer::{BlobstoreEvent, BlobstoreOperation, CacheObserver};
use crate::storage::BlobKey;
use async_trait::async_trait;
use remcache_core::{ErrorCode, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, Instrument};

/// Reports every backend call to the observer
pub struct InstrumentedBlobstore<B> {
    inner: B,
    observer: Arc<dyn CacheObserver>,
}

impl<B: Blobstore> InstrumentedBlobstore<B> {
    pub fn new(inner: B, observer: Arc<dyn CacheObserver>) -> Self {
        Self { inner, observer }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn report<T>(
        &self,
        operation: BlobstoreOperation,
        key: &BlobKey,
        started: Instant,
        byte_size: u64,
        result: &Result<T>,
    ) {
        let status = match result {
            Ok(_) => ErrorCode::Ok,
            Err(e) => {
                // Misses are expected and stay quiet
                if !e.is_not_found() {
                    error!(
                        backend = %self.inner.kind(),
                        operation = operation.as_str(),
                        key = %key,
                        error = %e,
                        "blobstore operation failed"
                    );
                }
                e.code()
            }
        };

        self.observer.record_blobstore_event(&BlobstoreEvent {
            operation,
            blobstore_type: self.inner.kind(),
            byte_size,
            duration: started.elapsed(),
            status,
        });
    }
}

#[async_trait]
impl<B: Blobstore> Blobstore for InstrumentedBlobstore<B> {
    fn kind(&self) -> BlobstoreKind {
        self.inner.kind()
    }

    async fn write(&self, key: &BlobKey, data: &[u8]) -> Result<u64> {
        let started = Instant::now();
        let span = tracing::debug_span!("blobstore_write", key = %key, bytes = data.len());
        let result = self.inner.write(key, data).instrument(span).await;
        self.report(
            BlobstoreOperation::Write,
            key,
            started,
            data.len() as u64,
            &result,
        );
        result
    }

    async fn read(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let started = Instant::now();
        let span = tracing::debug_span!("blobstore_read", key = %key);
        let result = self.inner.read(key).instrument(span).await;
        let size = result.as_ref().map(|d| d.len() as u64).unwrap_or(0);
        self.report(BlobstoreOperation::Read, key, started, size, &result);
        result
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.delete(key).await;
        self.report(BlobstoreOperation::Delete, key, started, 0, &result);
        result
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let started = Instant::now();
        let result = self.inner.exists(key).await;
        self.report(BlobstoreOperation::Exists, key, started, 0, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobstore;
    use crate::observer::RecordingObserver;
    use remcache_core::{DigestFunction, InstanceName};

    #[tokio::test]
    async fn test_reports_each_call() {
        let observer = Arc::new(RecordingObserver::new());
        let store = InstrumentedBlobstore::new(MemoryBlobstore::unbounded(), observer.clone());
        let key = BlobKey::cas(
            &InstanceName::default_instance(),
            &DigestFunction::Sha256.compute(b"abc"),
        );

        store.write(&key, b"abc").await.unwrap();
        store.read(&key).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.read(&key).await.is_err());

        let events = observer.blobstore_events();
        let ops: Vec<_> = events.iter().map(|e| e.operation).collect();
        assert_eq!(
            ops,
            vec![
                BlobstoreOperation::Write,
                BlobstoreOperation::Read,
                BlobstoreOperation::Delete,
                BlobstoreOperation::Read,
            ]
        );
        assert_eq!(events[0].byte_size, 3);
        assert_eq!(events[1].byte_size, 3);
        assert_eq!(events[3].status, ErrorCode::NotFound);
        assert!(events.iter().all(|e| e.blobstore_type == BlobstoreKind::Memory));
    }
}
