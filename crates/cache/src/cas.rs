//! Content-addressable store
//!
//! The single source of truth mapping a digest to its bytes. Every write is
//! re-hashed before it reaches the backend, so the store never holds content
//! under a digest that does not describe it. Reads check the stored length
//! (and optionally the hash) and report disagreement as corruption, never as
//! a plain miss.

use crate::blobstore::Blobstore;
use crate::config::{CacheConfig, CasConfig};
use crate::existence::ExistenceCache;
use crate::observer::{CacheEvent, CacheEventType, CacheObserver, CacheOperation, CacheType};
use crate::storage::BlobKey;
use futures::future::{join_all, try_join_all};
use remcache_core::{Digest, DigestFunction, Error, ErrorCode, InstanceName, Result};
use remcache_utils::operation_span;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn, Instrument};

/// Whether a presence check may be answered from the existence cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Cached,
    Backend,
}

/// Content-addressable blob storage on top of a [`Blobstore`]
pub struct ContentAddressableStore {
    blobstore: Arc<dyn Blobstore>,
    observer: Arc<dyn CacheObserver>,
    digest_function: DigestFunction,
    empty_digest: Digest,
    config: CasConfig,
    max_batch_total_size_bytes: u64,
    max_batch_size: usize,
    existence: ExistenceCache,
}

impl ContentAddressableStore {
    pub fn new(
        blobstore: Arc<dyn Blobstore>,
        observer: Arc<dyn CacheObserver>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            blobstore,
            observer,
            digest_function: config.digest_function,
            empty_digest: config.digest_function.empty_digest(),
            config: config.cas.clone(),
            max_batch_total_size_bytes: config.max_batch_total_size_bytes,
            max_batch_size: config.max_batch_size,
            existence: ExistenceCache::new(
                config.cas.existence_cache_size,
                config.cas.existence_cache_ttl(),
            ),
        }
    }

    pub fn digest_function(&self) -> DigestFunction {
        self.digest_function
    }

    pub fn max_batch_total_size_bytes(&self) -> u64 {
        self.max_batch_total_size_bytes
    }

    /// True for the zero-length blob, which is never stored
    pub fn is_empty_blob(&self, digest: &Digest) -> bool {
        *digest == self.empty_digest
    }

    /// Whether the blob is stored for this instance
    pub async fn contains(&self, instance: &InstanceName, digest: &Digest) -> Result<bool> {
        let started = Instant::now();
        let result = self.contains_inner(instance, digest).await;

        let event_type = match &result {
            Ok(true) => Some(CacheEventType::Hit),
            Ok(false) => Some(CacheEventType::Miss),
            Err(_) => None,
        };
        self.observer.record_cache_event(&CacheEvent {
            operation: CacheOperation::Contains,
            cache_type: CacheType::Cas,
            event_type,
            byte_size: 0,
            duration: started.elapsed(),
            status: result.as_ref().map(|_| ErrorCode::Ok).unwrap_or_else(Error::code),
        });
        result
    }

    async fn contains_inner(&self, instance: &InstanceName, digest: &Digest) -> Result<bool> {
        self.digest_function.validate(digest)?;
        if self.is_empty_blob(digest) || self.existence.contains(instance, digest) {
            return Ok(true);
        }

        let present = self.blobstore.exists(&BlobKey::cas(instance, digest)).await?;
        if present {
            self.existence.insert(instance, digest);
        }
        Ok(present)
    }

    /// The subset of `digests` not currently stored, in request order and
    /// without duplicates
    pub async fn find_missing(
        &self,
        instance: &InstanceName,
        digests: &[Digest],
    ) -> Result<Vec<Digest>> {
        self.find_missing_with(instance, digests, Lookup::Cached).await
    }

    /// Like [`find_missing`](Self::find_missing), but every digest is
    /// confirmed with the backend instead of the existence cache
    pub async fn find_missing_uncached(
        &self,
        instance: &InstanceName,
        digests: &[Digest],
    ) -> Result<Vec<Digest>> {
        self.find_missing_with(instance, digests, Lookup::Backend).await
    }

    async fn find_missing_with(
        &self,
        instance: &InstanceName,
        digests: &[Digest],
        lookup: Lookup,
    ) -> Result<Vec<Digest>> {
        let started = Instant::now();
        let span = operation_span("find_missing", instance, &format!("{} digests", digests.len()));
        let result = self
            .find_missing_inner(instance, digests, lookup)
            .instrument(span)
            .await;

        match &result {
            Ok(missing) => {
                let duration = started.elapsed();
                let missing_set: HashSet<&Digest> = missing.iter().collect();
                for digest in digests {
                    let event_type = if missing_set.contains(digest) {
                        CacheEventType::Miss
                    } else {
                        CacheEventType::Hit
                    };
                    self.observer.record_cache_event(&CacheEvent {
                        operation: CacheOperation::FindMissing,
                        cache_type: CacheType::Cas,
                        event_type: Some(event_type),
                        byte_size: 0,
                        duration,
                        status: ErrorCode::Ok,
                    });
                }
            }
            Err(e) => self.observer.record_cache_event(&CacheEvent {
                operation: CacheOperation::FindMissing,
                cache_type: CacheType::Cas,
                event_type: None,
                byte_size: 0,
                duration: started.elapsed(),
                status: e.code(),
            }),
        }
        result
    }

    async fn find_missing_inner(
        &self,
        instance: &InstanceName,
        digests: &[Digest],
        lookup: Lookup,
    ) -> Result<Vec<Digest>> {
        for digest in digests {
            self.digest_function.validate(digest)?;
        }

        let mut seen = HashSet::with_capacity(digests.len());
        let unknown: Vec<&Digest> = digests
            .iter()
            .filter(|d| seen.insert(*d))
            .filter(|d| !self.is_empty_blob(d))
            .filter(|d| lookup == Lookup::Backend || !self.existence.contains(instance, d))
            .collect();

        if unknown.is_empty() {
            return Ok(Vec::new());
        }

        let checks = unknown.iter().map(|digest| async move {
            let present = self
                .blobstore
                .exists(&BlobKey::cas(instance, digest))
                .await?;
            Ok::<_, Error>((*digest, present))
        });
        let outcomes = try_join_all(checks).await?;

        self.existence.insert_many(
            instance,
            outcomes.iter().filter(|(_, present)| *present).map(|(d, _)| *d),
        );
        for (digest, _) in outcomes.iter().filter(|(_, present)| !present) {
            self.existence.invalidate(instance, digest);
        }

        let missing: Vec<Digest> = outcomes
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(d, _)| d.clone())
            .collect();
        debug!(
            queried = digests.len(),
            missing = missing.len(),
            "find_missing"
        );
        Ok(missing)
    }

    /// The exact bytes stored under `digest`
    pub async fn get(&self, instance: &InstanceName, digest: &Digest) -> Result<Vec<u8>> {
        let started = Instant::now();
        let key = BlobKey::cas(instance, digest);
        let span = operation_span("cas_get", instance, key.as_str());
        let result = self.get_inner(instance, digest, &key).instrument(span).await;

        let size = result.as_ref().map(|d| d.len() as u64).unwrap_or(0);
        self.observer.record_cache_event(&CacheEvent::from_result(
            CacheOperation::Get,
            CacheType::Cas,
            &result,
            size,
            started.elapsed(),
        ));
        result
    }

    async fn get_inner(
        &self,
        instance: &InstanceName,
        digest: &Digest,
        key: &BlobKey,
    ) -> Result<Vec<u8>> {
        self.digest_function.validate(digest)?;
        if self.is_empty_blob(digest) {
            return Ok(Vec::new());
        }

        let data = match self.blobstore.read(key).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                debug!(digest = %digest, "cas miss");
                self.existence.invalidate(instance, digest);
                return Err(Error::blob_not_found(digest.to_string()));
            }
            Err(e) if e.is_corruption() => {
                return Err(self.corrupt(instance, digest, key, e.to_string()).await);
            }
            Err(e) => return Err(e),
        };

        if data.len() as u64 != digest.len() {
            let reason = format!(
                "stored length {} does not match declared size {}",
                data.len(),
                digest.size_bytes
            );
            return Err(self.corrupt(instance, digest, key, reason).await);
        }

        if self.config.verify_reads {
            let actual = self.digest_function.compute(&data);
            if actual != *digest {
                let reason = format!("stored bytes hash to {actual}");
                return Err(self.corrupt(instance, digest, key, reason).await);
            }
        }

        Ok(data)
    }

    /// A slice of the stored blob; a `limit` of zero reads to the end
    pub async fn get_range(
        &self,
        instance: &InstanceName,
        digest: &Digest,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<u8>> {
        if offset < 0 || offset > digest.size_bytes {
            return Err(Error::InvalidOffset {
                resource: digest.to_string(),
                offset,
                committed_size: digest.size_bytes,
            });
        }
        if limit < 0 {
            return Err(Error::invalid_argument(format!(
                "read limit {limit} must not be negative"
            )));
        }

        let data = self.get(instance, digest).await?;
        let start = offset as usize;
        let end = if limit == 0 {
            data.len()
        } else {
            start.saturating_add(limit as usize).min(data.len())
        };
        Ok(data[start..end].to_vec())
    }

    /// Store `data` under `digest` after verifying that it hashes to it.
    /// Storing an already-present digest is a successful no-op.
    pub async fn put(&self, instance: &InstanceName, digest: &Digest, data: &[u8]) -> Result<()> {
        let started = Instant::now();
        let key = BlobKey::cas(instance, digest);
        let span = operation_span("cas_put", instance, key.as_str());
        let result = self.put_inner(instance, digest, data, &key).instrument(span).await;

        self.observer.record_cache_event(&CacheEvent::from_result(
            CacheOperation::Put,
            CacheType::Cas,
            &result,
            data.len() as u64,
            started.elapsed(),
        ));
        result
    }

    async fn put_inner(
        &self,
        instance: &InstanceName,
        digest: &Digest,
        data: &[u8],
        key: &BlobKey,
    ) -> Result<()> {
        self.digest_function.validate(digest)?;

        if let Some(max) = self.config.max_blob_size {
            if data.len() as u64 > max {
                return Err(Error::invalid_argument(format!(
                    "blob of {} bytes exceeds the {max} byte limit",
                    data.len()
                )));
            }
        }

        let actual = self.digest_function.compute(data);
        if actual != *digest {
            return Err(Error::DigestMismatch {
                expected: digest.clone(),
                actual,
            });
        }

        if self.is_empty_blob(digest) {
            return Ok(());
        }

        // Dedup on the backend's answer only; the existence cache may be stale
        if self.blobstore.exists(key).await? {
            if !self.config.verify_existing_on_put || self.stored_copy_is_intact(digest, key).await? {
                debug!(digest = %digest, "cas put deduplicated");
                self.existence.insert(instance, digest);
                return Ok(());
            }
            warn!(digest = %digest, "overwriting corrupt stored copy");
        }

        self.blobstore.write(key, data).await?;
        self.existence.insert(instance, digest);
        debug!(digest = %digest, "cas put");
        Ok(())
    }

    /// Whether the stored object still hashes to its key; errors other than
    /// corruption and absence propagate
    async fn stored_copy_is_intact(&self, digest: &Digest, key: &BlobKey) -> Result<bool> {
        match self.blobstore.read(key).await {
            Ok(stored) => Ok(self.digest_function.compute(&stored) == *digest),
            Err(e) if e.is_corruption() || e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Administrative removal; removing an absent blob succeeds
    pub async fn remove(&self, instance: &InstanceName, digest: &Digest) -> Result<()> {
        let started = Instant::now();
        self.digest_function.validate(digest)?;
        self.existence.invalidate(instance, digest);
        let result = if self.is_empty_blob(digest) {
            Ok(())
        } else {
            self.blobstore.delete(&BlobKey::cas(instance, digest)).await
        };

        self.observer.record_cache_event(&CacheEvent {
            operation: CacheOperation::Remove,
            cache_type: CacheType::Cas,
            event_type: None,
            byte_size: 0,
            duration: started.elapsed(),
            status: result.as_ref().map(|_| ErrorCode::Ok).unwrap_or_else(Error::code),
        });
        result
    }

    /// Store several small blobs, reporting a status per blob
    pub async fn batch_update(
        &self,
        instance: &InstanceName,
        items: Vec<(Digest, Vec<u8>)>,
    ) -> Result<Vec<(Digest, Result<()>)>> {
        self.check_batch_count(items.len())?;
        let total: u64 = items.iter().map(|(_, data)| data.len() as u64).sum();
        self.check_batch_total(total)?;

        let futures = items.into_iter().map(|(digest, data)| async move {
            let result = self.put(instance, &digest, &data).await;
            (digest, result)
        });
        Ok(join_all(futures).await)
    }

    /// Read several small blobs, reporting a status per blob
    pub async fn batch_read(
        &self,
        instance: &InstanceName,
        digests: Vec<Digest>,
    ) -> Result<Vec<(Digest, Result<Vec<u8>>)>> {
        self.check_batch_count(digests.len())?;
        let total: u64 = digests.iter().map(Digest::len).sum();
        self.check_batch_total(total)?;

        let futures = digests.into_iter().map(|digest| async move {
            let result = self.get(instance, &digest).await;
            (digest, result)
        });
        Ok(join_all(futures).await)
    }

    fn check_batch_count(&self, count: usize) -> Result<()> {
        if count > self.max_batch_size {
            return Err(Error::invalid_argument(format!(
                "batch of {count} items exceeds the limit of {}",
                self.max_batch_size
            )));
        }
        Ok(())
    }

    fn check_batch_total(&self, total: u64) -> Result<()> {
        if total > self.max_batch_total_size_bytes {
            return Err(Error::invalid_argument(format!(
                "batch of {total} bytes exceeds the limit of {} bytes",
                self.max_batch_total_size_bytes
            )));
        }
        Ok(())
    }

    /// Log, optionally evict, and build the error for a corrupt object
    async fn corrupt(
        &self,
        instance: &InstanceName,
        digest: &Digest,
        key: &BlobKey,
        reason: String,
    ) -> Error {
        warn!(digest = %digest, key = %key, %reason, "corrupt CAS entry");
        self.existence.invalidate(instance, digest);

        if self.config.evict_corrupt_entries {
            if let Err(e) = self.blobstore.delete(key).await {
                warn!(key = %key, error = %e, "failed to evict corrupt entry");
            }
        }

        Error::corrupt(key.as_str(), reason)
    }
}
