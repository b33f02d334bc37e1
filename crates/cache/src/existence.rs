//! Positive existence cache for CAS blobs
//!
//! Remembers `(instance, digest)` pairs recently confirmed present so that
//! repeated `find_missing` calls for the same outputs skip the backend.
//! Only presence is cached and only for `ttl`; absence is always re-checked,
//! so an upload is visible immediately and a blob lost by the backend is
//! reported missing again once its entry expires.

use lru::LruCache;
use parking_lot::RwLock;
use remcache_core::{Digest, InstanceName};
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

type Key = (InstanceName, Digest);

/// Bounded LRU of blobs known to be stored, each entry valid for `ttl`
pub struct ExistenceCache {
    cache: Option<RwLock<LruCache<Key, Instant>>>,
    ttl: Duration,
}

impl ExistenceCache {
    /// A capacity of zero disables the cache
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(|cap| RwLock::new(LruCache::new(cap))),
            ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn contains(&self, instance: &InstanceName, digest: &Digest) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        let key = (instance.clone(), digest.clone());
        let confirmed_at = match cache.read().peek(&key) {
            Some(at) => *at,
            None => return false,
        };
        if confirmed_at.elapsed() < self.ttl {
            return true;
        }
        cache.write().pop(&key);
        false
    }

    pub fn insert(&self, instance: &InstanceName, digest: &Digest) {
        if let Some(cache) = &self.cache {
            cache
                .write()
                .put((instance.clone(), digest.clone()), Instant::now());
        }
    }

    /// Record several confirmed-present digests under one lock
    pub fn insert_many<'a>(
        &self,
        instance: &InstanceName,
        digests: impl IntoIterator<Item = &'a Digest>,
    ) {
        if let Some(cache) = &self.cache {
            let now = Instant::now();
            let mut cache = cache.write();
            for digest in digests {
                cache.put((instance.clone(), digest.clone()), now);
            }
        }
    }

    pub fn invalidate(&self, instance: &InstanceName, digest: &Digest) {
        if let Some(cache) = &self.cache {
            cache.write().pop(&(instance.clone(), digest.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map(|c| c.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
