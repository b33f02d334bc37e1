//! Cache configuration with defaults and validation
//!
//! Every field has a default so an empty JSON object is a complete
//! configuration. Unknown fields are rejected so that typos surface at
//! start-up instead of silently falling back to defaults.

use crate::storage::CompressionConfig;
use remcache_core::{
    DigestFunction, Error, Result, DEFAULT_EXISTENCE_CACHE_SIZE, DEFAULT_EXISTENCE_CACHE_TTL_SECS,
    DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BATCH_TOTAL_SIZE_BYTES, DEFAULT_MAX_CONCURRENT_BACKEND_OPS,
    DEFAULT_READ_CHUNK_SIZE, DEFAULT_REAP_INTERVAL_SECS,
};
use remcache_utils::XdgPaths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration of the cache engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Hash algorithm for every digest in this process
    pub digest_function: DigestFunction,
    /// The single active backend
    pub blobstore: BlobstoreConfig,
    /// Permits shared by every backend call
    pub max_concurrent_backend_ops: usize,
    /// Frame compression
    pub compression: CompressionConfig,
    pub cas: CasConfig,
    pub action_cache: ActionCacheConfig,
    pub bytestream: ByteStreamConfig,
    /// Upper bound on the summed size of a batch request
    pub max_batch_total_size_bytes: u64,
    /// Upper bound on the number of items in a batch request
    pub max_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            digest_function: DigestFunction::default(),
            blobstore: BlobstoreConfig::default(),
            max_concurrent_backend_ops: DEFAULT_MAX_CONCURRENT_BACKEND_OPS,
            compression: CompressionConfig::default(),
            cas: CasConfig::default(),
            action_cache: ActionCacheConfig::default(),
            bytestream: ByteStreamConfig::default(),
            max_batch_total_size_bytes: DEFAULT_MAX_BATCH_TOTAL_SIZE_BYTES,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl CacheConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_backend_ops == 0 {
            return Err(Error::configuration(
                "max_concurrent_backend_ops must be at least 1",
            ));
        }
        if !(1..=22).contains(&self.compression.level) {
            return Err(Error::configuration(format!(
                "compression level {} is outside 1..=22",
                self.compression.level
            )));
        }
        if self.bytestream.read_chunk_size == 0 {
            return Err(Error::configuration(
                "bytestream.read_chunk_size must be positive",
            ));
        }
        if self.bytestream.idle_timeout_secs == 0 || self.bytestream.reap_interval_secs == 0 {
            return Err(Error::configuration(
                "bytestream idle timeout and reap interval must be positive",
            ));
        }
        if self.max_batch_size == 0 || self.max_batch_total_size_bytes == 0 {
            return Err(Error::configuration("batch limits must be positive"));
        }
        self.blobstore.validate()
    }
}

/// Backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum BlobstoreConfig {
    /// Local directory
    Disk { root: PathBuf },
    /// Google Cloud Storage over its JSON/XML object endpoints
    Gcs {
        bucket: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default, serialize_with = "redact_secret")]
        bearer_token: Option<String>,
    },
    /// Generic REST object store (PUT/GET/HEAD/DELETE per object)
    Http {
        base_url: String,
        #[serde(default)]
        prefix: String,
        #[serde(default, serialize_with = "redact_secret")]
        bearer_token: Option<String>,
    },
    /// Process memory; contents are lost on exit
    Memory,
}

impl Default for BlobstoreConfig {
    fn default() -> Self {
        Self::Disk {
            root: XdgPaths::blob_root(),
        }
    }
}

impl BlobstoreConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Disk { root } if root.as_os_str().is_empty() => {
                Err(Error::configuration("disk blobstore root must not be empty"))
            }
            Self::Gcs { bucket, endpoint, .. } => {
                if bucket.is_empty() {
                    return Err(Error::configuration("gcs bucket must not be empty"));
                }
                if let Some(endpoint) = endpoint {
                    url::Url::parse(endpoint).map_err(|e| {
                        Error::configuration(format!("invalid gcs endpoint '{endpoint}': {e}"))
                    })?;
                }
                Ok(())
            }
            Self::Http { base_url, .. } => url::Url::parse(base_url)
                .map(|_| ())
                .map_err(|e| Error::configuration(format!("invalid base_url '{base_url}': {e}"))),
            _ => Ok(()),
        }
    }
}

/// Content-addressable store behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CasConfig {
    /// Re-hash blobs on read and treat a mismatch as corruption
    pub verify_reads: bool,
    /// Re-read the stored copy on a dedup hit and heal it if corrupt
    pub verify_existing_on_put: bool,
    /// Delete objects found to be corrupt so the next upload can heal them
    pub evict_corrupt_entries: bool,
    /// Capacity of the positive existence cache; 0 disables it
    pub existence_cache_size: usize,
    /// Seconds a cached presence is trusted before the backend is asked again
    pub existence_cache_ttl_secs: u64,
    /// Largest blob accepted by put; `None` means unbounded
    pub max_blob_size: Option<u64>,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            verify_reads: false,
            verify_existing_on_put: false,
            evict_corrupt_entries: true,
            existence_cache_size: DEFAULT_EXISTENCE_CACHE_SIZE,
            existence_cache_ttl_secs: DEFAULT_EXISTENCE_CACHE_TTL_SECS,
            max_blob_size: None,
        }
    }
}

impl CasConfig {
    pub fn existence_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.existence_cache_ttl_secs)
    }
}

/// Action cache behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionCacheConfig {
    /// Refuse results whose referenced blobs are absent from the CAS
    pub validate_references: bool,
    /// Report a stored result with dangling references as a miss
    pub validate_on_read: bool,
}

impl Default for ActionCacheConfig {
    fn default() -> Self {
        Self {
            validate_references: true,
            validate_on_read: false,
        }
    }
}

/// Chunked transfer behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ByteStreamConfig {
    /// Largest chunk sent by a download
    pub read_chunk_size: usize,
    /// Sessions idle for longer than this are discarded
    pub idle_timeout_secs: u64,
    /// How often the reaper looks for idle sessions
    pub reap_interval_secs: u64,
    /// Directory holding in-progress upload bytes
    pub spool_dir: PathBuf,
}

impl Default for ByteStreamConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            reap_interval_secs: DEFAULT_REAP_INTERVAL_SECS,
            spool_dir: XdgPaths::spool_dir(),
        }
    }
}

impl ByteStreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// Secrets never leave the process when settings are printed
fn redact_secret<S: serde::Serializer>(
    secret: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some(REDACTED),
        None => serializer.serialize_none(),
    }
}

const REDACTED: &str = "<redacted>";
