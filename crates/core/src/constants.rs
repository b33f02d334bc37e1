/// Constants used throughout the remcache codebase
// Instance name segments that would collide with resource name grammar
pub const RESERVED_INSTANCE_SEGMENTS: &[&str] = &[
    "blobs",
    "uploads",
    "actions",
    "actionResults",
    "operations",
    "capabilities",
    "cas",
    "ac",
];

// Storage namespaces
pub const CAS_NAMESPACE: &str = "cas";
pub const AC_NAMESPACE: &str = "ac";

// Resource name keywords
pub const UPLOADS_SEGMENT: &str = "uploads";
pub const BLOBS_SEGMENT: &str = "blobs";

// Size defaults
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_BATCH_TOTAL_SIZE_BYTES: u64 = 4 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_CONCURRENT_BACKEND_OPS: usize = 64;
pub const DEFAULT_EXISTENCE_CACHE_SIZE: usize = 100_000;

/// Seconds a confirmed-present blob is trusted without asking the backend
pub const DEFAULT_EXISTENCE_CACHE_TTL_SECS: u64 = 60;

// Upload session lifetime
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 30;

// Environment variable names
pub const REMCACHE_LISTEN_VAR: &str = "REMCACHE_LISTEN";
pub const REMCACHE_DISK_ROOT_VAR: &str = "REMCACHE_DISK_ROOT";
pub const REMCACHE_DIGEST_FUNCTION_VAR: &str = "REMCACHE_DIGEST_FUNCTION";
pub const REMCACHE_LOG_FORMAT_VAR: &str = "REMCACHE_LOG_FORMAT";

// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8980";
