//! Operation observers
//!
//! CAS, AC and every blobstore report the outcome, size and latency of each
//! operation to a single [`CacheObserver`] created at start-up. Observers only
//! count; they never influence the operation they observe.

mod prometheus;

pub use self::prometheus::PrometheusObserver;

use crate::blobstore::BlobstoreKind;
use remcache_core::{ErrorCode, Result};
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

/// Which cache namespace an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    Cas,
    Action,
}

impl CacheType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cas => "cas",
            Self::Action => "action",
        }
    }
}

impl Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hit/miss/upload classification of a cache event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventType {
    Hit,
    Miss,
    Upload,
}

impl CacheEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Upload => "upload",
        }
    }
}

/// The CAS or AC operation being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Contains,
    FindMissing,
    Get,
    Put,
    Remove,
    GetResult,
    SetResult,
    DeleteResult,
}

impl CacheOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::FindMissing => "find_missing",
            Self::Get => "get",
            Self::Put => "put",
            Self::Remove => "remove",
            Self::GetResult => "get_result",
            Self::SetResult => "set_result",
            Self::DeleteResult => "delete_result",
        }
    }

    /// True for operations that move bytes from the cache to a client
    pub const fn is_download(self) -> bool {
        matches!(self, Self::Get | Self::GetResult)
    }

    /// True for operations that move bytes from a client into the cache
    pub const fn is_upload(self) -> bool {
        matches!(self, Self::Put | Self::SetResult)
    }
}

/// One CAS or AC operation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub operation: CacheOperation,
    pub cache_type: CacheType,
    pub event_type: Option<CacheEventType>,
    pub byte_size: u64,
    pub duration: Duration,
    pub status: ErrorCode,
}

impl CacheEvent {
    /// Build an event from an operation result, classifying NotFound as a miss
    pub fn from_result<T>(
        operation: CacheOperation,
        cache_type: CacheType,
        result: &Result<T>,
        byte_size: u64,
        duration: Duration,
    ) -> Self {
        let (event_type, status) = match result {
            Ok(_) if operation.is_upload() => (Some(CacheEventType::Upload), ErrorCode::Ok),
            Ok(_) => (Some(CacheEventType::Hit), ErrorCode::Ok),
            Err(e) if e.is_not_found() => (Some(CacheEventType::Miss), e.code()),
            Err(e) => (None, e.code()),
        };

        Self {
            operation,
            cache_type,
            event_type,
            byte_size,
            duration,
            status,
        }
    }
}

/// The blobstore operation being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobstoreOperation {
    Read,
    Write,
    Delete,
    Exists,
}

impl BlobstoreOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Exists => "exists",
        }
    }
}

/// One backend call outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobstoreEvent {
    pub operation: BlobstoreOperation,
    pub blobstore_type: BlobstoreKind,
    pub byte_size: u64,
    pub duration: Duration,
    pub status: ErrorCode,
}

/// Sink for cache and blobstore events
pub trait CacheObserver: Send + Sync {
    fn record_cache_event(&self, event: &CacheEvent);
    fn record_blobstore_event(&self, event: &BlobstoreEvent);
}

/// Observer that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {
    fn record_cache_event(&self, _event: &CacheEvent) {}
    fn record_blobstore_event(&self, _event: &BlobstoreEvent) {}
}

/// Observer that emits every event as a debug-level tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn record_cache_event(&self, event: &CacheEvent) {
        tracing::debug!(
            target: "remcache::observer",
            operation = event.operation.as_str(),
            cache_type = event.cache_type.as_str(),
            event_type = event.event_type.map(CacheEventType::as_str).unwrap_or("none"),
            byte_size = event.byte_size,
            duration_us = event.duration.as_micros() as u64,
            status = event.status.as_str(),
            "cache_event"
        );
    }

    fn record_blobstore_event(&self, event: &BlobstoreEvent) {
        tracing::debug!(
            target: "remcache::observer",
            operation = event.operation.as_str(),
            blobstore_type = event.blobstore_type.as_str(),
            byte_size = event.byte_size,
            duration_us = event.duration.as_micros() as u64,
            status = event.status.as_str(),
            "blobstore_event"
        );
    }
}

/// Forwards every event to each wrapped observer in order
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn CacheObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn CacheObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn CacheObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl CacheObserver for FanoutObserver {
    fn record_cache_event(&self, event: &CacheEvent) {
        for observer in &self.observers {
            observer.record_cache_event(event);
        }
    }

    fn record_blobstore_event(&self, event: &BlobstoreEvent) {
        for observer in &self.observers {
            observer.record_blobstore_event(event);
        }
    }
}

/// Observer that keeps every event in memory, for tests
#[derive(Default)]
pub struct RecordingObserver {
    cache_events: parking_lot::Mutex<Vec<CacheEvent>>,
    blobstore_events: parking_lot::Mutex<Vec<BlobstoreEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_events(&self) -> Vec<CacheEvent> {
        self.cache_events.lock().clone()
    }

    pub fn blobstore_events(&self) -> Vec<BlobstoreEvent> {
        self.blobstore_events.lock().clone()
    }
}

impl CacheObserver for RecordingObserver {
    fn record_cache_event(&self, event: &CacheEvent) {
        self.cache_events.lock().push(event.clone());
    }

    fn record_blobstore_event(&self, event: &BlobstoreEvent) {
        self.blobstore_events.lock().push(event.clone());
    }
}
