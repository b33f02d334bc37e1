//! Prometheus metrics for cache and blobstore operations

use super::{BlobstoreEvent, BlobstoreOperation, CacheEvent, CacheObserver};
use prometheus::{
    exponential_buckets, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use remcache_core::{Error, ErrorCode, Result};

const CACHE_TYPE_LABEL: &str = "cache_type";
const CACHE_EVENT_TYPE_LABEL: &str = "cache_event_type";
const BLOBSTORE_TYPE_LABEL: &str = "blobstore_type";
const STATUS_LABEL: &str = "status";

/// Prometheus metrics for cache operations, registered on a private registry
pub struct PrometheusObserver {
    registry: Registry,

    cache_events: CounterVec,
    cache_download_size_bytes: HistogramVec,
    cache_download_duration_usec: HistogramVec,
    cache_upload_size_bytes: HistogramVec,
    cache_upload_duration_usec: HistogramVec,
    cache_errors: CounterVec,

    blobstore_read_count: CounterVec,
    blobstore_read_size_bytes: HistogramVec,
    blobstore_read_duration_usec: HistogramVec,
    blobstore_write_count: CounterVec,
    blobstore_write_size_bytes: HistogramVec,
    blobstore_write_duration_usec: HistogramVec,
    blobstore_delete_count: CounterVec,
    blobstore_delete_duration_usec: HistogramVec,
}

impl PrometheusObserver {
    /// Initialize Prometheus metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_events = counter(
            &registry,
            "remcache_remote_cache_events",
            "Number of cache events handled.",
            &[CACHE_TYPE_LABEL, CACHE_EVENT_TYPE_LABEL],
        )?;
        let cache_download_size_bytes = histogram(
            &registry,
            "remcache_remote_cache_download_size_bytes",
            "Number of bytes downloaded from the remote cache in each download.",
            &[CACHE_TYPE_LABEL],
        )?;
        let cache_download_duration_usec = histogram(
            &registry,
            "remcache_remote_cache_download_duration_usec",
            "Download duration for each file downloaded from the remote cache, in microseconds.",
            &[CACHE_TYPE_LABEL],
        )?;
        let cache_upload_size_bytes = histogram(
            &registry,
            "remcache_remote_cache_upload_size_bytes",
            "Number of bytes uploaded to the remote cache in each upload.",
            &[CACHE_TYPE_LABEL],
        )?;
        let cache_upload_duration_usec = histogram(
            &registry,
            "remcache_remote_cache_upload_duration_usec",
            "Upload duration for each file uploaded to the remote cache, in microseconds.",
            &[CACHE_TYPE_LABEL],
        )?;
        let cache_errors = counter(
            &registry,
            "remcache_cache_errors",
            "Number of cache operations that failed, by status.",
            &[CACHE_TYPE_LABEL, STATUS_LABEL],
        )?;

        let blobstore_read_count = counter(
            &registry,
            "remcache_blobstore_read_count",
            "Number of blobstore reads.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;
        let blobstore_read_size_bytes = histogram(
            &registry,
            "remcache_blobstore_read_size_bytes",
            "Number of bytes read from the blobstore per read.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;
        let blobstore_read_duration_usec = histogram(
            &registry,
            "remcache_blobstore_read_duration_usec",
            "Duration of each blobstore read, in microseconds.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;
        let blobstore_write_count = counter(
            &registry,
            "remcache_blobstore_write_count",
            "Number of blobstore writes.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;
        let blobstore_write_size_bytes = histogram(
            &registry,
            "remcache_blobstore_write_size_bytes",
            "Number of bytes written to the blobstore per write.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;
        let blobstore_write_duration_usec = histogram(
            &registry,
            "remcache_blobstore_write_duration_usec",
            "Duration of each blobstore write, in microseconds.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;
        let blobstore_delete_count = counter(
            &registry,
            "remcache_blobstore_delete_count",
            "Number of blobstore deletes.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;
        let blobstore_delete_duration_usec = histogram(
            &registry,
            "remcache_blobstore_delete_duration_usec",
            "Duration of each blobstore delete, in microseconds.",
            &[BLOBSTORE_TYPE_LABEL],
        )?;

        Ok(Self {
            registry,
            cache_events,
            cache_download_size_bytes,
            cache_download_duration_usec,
            cache_upload_size_bytes,
            cache_upload_duration_usec,
            cache_errors,
            blobstore_read_count,
            blobstore_read_size_bytes,
            blobstore_read_duration_usec,
            blobstore_write_count,
            blobstore_write_size_bytes,
            blobstore_write_duration_usec,
            blobstore_delete_count,
            blobstore_delete_duration_usec,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric family in the Prometheus text format
    pub fn metrics_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::Unknown {
                message: format!("failed to encode metrics: {e}"),
                source: None,
            })?;
        String::from_utf8(buffer).map_err(|e| Error::unknown("metrics are not UTF-8", e))
    }
}

impl CacheObserver for PrometheusObserver {
    fn record_cache_event(&self, event: &CacheEvent) {
        let cache_type = event.cache_type.as_str();

        if let Some(event_type) = event.event_type {
            self.cache_events
                .with_label_values(&[cache_type, event_type.as_str()])
                .inc();
        }

        if event.status == ErrorCode::Ok {
            let usec = event.duration.as_micros() as f64;
            if event.operation.is_download() {
                self.cache_download_size_bytes
                    .with_label_values(&[cache_type])
                    .observe(event.byte_size as f64);
                self.cache_download_duration_usec
                    .with_label_values(&[cache_type])
                    .observe(usec);
            } else if event.operation.is_upload() {
                self.cache_upload_size_bytes
                    .with_label_values(&[cache_type])
                    .observe(event.byte_size as f64);
                self.cache_upload_duration_usec
                    .with_label_values(&[cache_type])
                    .observe(usec);
            }
        } else if event.status != ErrorCode::NotFound {
            self.cache_errors
                .with_label_values(&[cache_type, event.status.as_str()])
                .inc();
        }
    }

    fn record_blobstore_event(&self, event: &BlobstoreEvent) {
        let blobstore_type = event.blobstore_type.as_str();
        let usec = event.duration.as_micros() as f64;

        match event.operation {
            BlobstoreOperation::Read => {
                self.blobstore_read_count
                    .with_label_values(&[blobstore_type])
                    .inc();
                if event.status == ErrorCode::Ok {
                    self.blobstore_read_size_bytes
                        .with_label_values(&[blobstore_type])
                        .observe(event.byte_size as f64);
                }
                self.blobstore_read_duration_usec
                    .with_label_values(&[blobstore_type])
                    .observe(usec);
            }
            BlobstoreOperation::Write => {
                self.blobstore_write_count
                    .with_label_values(&[blobstore_type])
                    .inc();
                if event.status == ErrorCode::Ok {
                    self.blobstore_write_size_bytes
                        .with_label_values(&[blobstore_type])
                        .observe(event.byte_size as f64);
                }
                self.blobstore_write_duration_usec
                    .with_label_values(&[blobstore_type])
                    .observe(usec);
            }
            BlobstoreOperation::Delete => {
                self.blobstore_delete_count
                    .with_label_values(&[blobstore_type])
                    .inc();
                self.blobstore_delete_duration_usec
                    .with_label_values(&[blobstore_type])
                    .observe(usec);
            }
            BlobstoreOperation::Exists => {}
        }
    }
}

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<CounterVec> {
    let vec = CounterVec::new(Opts::new(name, help), labels).map_err(registration_error)?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(registration_error)?;
    Ok(vec)
}

fn histogram(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<HistogramVec> {
    // 1, 10, 100, ... 100_000_000
    let buckets = exponential_buckets(1.0, 10.0, 9).map_err(registration_error)?;
    let vec = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .map_err(registration_error)?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(registration_error)?;
    Ok(vec)
}

fn registration_error(e: prometheus::Error) -> Error {
    Error::configuration(format!("failed to register metric: {e}"))
}
