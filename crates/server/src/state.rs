//! Process-wide server state

use crate::settings::ServerSettings;
use remcache_cache::{
    CacheConfig, CacheEngine, CacheObserver, FanoutObserver, PrometheusObserver, TracingObserver,
};
use remcache_core::{DigestFunction, Result};
use std::sync::Arc;
use tracing::info;

/// Everything a request handler needs, built once at start-up
pub struct AppState {
    pub engine: CacheEngine,
    pub metrics: Option<Arc<PrometheusObserver>>,
    pub digest_function: DigestFunction,
    pub max_batch_total_size_bytes: u64,
}

impl AppState {
    /// Observer registry, then blobstore, CAS, AC and ByteStream
    pub async fn build(settings: &ServerSettings) -> Result<Self> {
        let mut observers = FanoutObserver::new(vec![Arc::new(TracingObserver)]);
        let metrics = if settings.metrics {
            let prometheus = Arc::new(PrometheusObserver::new()?);
            observers.push(prometheus.clone());
            Some(prometheus)
        } else {
            None
        };
        info!(observers = observers.len(), metrics = settings.metrics, "observers registered");

        Self::with_observer(&settings.cache, Arc::new(observers), metrics).await
    }

    pub async fn with_observer(
        config: &CacheConfig,
        observer: Arc<dyn CacheObserver>,
        metrics: Option<Arc<PrometheusObserver>>,
    ) -> Result<Self> {
        let engine = CacheEngine::from_config(config, observer).await?;
        Ok(Self {
            engine,
            metrics,
            digest_function: config.digest_function,
            max_batch_total_size_bytes: config.max_batch_total_size_bytes,
        })
    }
}
