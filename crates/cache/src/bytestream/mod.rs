//! Resumable chunked transfer of large blobs
//!
//! Uploads are explicit sessions keyed by resource name. Each chunk must
//! start exactly at the session's committed size; the final chunk triggers
//! verification of the assembled bytes and a [`ContentAddressableStore::put`].
//! Downloads are stateless and served straight from the CAS.

mod resource;
mod session;

pub use resource::{DownloadResource, UploadResource};

use crate::cas::ContentAddressableStore;
use crate::config::ByteStreamConfig;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use remcache_core::{Error, Result};
use session::{SessionState, UploadSession};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upload progress as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStatus {
    pub committed_size: i64,
    pub complete: bool,
}

impl WriteStatus {
    const fn unknown() -> Self {
        Self {
            committed_size: 0,
            complete: false,
        }
    }

    const fn complete(size: i64) -> Self {
        Self {
            committed_size: size,
            complete: true,
        }
    }
}

type SessionHandle = Arc<Mutex<UploadSession>>;

/// Upload session table plus the download path
pub struct ByteStreamService {
    cas: Arc<ContentAddressableStore>,
    config: ByteStreamConfig,
    sessions: DashMap<String, SessionHandle>,
}

impl ByteStreamService {
    pub fn new(cas: Arc<ContentAddressableStore>, config: ByteStreamConfig) -> Self {
        Self {
            cas,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Sessions currently tracked, including completed ones not yet reaped
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply one chunk of an upload
    pub async fn write(
        &self,
        resource_name: &str,
        offset: i64,
        data: &[u8],
        finish: bool,
    ) -> Result<WriteStatus> {
        let resource = UploadResource::parse(resource_name, self.cas.digest_function())?;
        let key = resource.session_key();

        loop {
            let existing = self.sessions.get(&key).map(|entry| entry.value().clone());
            let handle = match existing {
                Some(handle) => handle,
                None => {
                    // An empty opening write for a stored blob has nothing to verify.
                    // Any write that carries bytes is hashed like every other upload.
                    if offset == 0
                        && data.is_empty()
                        && !finish
                        && self.cas.contains(&resource.instance, &resource.digest).await?
                    {
                        debug!(resource = %key, "upload of stored blob short-circuited");
                        return Ok(WriteStatus::complete(resource.digest.size_bytes));
                    }
                    self.sessions
                        .entry(key.clone())
                        .or_insert_with(|| {
                            Arc::new(Mutex::new(UploadSession::new(resource.digest.clone())))
                        })
                        .value()
                        .clone()
                }
            };

            let mut session = handle.lock().await;
            if session.is_discarded() {
                continue;
            }
            session.touch();
            return self
                .apply_chunk(&resource, &key, &handle, &mut session, offset, data, finish)
                .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_chunk(
        &self,
        resource: &UploadResource,
        key: &str,
        handle: &SessionHandle,
        session: &mut UploadSession,
        offset: i64,
        data: &[u8],
        finish: bool,
    ) -> Result<WriteStatus> {
        let size = resource.digest.size_bytes;
        if session.is_complete() {
            return Ok(WriteStatus::complete(size));
        }

        if offset != session.committed_size {
            debug!(resource = %key, offset, committed = session.committed_size, "offset mismatch");
            return Err(Error::InvalidOffset {
                resource: key.to_string(),
                offset,
                committed_size: session.committed_size,
            });
        }

        let new_size = session.committed_size + data.len() as i64;
        if new_size > size {
            self.discard(key, handle, session).await;
            return Err(Error::invalid_argument(format!(
                "write of {} bytes at offset {offset} exceeds declared size {size} of '{key}'",
                data.len()
            )));
        }

        let digest_function = self.cas.digest_function();
        if let Err(e) = session
            .append(&self.config.spool_dir, digest_function, data)
            .await
        {
            self.discard(key, handle, session).await;
            return Err(e);
        }

        if !finish {
            return Ok(WriteStatus {
                committed_size: session.committed_size,
                complete: false,
            });
        }

        let received = session.received_digest(digest_function);
        if received != resource.digest {
            warn!(resource = %key, expected = %resource.digest, actual = %received, "upload digest mismatch");
            self.discard(key, handle, session).await;
            return Err(Error::DigestMismatch {
                expected: resource.digest.clone(),
                actual: received,
            });
        }

        let bytes = match session.take_spool(SessionState::Discarded) {
            Some(spool) => spool.into_bytes().await,
            None => Ok(Vec::new()),
        };
        let committed = match bytes {
            Ok(bytes) => self.cas.put(&resource.instance, &resource.digest, &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            self.discard(key, handle, session).await;
            return Err(e);
        }

        session.state = SessionState::Complete;
        info!(resource = %key, size, "upload committed");
        Ok(WriteStatus::complete(size))
    }

    /// Drop a session from the table and release its spool
    async fn discard(&self, key: &str, handle: &SessionHandle, session: &mut UploadSession) {
        self.sessions.remove_if(key, |_, v| Arc::ptr_eq(v, handle));
        if let Some(spool) = session.take_spool(SessionState::Discarded) {
            spool.discard().await;
        }
    }

    /// Committed size of an upload; 0 for a resource nobody is writing
    pub async fn query_write_status(&self, resource_name: &str) -> Result<WriteStatus> {
        let resource = UploadResource::parse(resource_name, self.cas.digest_function())?;
        let key = resource.session_key();

        let handle = self.sessions.get(&key).map(|entry| entry.value().clone());
        if let Some(handle) = handle {
            let session = handle.lock().await;
            if session.is_complete() {
                return Ok(WriteStatus::complete(resource.digest.size_bytes));
            }
            if !session.is_discarded() {
                return Ok(WriteStatus {
                    committed_size: session.committed_size,
                    complete: false,
                });
            }
        }

        if self.cas.contains(&resource.instance, &resource.digest).await? {
            return Ok(WriteStatus::complete(resource.digest.size_bytes));
        }
        Ok(WriteStatus::unknown())
    }

    /// Abort an upload; returns whether a session existed
    pub async fn cancel(&self, resource_name: &str) -> Result<bool> {
        let resource = UploadResource::parse(resource_name, self.cas.digest_function())?;
        let key = resource.session_key();

        let Some((_, handle)) = self.sessions.remove(&key) else {
            return Ok(false);
        };
        let mut session = handle.lock().await;
        if let Some(spool) = session.take_spool(SessionState::Discarded) {
            spool.discard().await;
        }
        debug!(resource = %key, "upload cancelled");
        Ok(true)
    }

    /// Discard sessions idle for longer than the configured timeout
    pub async fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let candidates: Vec<(String, SessionHandle)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut reaped = 0;
        for (key, handle) in candidates {
            // A locked session is mid-chunk, so not idle
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            if session.last_activity.elapsed() <= idle_timeout {
                continue;
            }

            if !session.is_complete() {
                warn!(resource = %key, committed = session.committed_size, "abandoned upload discarded");
            }
            self.discard(&key, &handle, &mut session).await;
            reaped += 1;
        }
        reaped
    }

    /// Periodically reap idle sessions until the service is dropped
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        let period = self.config.reap_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                let reaped = service.reap_idle().await;
                if reaped > 0 {
                    info!(reaped, remaining = service.session_count(), "reaped idle upload sessions");
                }
            }
        })
    }

    /// Stream a blob, or a window of it, in chunks of at most `read_chunk_size`.
    /// A `limit` of zero reads to the end.
    pub async fn read(
        &self,
        resource_name: &str,
        offset: i64,
        limit: i64,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let resource = DownloadResource::parse(resource_name, self.cas.digest_function())?;
        let data = Bytes::from(
            self.cas
                .get_range(&resource.instance, &resource.digest, offset, limit)
                .await?,
        );

        let chunk_size = self.config.read_chunk_size.max(1);
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        debug!(resource = %resource, offset, chunks = chunks.len(), "read");
        Ok(stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobstore;
    use crate::config::CacheConfig;
    use crate::observer::NoopObserver;
    use futures::TryStreamExt;
    use remcache_core::{Digest, DigestFunction, InstanceName};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _spool: TempDir,
        backend: Arc<MemoryBlobstore>,
        cas: Arc<ContentAddressableStore>,
        service: Arc<ByteStreamService>,
    }

    fn fixture() -> Fixture {
        let spool = TempDir::new().unwrap();
        let mut config = CacheConfig::default();
        config.bytestream.spool_dir = spool.path().to_path_buf();
        config.bytestream.idle_timeout_secs = 1;
        config.bytestream.read_chunk_size = 4;

        let backend = Arc::new(MemoryBlobstore::unbounded());
        let cas = Arc::new(ContentAddressableStore::new(
            backend.clone(),
            Arc::new(NoopObserver),
            &config,
        ));
        let service = Arc::new(ByteStreamService::new(cas.clone(), config.bytestream));
        Fixture {
            _spool: spool,
            backend,
            cas,
            service,
        }
    }

    fn upload_name(id: &str, digest: &Digest) -> String {
        format!("uploads/{id}/blobs/{}/{}", digest.hash, digest.size_bytes)
    }

    #[tokio::test]
    async fn test_chunked_upload_commits_on_finish() {
        let f = fixture();
        let data = b"0123456789";
        let digest = DigestFunction::Sha256.compute(data);
        let name = upload_name("u1", &digest);
        let instance = InstanceName::default_instance();

        let status = f.service.write(&name, 0, &data[..4], false).await.unwrap();
        assert_eq!(status.committed_size, 4);
        assert!(!status.complete);
        // nothing visible before finish
        assert!(!f.cas.contains(&instance, &digest).await.unwrap());

        let status = f.service.write(&name, 4, &data[4..], true).await.unwrap();
        assert_eq!(status, WriteStatus::complete(10));
        assert_eq!(f.cas.get(&instance, &digest).await.unwrap(), data);

        let status = f.service.query_write_status(&name).await.unwrap();
        assert!(status.complete);
    }

    #[tokio::test]
    async fn test_offset_mismatch_reports_committed_size() {
        let f = fixture();
        let digest = DigestFunction::Sha256.compute(b"abcdef");
        let name = upload_name("u1", &digest);

        f.service.write(&name, 0, b"abc", false).await.unwrap();
        let err = f.service.write(&name, 5, b"f", false).await.unwrap_err();
        match err {
            Error::InvalidOffset { committed_size, .. } => assert_eq!(committed_size, 3),
            other => panic!("unexpected error {other:?}"),
        }

        // the session survives and can resume
        let status = f.service.write(&name, 3, b"def", true).await.unwrap();
        assert!(status.complete);
    }

    #[tokio::test]
    async fn test_overrun_discards_session() {
        let f = fixture();
        let digest = DigestFunction::Sha256.compute(b"abc");
        let name = upload_name("u1", &digest);

        let err = f.service.write(&name, 0, b"abcd", false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert_eq!(f.service.query_write_status(&name).await.unwrap(), WriteStatus::unknown());
    }

    #[tokio::test]
    async fn test_finish_short_is_mismatch() {
        let f = fixture();
        let digest = DigestFunction::Sha256.compute(b"abcdef");
        let name = upload_name("u1", &digest);

        let err = f.service.write(&name, 0, b"abc", true).await.unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
        assert_eq!(f.service.session_count(), 0);
        assert!(f.backend.is_empty());
    }

    #[tokio::test]
    async fn test_finish_wrong_bytes_is_mismatch() {
        let f = fixture();
        let digest = DigestFunction::Sha256.compute(b"abcdef");
        let name = upload_name("u1", &digest);

        let err = f.service.write(&name, 0, b"abcdeX", true).await.unwrap_err();
        match err {
            Error::DigestMismatch { expected, actual } => {
                assert_eq!(expected, digest);
                assert_eq!(actual, DigestFunction::Sha256.compute(b"abcdeX"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(f.backend.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_bytes_for_stored_digest_are_rejected() {
        let f = fixture();
        let instance = InstanceName::default_instance();
        let data = b"genuine content";
        let digest = DigestFunction::Sha256.compute(data);
        f.cas.put(&instance, &digest, data).await.unwrap();

        let name = upload_name("late", &digest);
        let err = f.service.write(&name, 0, b"XXXXXXXXXXXXXXX", true).await.unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
        assert_eq!(f.service.session_count(), 0);
        assert_eq!(f.cas.get(&instance, &digest).await.unwrap(), data);

        // the genuine bytes on a fresh session are accepted as a no-op
        let writes = f.backend.calls().writes.load(std::sync::atomic::Ordering::Relaxed);
        let status = f.service.write(&upload_name("again", &digest), 0, data, true).await.unwrap();
        assert_eq!(status, WriteStatus::complete(15));
        assert_eq!(
            f.backend.calls().writes.load(std::sync::atomic::Ordering::Relaxed),
            writes
        );
    }

    #[tokio::test]
    async fn test_empty_opening_write_for_stored_digest_completes() {
        let f = fixture();
        let data = b"already here";
        let digest = DigestFunction::Sha256.compute(data);
        f.cas
            .put(&InstanceName::default_instance(), &digest, data)
            .await
            .unwrap();

        let status = f.service.write(&upload_name("u1", &digest), 0, b"", false).await.unwrap();
        assert_eq!(status, WriteStatus::complete(12));
        assert_eq!(f.service.session_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_blob_upload() {
        let f = fixture();
        let empty = DigestFunction::Sha256.empty_digest();
        let status = f
            .service
            .write(&upload_name("u1", &empty), 0, b"", true)
            .await
            .unwrap();
        assert_eq!(status, WriteStatus::complete(0));
        assert_eq!(f.backend.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_write_after_complete_is_noop() {
        let f = fixture();
        let digest = DigestFunction::Sha256.compute(b"abc");
        let name = upload_name("u1", &digest);

        f.service.write(&name, 0, b"abc", true).await.unwrap();
        let status = f.service.write(&name, 3, b"zzz", true).await.unwrap();
        assert_eq!(status, WriteStatus::complete(3));
    }

    #[tokio::test]
    async fn test_cancel_discards_partial_bytes() {
        let f = fixture();
        let digest = DigestFunction::Sha256.compute(b"abcdef");
        let name = upload_name("u1", &digest);

        f.service.write(&name, 0, b"abc", false).await.unwrap();
        assert!(f.service.cancel(&name).await.unwrap());
        assert!(!f.service.cancel(&name).await.unwrap());
        assert_eq!(f.service.query_write_status(&name).await.unwrap().committed_size, 0);

        // a fresh upload of the same resource starts over
        let status = f.service.write(&name, 0, b"abcdef", true).await.unwrap();
        assert!(status.complete);
    }

    #[tokio::test]
    async fn test_reaper_discards_idle_sessions() {
        let f = fixture();
        let digest = DigestFunction::Sha256.compute(b"abcdef");
        let name = upload_name("u1", &digest);
        f.service.write(&name, 0, b"abc", false).await.unwrap();

        assert_eq!(f.service.reap_idle().await, 0);

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(f.service.reap_idle().await, 1);
        assert_eq!(f.service.session_count(), 0);
        assert_eq!(f.service.query_write_status(&name).await.unwrap(), WriteStatus::unknown());
    }

    #[tokio::test]
    async fn test_read_streams_chunks_from_offset() {
        let f = fixture();
        let data = b"0123456789";
        let digest = DigestFunction::Sha256.compute(data);
        f.cas
            .put(&InstanceName::default_instance(), &digest, data)
            .await
            .unwrap();
        let name = format!("blobs/{}/{}", digest.hash, digest.size_bytes);

        let chunks: Vec<Bytes> = f.service.read(&name, 0, 0).await.unwrap().try_collect().await.unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(chunks.concat(), data);

        let tail: Vec<Bytes> = f.service.read(&name, 7, 0).await.unwrap().try_collect().await.unwrap();
        assert_eq!(tail.concat(), b"789");

        let window: Vec<Bytes> = f.service.read(&name, 2, 3).await.unwrap().try_collect().await.unwrap();
        assert_eq!(window.concat(), b"234");

        assert!(matches!(
            f.service.read(&name, 11, 0).await,
            Err(Error::InvalidOffset { .. })
        ));
    }
}
