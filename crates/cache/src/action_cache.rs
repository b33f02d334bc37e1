//! Action cache
//!
//! Maps an action digest to the result of running it. Records are JSON
//! documents stored through the same blobstore as the CAS, under keys that
//! embed the instance name, so two instances never see each other's results.

use crate::blobstore::Blobstore;
use crate::cas::ContentAddressableStore;
use crate::config::ActionCacheConfig;
use crate::observer::{CacheEvent, CacheObserver, CacheOperation, CacheType};
use crate::storage::BlobKey;
use remcache_core::{ActionResult, Digest, Error, ErrorCode, InstanceName, Result};
use remcache_utils::operation_span;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn, Instrument};

pub struct ActionCache {
    blobstore: Arc<dyn Blobstore>,
    cas: Arc<ContentAddressableStore>,
    observer: Arc<dyn CacheObserver>,
    config: ActionCacheConfig,
}

impl ActionCache {
    pub fn new(
        blobstore: Arc<dyn Blobstore>,
        cas: Arc<ContentAddressableStore>,
        observer: Arc<dyn CacheObserver>,
        config: ActionCacheConfig,
    ) -> Self {
        Self {
            blobstore,
            cas,
            observer,
            config,
        }
    }

    /// The stored result for `action`, or `NotFound`
    pub async fn get_result(
        &self,
        instance: &InstanceName,
        action: &Digest,
    ) -> Result<ActionResult> {
        let started = Instant::now();
        let key = BlobKey::ac(instance, action);
        let span = operation_span("ac_get", instance, key.as_str());
        let result = self.get_inner(instance, action, &key).instrument(span).await;

        let size = result.as_ref().map(|(_, len)| *len).unwrap_or(0);
        let result = result.map(|(record, _)| record);
        self.observer.record_cache_event(&CacheEvent::from_result(
            CacheOperation::GetResult,
            CacheType::Action,
            &result,
            size,
            started.elapsed(),
        ));
        result
    }

    async fn get_inner(
        &self,
        instance: &InstanceName,
        action: &Digest,
        key: &BlobKey,
    ) -> Result<(ActionResult, u64)> {
        self.cas.digest_function().validate(action)?;

        let bytes = match self.blobstore.read(key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(action = %action, "action cache miss");
                return Err(Error::action_not_found(action.to_string()));
            }
            Err(e) => return Err(e),
        };

        let mut record: ActionResult = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(key = %key, error = %e, "undecodable action result");
            Error::corrupt(key.as_str(), format!("invalid action result record: {e}"))
        })?;

        if record.action_digest.is_none() {
            record.action_digest = Some(action.clone());
        }

        if self.config.validate_on_read {
            let missing = self.missing_references(instance, &record).await?;
            if !missing.is_empty() {
                debug!(
                    action = %action,
                    missing = missing.len(),
                    "action result references evicted blobs, reporting miss"
                );
                return Err(Error::action_not_found(action.to_string()));
            }
        }

        Ok((record, bytes.len() as u64))
    }

    /// Store `result` for `action`, replacing any previous record, and
    /// return the record as stored
    pub async fn set_result(
        &self,
        instance: &InstanceName,
        action: &Digest,
        mut result: ActionResult,
    ) -> Result<ActionResult> {
        let started = Instant::now();
        let key = BlobKey::ac(instance, action);
        let span = operation_span("ac_set", instance, key.as_str());
        let outcome = self
            .set_inner(instance, action, &mut result, &key)
            .instrument(span)
            .await;

        let size = outcome.as_ref().map(|len| *len).unwrap_or(0);
        self.observer.record_cache_event(&CacheEvent::from_result(
            CacheOperation::SetResult,
            CacheType::Action,
            &outcome,
            size,
            started.elapsed(),
        ));
        outcome.map(|_| result)
    }

    async fn set_inner(
        &self,
        instance: &InstanceName,
        action: &Digest,
        result: &mut ActionResult,
        key: &BlobKey,
    ) -> Result<u64> {
        let digest_function = self.cas.digest_function();
        digest_function.validate(action)?;
        if let Some(named) = &result.action_digest {
            if named != action {
                return Err(Error::invalid_argument(format!(
                    "result names action {named} but was sent for {action}"
                )));
            }
        }
        result.action_digest = Some(action.clone());
        for digest in result.referenced_digests() {
            digest_function.validate(digest)?;
        }

        if self.config.validate_references {
            let missing = self.missing_references(instance, result).await?;
            if !missing.is_empty() {
                warn!(
                    action = %action,
                    missing = missing.len(),
                    "rejecting action result with dangling references"
                );
                return Err(Error::MissingCasReference {
                    action: action.clone(),
                    missing,
                });
            }
        }

        let bytes = serde_json::to_vec(&*result)?;
        self.blobstore.write(key, &bytes).await?;
        debug!(action = %action, bytes = bytes.len(), "action result stored");
        Ok(bytes.len() as u64)
    }

    /// Administrative removal; removing an absent record succeeds
    pub async fn delete_result(&self, instance: &InstanceName, action: &Digest) -> Result<()> {
        let started = Instant::now();
        self.cas.digest_function().validate(action)?;
        let result = self.blobstore.delete(&BlobKey::ac(instance, action)).await;

        self.observer.record_cache_event(&CacheEvent {
            operation: CacheOperation::DeleteResult,
            cache_type: CacheType::Action,
            event_type: None,
            byte_size: 0,
            duration: started.elapsed(),
            status: result.as_ref().map(|_| ErrorCode::Ok).unwrap_or_else(Error::code),
        });
        result
    }

    /// Referenced digests absent from the CAS, deduplicated, in record order
    async fn missing_references(
        &self,
        instance: &InstanceName,
        result: &ActionResult,
    ) -> Result<Vec<Digest>> {
        let mut seen = HashSet::new();
        let referenced: Vec<Digest> = result
            .referenced_digests()
            .into_iter()
            .filter(|d| seen.insert(*d))
            .cloned()
            .collect();

        if referenced.is_empty() {
            return Ok(Vec::new());
        }
        // Asked of the backend directly so a blob lost since its last
        // existence check cannot pass as present
        self.cas.find_missing_uncached(instance, &referenced).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobstore;
    use crate::config::CacheConfig;
    use crate::observer::{CacheEventType, NoopObserver, RecordingObserver};
    use remcache_core::{DigestFunction, OutputFile};

    struct Fixture {
        backend: Arc<MemoryBlobstore>,
        cas: Arc<ContentAddressableStore>,
        ac: ActionCache,
    }

    fn fixture(config: ActionCacheConfig, observer: Arc<dyn CacheObserver>) -> Fixture {
        let backend = Arc::new(MemoryBlobstore::unbounded());
        let cas = Arc::new(ContentAddressableStore::new(
            backend.clone(),
            observer.clone(),
            &CacheConfig::default(),
        ));
        let ac = ActionCache::new(backend.clone(), cas.clone(), observer, config);
        Fixture { backend, cas, ac }
    }

    fn sha256(data: &[u8]) -> Digest {
        DigestFunction::Sha256.compute(data)
    }

    fn result_with(outputs: &[Digest]) -> ActionResult {
        ActionResult {
            output_files: outputs
                .iter()
                .enumerate()
                .map(|(i, digest)| OutputFile {
                    path: format!("out/{i}"),
                    digest: digest.clone(),
                    is_executable: false,
                })
                .collect(),
            exit_code: 0,
            ..ActionResult::default()
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let output = sha256(b"output");
        f.cas.put(&instance, &output, b"output").await.unwrap();

        let action = sha256(b"action");
        let record = result_with(&[output]);
        let stored = f.ac.set_result(&instance, &action, record.clone()).await.unwrap();
        assert_eq!(stored.action_digest.as_ref(), Some(&action));
        assert_eq!(stored.output_files, record.output_files);
        assert_eq!(f.ac.get_result(&instance, &action).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_result_for_another_action_is_rejected() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let record = ActionResult {
            action_digest: Some(sha256(b"other action")),
            ..ActionResult::default()
        };

        let err = f
            .ac
            .set_result(&instance, &sha256(b"action"), record)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_legacy_record_without_action_digest_is_filled_on_read() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let action = sha256(b"action");
        f.backend
            .write(&BlobKey::ac(&instance, &action), br#"{"exitCode":2}"#)
            .await
            .unwrap();

        let record = f.ac.get_result(&instance, &action).await.unwrap();
        assert_eq!(record.exit_code, 2);
        assert_eq!(record.action_digest, Some(action));
    }

    #[tokio::test]
    async fn test_reference_lost_by_backend_is_rejected() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let output = sha256(b"output");
        f.cas.put(&instance, &output, b"output").await.unwrap();
        // warm the existence cache, then lose the blob behind its back
        assert!(f.cas.find_missing(&instance, &[output.clone()]).await.unwrap().is_empty());
        f.backend.delete(&BlobKey::cas(&instance, &output)).await.unwrap();

        let err = f
            .ac
            .set_result(&instance, &sha256(b"action"), result_with(&[output.clone()]))
            .await
            .unwrap_err();
        match err {
            Error::MissingCasReference { missing, .. } => assert_eq!(missing, vec![output]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let a = InstanceName::new("a").unwrap();
        let b = InstanceName::new("b").unwrap();
        let action = sha256(b"action");

        f.ac.set_result(&a, &action, ActionResult::default()).await.unwrap();
        assert!(f.ac.get_result(&b, &action).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_reference_rejected_without_side_effects() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let present = sha256(b"present");
        let absent = sha256(b"absent");
        f.cas.put(&instance, &present, b"present").await.unwrap();
        let objects_before = f.backend.len();

        let action = sha256(b"action");
        let record = result_with(&[present, absent.clone(), absent.clone()]);
        let err = f.ac.set_result(&instance, &action, record).await.unwrap_err();
        match err {
            Error::MissingCasReference { missing, .. } => assert_eq!(missing, vec![absent]),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(f.backend.len(), objects_before);
        assert!(f.ac.get_result(&instance, &action).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reference_in_other_instance_does_not_count() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let a = InstanceName::new("a").unwrap();
        let b = InstanceName::new("b").unwrap();
        let output = sha256(b"output");
        f.cas.put(&a, &output, b"output").await.unwrap();

        let err = f
            .ac
            .set_result(&b, &sha256(b"action"), result_with(&[output]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_validation_can_be_disabled() {
        let config = ActionCacheConfig {
            validate_references: false,
            validate_on_read: false,
        };
        let f = fixture(config, Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let action = sha256(b"action");

        f.ac.set_result(&instance, &action, result_with(&[sha256(b"nowhere")]))
            .await
            .unwrap();
        assert!(f.ac.get_result(&instance, &action).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_on_read_hides_dangling_record() {
        let config = ActionCacheConfig {
            validate_references: true,
            validate_on_read: true,
        };
        let f = fixture(config, Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let output = sha256(b"output");
        f.cas.put(&instance, &output, b"output").await.unwrap();

        let action = sha256(b"action");
        f.ac.set_result(&instance, &action, result_with(&[output.clone()]))
            .await
            .unwrap();
        f.cas.remove(&instance, &output).await.unwrap();

        assert!(f.ac.get_result(&instance, &action).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_overwrite_is_last_writer_wins() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let action = sha256(b"action");

        let first = ActionResult {
            exit_code: 1,
            ..ActionResult::default()
        };
        f.ac.set_result(&instance, &action, first).await.unwrap();
        f.ac.set_result(&instance, &action, ActionResult::default())
            .await
            .unwrap();
        assert_eq!(f.ac.get_result(&instance, &action).await.unwrap().exit_code, 0);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_corruption() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let action = sha256(b"action");
        f.backend
            .write(&BlobKey::ac(&instance, &action), b"{not json")
            .await
            .unwrap();

        assert!(f.ac.get_result(&instance, &action).await.unwrap_err().is_corruption());
    }

    #[tokio::test]
    async fn test_delete_result() {
        let f = fixture(ActionCacheConfig::default(), Arc::new(NoopObserver));
        let instance = InstanceName::default_instance();
        let action = sha256(b"action");

        f.ac.set_result(&instance, &action, ActionResult::default()).await.unwrap();
        f.ac.delete_result(&instance, &action).await.unwrap();
        assert!(f.ac.get_result(&instance, &action).await.unwrap_err().is_not_found());
        f.ac.delete_result(&instance, &action).await.unwrap();
    }

    #[tokio::test]
    async fn test_events_use_action_cache_type() {
        let observer = Arc::new(RecordingObserver::new());
        let f = fixture(ActionCacheConfig::default(), observer.clone());
        let instance = InstanceName::default_instance();
        let action = sha256(b"action");

        let _ = f.ac.get_result(&instance, &action).await;
        f.ac.set_result(&instance, &action, ActionResult::default()).await.unwrap();
        f.ac.get_result(&instance, &action).await.unwrap();

        let events: Vec<_> = observer
            .cache_events()
            .into_iter()
            .filter(|e| e.cache_type == CacheType::Action)
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            events,
            vec![
                Some(CacheEventType::Miss),
                Some(CacheEventType::Upload),
                Some(CacheEventType::Hit),
            ]
        );
    }
}
