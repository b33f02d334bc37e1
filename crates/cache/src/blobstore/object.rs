//! Remote object-storage backends over HTTP
//!
//! Both providers speak the same per-object verbs (PUT, GET, HEAD, DELETE)
//! and differ only in how the object URL is formed. A PUT is atomic on the
//! store side, so readers never see a partial object.

use super::{Backpressure, Blobstore, BlobstoreKind};
use crate::storage::{decode_frame, encode_frame, BlobKey, CompressionConfig};
use async_trait::async_trait;
use remcache_core::{Error, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How object URLs are formed for a given store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectProvider {
    /// `<endpoint>/<bucket>/<prefix><key>`
    Gcs { base: Url },
    /// `<base_url>/<prefix><key>`
    Http { base: Url },
}

impl ObjectProvider {
    pub fn gcs(bucket: &str, endpoint: Option<&str>) -> Result<Self> {
        let endpoint = endpoint.unwrap_or(DEFAULT_GCS_ENDPOINT);
        let base = parse_base(&format!("{}/{bucket}", endpoint.trim_end_matches('/')))?;
        Ok(Self::Gcs { base })
    }

    pub fn http(base_url: &str) -> Result<Self> {
        Ok(Self::Http {
            base: parse_base(base_url)?,
        })
    }

    pub fn kind(&self) -> BlobstoreKind {
        match self {
            Self::Gcs { .. } => BlobstoreKind::Gcs,
            Self::Http { .. } => BlobstoreKind::Http,
        }
    }

    fn base(&self) -> &Url {
        match self {
            Self::Gcs { base } | Self::Http { base } => base,
        }
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::configuration(format!("invalid object store url '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::configuration(format!(
            "object store url '{raw}' must use http or https"
        )));
    }
    Ok(url)
}

/// Framed objects stored in a remote bucket
pub struct ObjectStoreBlobstore {
    client: Client,
    provider: ObjectProvider,
    prefix: String,
    bearer_token: Option<String>,
    compression: CompressionConfig,
    backpressure: Backpressure,
}

impl ObjectStoreBlobstore {
    pub fn new(
        provider: ObjectProvider,
        prefix: String,
        bearer_token: Option<String>,
        compression: CompressionConfig,
        backpressure: Backpressure,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            provider,
            prefix,
            bearer_token,
            compression,
            backpressure,
        })
    }

    fn backend(&self) -> &'static str {
        self.provider.kind().as_str()
    }

    /// Full URL of the object behind `key`
    pub fn object_url(&self, key: &BlobKey) -> String {
        format!(
            "{}/{}{}",
            self.provider.base().as_str().trim_end_matches('/'),
            self.prefix,
            key
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, key: &BlobKey, request: RequestBuilder) -> Result<Response> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| map_transport_error(self.backend(), key, e))
    }
}

#[async_trait]
impl Blobstore for ObjectStoreBlobstore {
    fn kind(&self) -> BlobstoreKind {
        self.provider.kind()
    }

    async fn write(&self, key: &BlobKey, data: &[u8]) -> Result<u64> {
        let _permit = self.backpressure.acquire().await?;
        let frame = encode_frame(key.as_str(), data, &self.compression)?;
        let stored = frame.len();

        let request = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(frame);
        let response = self.send(key, request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(self.backend(), key, status, response).await);
        }

        debug!(key = %key, bytes = data.len(), stored, backend = self.backend(), "object write");
        Ok(data.len() as u64)
    }

    async fn read(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let _permit = self.backpressure.acquire().await?;
        let response = self.send(key, self.client.get(self.object_url(key))).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(self.backend(), key, status, response).await);
        }

        let frame = response
            .bytes()
            .await
            .map_err(|e| map_transport_error(self.backend(), key, e))?;
        decode_frame(key.as_str(), &frame)
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let _permit = self.backpressure.acquire().await?;
        let response = self
            .send(key, self.client.delete(self.object_url(key)))
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(map_status(self.backend(), key, status, response).await)
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let _permit = self.backpressure.acquire().await?;
        let response = self.send(key, self.client.head(self.object_url(key))).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Err(map_status(self.backend(), key, status, response).await)
    }
}

/// Map a non-success HTTP status onto the error taxonomy
async fn map_status(backend: &str, key: &BlobKey, status: StatusCode, response: Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("{status} for '{key}'")
    } else {
        format!("{status} for '{key}': {}", body.chars().take(256).collect::<String>())
    };

    match status {
        StatusCode::NOT_FOUND => Error::blob_not_found(key.as_str()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::permission_denied(format!("{backend} access to '{key}'"), message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::unavailable(backend, message)
        }
        s if s.is_server_error() => Error::unavailable(backend, message),
        _ => {
            error!(backend, key = %key, %status, "unexpected object store response");
            Error::Unknown {
                message: format!("{backend}: {message}"),
                source: None,
            }
        }
    }
}

/// Map a failure to reach the store onto the error taxonomy
fn map_transport_error(backend: &str, key: &BlobKey, err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::unavailable_with_source(backend, format!("request for '{key}' failed"), err)
    } else {
        Error::unknown(format!("{backend} request for '{key}' failed"), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remcache_core::{DigestFunction, InstanceName};

    fn key() -> BlobKey {
        BlobKey::cas(
            &InstanceName::new("ci").unwrap(),
            &DigestFunction::Sha256.compute(b"url"),
        )
    }

    fn store(provider: ObjectProvider, prefix: &str) -> ObjectStoreBlobstore {
        ObjectStoreBlobstore::new(
            provider,
            prefix.to_string(),
            None,
            CompressionConfig::default(),
            Backpressure::new(4, BlobstoreKind::Http),
        )
        .unwrap()
    }

    #[test]
    fn test_gcs_object_url() {
        let provider = ObjectProvider::gcs("bucket", None).unwrap();
        assert_eq!(provider.kind(), BlobstoreKind::Gcs);

        let url = store(provider, "prefix/").object_url(&key());
        assert!(url.starts_with("https://storage.googleapis.com/bucket/prefix/ci/cas/"));
    }

    #[test]
    fn test_http_object_url_trims_slash() {
        let provider = ObjectProvider::http("http://localhost:9000/objects/").unwrap();
        let url = store(provider, "").object_url(&key());
        assert!(url.starts_with("http://localhost:9000/objects/ci/cas/"));
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(ObjectProvider::http("ftp://example.com").is_err());
        assert!(ObjectProvider::http("no scheme").is_err());
    }
}
