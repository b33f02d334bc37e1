//! JSON message shapes of the HTTP surface
//!
//! Field names follow the REAPI v2 JSON mapping (camelCase, byte fields as
//! standard base64) so existing HTTP/JSON clients can talk to the server.

use remcache_core::{Digest, DigestFunction, Error, Result};
use serde::{Deserialize, Serialize};

/// Per-item outcome inside batch responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: String::new(),
        }
    }

    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::from(e),
        }
    }
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().as_i32(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMissingBlobsRequest {
    #[serde(default)]
    pub blob_digests: Vec<Digest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMissingBlobsResponse {
    pub missing_blob_digests: Vec<Digest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchUpdateItem {
    pub digest: Digest,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchUpdateBlobsRequest {
    #[serde(default)]
    pub requests: Vec<BatchUpdateItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchUpdateResult {
    pub digest: Digest,
    pub status: Status,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchUpdateBlobsResponse {
    pub responses: Vec<BatchUpdateResult>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchReadBlobsRequest {
    #[serde(default)]
    pub digests: Vec<Digest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchReadResult {
    pub digest: Digest,
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
    pub status: Status,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchReadBlobsResponse {
    pub responses: Vec<BatchReadResult>,
}

/// Reply to a chunk write or a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStatusResponse {
    #[serde(with = "int64_string")]
    pub committed_size: i64,
    pub complete: bool,
}

impl From<remcache_cache::WriteStatus> for WriteStatusResponse {
    fn from(status: remcache_cache::WriteStatus) -> Self {
        Self {
            committed_size: status.committed_size,
            complete: status.complete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCacheUpdateCapabilities {
    pub update_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCapabilities {
    pub digest_functions: Vec<String>,
    pub action_cache_update_capabilities: ActionCacheUpdateCapabilities,
    #[serde(with = "int64_string")]
    pub max_batch_total_size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    pub cache_capabilities: CacheCapabilities,
    pub low_api_version: ApiVersion,
    pub high_api_version: ApiVersion,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: i32,
    pub minor: i32,
}

impl ServerCapabilities {
    pub fn new(digest_function: DigestFunction, max_batch_total_size_bytes: u64) -> Self {
        Self {
            cache_capabilities: CacheCapabilities {
                digest_functions: vec![digest_function.name().to_ascii_uppercase()],
                action_cache_update_capabilities: ActionCacheUpdateCapabilities {
                    update_enabled: true,
                },
                max_batch_total_size_bytes: i64::try_from(max_batch_total_size_bytes)
                    .unwrap_or(i64::MAX),
            },
            low_api_version: ApiVersion { major: 2, minor: 0 },
            high_api_version: ApiVersion { major: 2, minor: 3 },
        }
    }
}

/// Body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_digests: Vec<Digest>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let (committed_size, missing_digests) = match err {
            Error::InvalidOffset { committed_size, .. } => (Some(*committed_size), Vec::new()),
            Error::MissingCasReference { missing, .. } => (None, missing.clone()),
            _ => (None, Vec::new()),
        };
        Self {
            code: err.code().as_str().to_string(),
            message: err.to_string(),
            committed_size,
            missing_digests,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// int64 fields travel as JSON strings
mod int64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(n),
        }
    }
}
