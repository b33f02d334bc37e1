//! ByteStream resource names
//!
//! Upload: `[instance/]uploads/<uuid>/blobs/<hash>/<size>[/<anything>]`
//! Download: `[instance/]blobs/<hash>/<size>[/<anything>]`
//!
//! `uploads` and `blobs` are reserved instance segments, so the first
//! occurrence of the marker always ends the instance name.

use remcache_core::{Digest, DigestFunction, Error, InstanceName, Result, BLOBS_SEGMENT, UPLOADS_SEGMENT};
use std::fmt::{self, Display};

/// Target of an upload session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResource {
    pub instance: InstanceName,
    pub upload_id: String,
    pub digest: Digest,
}

impl UploadResource {
    pub fn parse(name: &str, digest_function: DigestFunction) -> Result<Self> {
        let segments: Vec<&str> = name.split('/').collect();
        let at = segments
            .iter()
            .position(|s| *s == UPLOADS_SEGMENT)
            .ok_or_else(|| malformed(name, "missing 'uploads' segment"))?;

        let rest = &segments[at + 1..];
        if rest.len() < 4 || rest[1] != BLOBS_SEGMENT {
            return Err(malformed(name, "expected uploads/<uuid>/blobs/<hash>/<size>"));
        }
        if rest[0].is_empty() {
            return Err(malformed(name, "empty upload id"));
        }

        let size_bytes = parse_size(name, rest[3])?;
        Ok(Self {
            instance: InstanceName::new(segments[..at].join("/"))?,
            upload_id: rest[0].to_string(),
            digest: digest_function.parse(rest[2], size_bytes)?,
        })
    }

    /// Canonical name without trailing metadata; identifies the session
    pub fn session_key(&self) -> String {
        self.to_string()
    }
}

impl Display for UploadResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.instance.join(&format!(
            "{UPLOADS_SEGMENT}/{}/{BLOBS_SEGMENT}/{}/{}",
            self.upload_id, self.digest.hash, self.digest.size_bytes
        )))
    }
}

/// Target of a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResource {
    pub instance: InstanceName,
    pub digest: Digest,
}

impl DownloadResource {
    pub fn parse(name: &str, digest_function: DigestFunction) -> Result<Self> {
        let segments: Vec<&str> = name.split('/').collect();
        let at = segments
            .iter()
            .position(|s| *s == BLOBS_SEGMENT)
            .ok_or_else(|| malformed(name, "missing 'blobs' segment"))?;

        let rest = &segments[at + 1..];
        if rest.len() < 2 {
            return Err(malformed(name, "expected blobs/<hash>/<size>"));
        }

        let size_bytes = parse_size(name, rest[1])?;
        Ok(Self {
            instance: InstanceName::new(segments[..at].join("/"))?,
            digest: digest_function.parse(rest[0], size_bytes)?,
        })
    }
}

impl Display for DownloadResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.instance.join(&format!(
            "{BLOBS_SEGMENT}/{}/{}",
            self.digest.hash, self.digest.size_bytes
        )))
    }
}

fn parse_size(name: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|e| Error::invalid_digest(name, format!("bad size '{raw}': {e}")))
}

fn malformed(name: &str, reason: &str) -> Error {
    Error::invalid_argument(format!("malformed resource name '{name}': {reason}"))
}
