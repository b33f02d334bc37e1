//! Content identity: hash plus declared byte length
//!
//! A [`Digest`] is the only key the cache understands. Digests are computed
//! from bytes with the process-wide [`DigestFunction`] or parsed from wire
//! input, and are never mutated afterwards.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Hash algorithm used for every digest in a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestFunction {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestFunction {
    /// Length of the hex-encoded hash
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Lower-case name as used in configuration
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Hash a full byte sequence
    #[must_use]
    pub fn compute(self, data: &[u8]) -> Digest {
        let mut hasher = DigestHasher::new(self);
        hasher.update(data);
        hasher.finalize()
    }

    /// Digest of zero-length content
    #[must_use]
    pub fn empty_digest(self) -> Digest {
        self.compute(&[])
    }

    /// Validate wire input and build a digest
    pub fn parse(self, hash: &str, size_bytes: i64) -> Result<Digest> {
        if size_bytes < 0 {
            return Err(Error::invalid_digest(
                format!("{hash}/{size_bytes}"),
                "size_bytes must not be negative",
            ));
        }

        if hash.len() != self.hex_len() {
            return Err(Error::invalid_digest(
                format!("{hash}/{size_bytes}"),
                format!(
                    "expected {} hex characters for {}, got {}",
                    self.hex_len(),
                    self.name(),
                    hash.len()
                ),
            ));
        }

        if !hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(Error::invalid_digest(
                format!("{hash}/{size_bytes}"),
                "hash must be lower-case hexadecimal",
            ));
        }

        Ok(Digest {
            hash: hash.to_string(),
            size_bytes,
        })
    }

    /// Parse the `hash/size` form used in resource names
    pub fn parse_str(self, input: &str) -> Result<Digest> {
        let (hash, size) = input
            .split_once('/')
            .ok_or_else(|| Error::invalid_digest(input, "expected '<hash>/<size>'"))?;
        let size_bytes = size
            .parse::<i64>()
            .map_err(|e| Error::invalid_digest(input, format!("bad size: {e}")))?;
        self.parse(hash, size_bytes)
    }

    /// Re-validate an already constructed digest against this function
    pub fn validate(self, digest: &Digest) -> Result<()> {
        self.parse(&digest.hash, digest.size_bytes).map(|_| ())
    }
}

impl Display for DigestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::configuration(format!(
                "unsupported digest function '{other}'"
            ))),
        }
    }
}

/// A content hash together with the declared byte length
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    /// Lower-case hex hash
    pub hash: String,
    /// Length of the content in bytes
    #[serde(with = "size_as_string")]
    pub size_bytes: i64,
}

impl Digest {
    /// Build a digest without validation (use only for already validated input)
    pub fn new_unchecked(hash: impl Into<String>, size_bytes: i64) -> Self {
        Self {
            hash: hash.into(),
            size_bytes,
        }
    }

    /// True iff this is the digest of zero-length content
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    /// Declared size as an unsigned length
    #[must_use]
    pub fn len(&self) -> u64 {
        u64::try_from(self.size_bytes).unwrap_or(0)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}

/// Incremental hasher for content that arrives in chunks
#[derive(Clone)]
pub struct DigestHasher {
    inner: HasherInner,
    size_bytes: i64,
}

#[derive(Clone)]
enum HasherInner {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl DigestHasher {
    pub fn new(function: DigestFunction) -> Self {
        let inner = match function {
            DigestFunction::Sha256 => HasherInner::Sha256(Sha256::new()),
            DigestFunction::Sha384 => HasherInner::Sha384(Sha384::new()),
            DigestFunction::Sha512 => HasherInner::Sha512(Sha512::new()),
        };
        Self {
            inner,
            size_bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HasherInner::Sha256(h) => h.update(data),
            HasherInner::Sha384(h) => h.update(data),
            HasherInner::Sha512(h) => h.update(data),
        }
        self.size_bytes += data.len() as i64;
    }

    /// Bytes hashed so far
    #[must_use]
    pub const fn size_bytes(&self) -> i64 {
        self.size_bytes
    }

    #[must_use]
    pub fn finalize(self) -> Digest {
        let hash = match self.inner {
            HasherInner::Sha256(h) => hex::encode(h.finalize()),
            HasherInner::Sha384(h) => hex::encode(h.finalize()),
            HasherInner::Sha512(h) => hex::encode(h.finalize()),
        };
        Digest {
            hash,
            size_bytes: self.size_bytes,
        }
    }
}

/// REAPI JSON encodes int64 as a string; accept both forms on input
mod size_as_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(v),
            Raw::Str(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_empty_digest_is_known_constant() {
        let empty = DigestFunction::Sha256.empty_digest();
        assert_eq!(empty.hash, EMPTY_SHA256);
        assert_eq!(empty.size_bytes, 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_compute_hello() {
        let digest = DigestFunction::Sha256.compute(b"hello");
        assert_eq!(
            digest.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(digest.size_bytes, 5);
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        let f = DigestFunction::Sha256;

        assert!(f.parse(EMPTY_SHA256, 0).is_ok());
        assert!(matches!(
            f.parse("abc123", 0),
            Err(Error::InvalidDigest { .. })
        ));
        assert!(matches!(
            f.parse(EMPTY_SHA256, -1),
            Err(Error::InvalidDigest { .. })
        ));

        let non_hex = format!("g{}", &EMPTY_SHA256[1..]);
        assert!(matches!(f.parse(&non_hex, 0), Err(Error::InvalidDigest { .. })));

        let upper = EMPTY_SHA256.to_ascii_uppercase();
        assert!(f.parse(&upper, 0).is_err());

        // sha256 digest is the wrong length for sha512
        assert!(DigestFunction::Sha512.parse(EMPTY_SHA256, 0).is_err());
    }

    #[test]
    fn test_parse_str_round_trips_display() {
        let digest = DigestFunction::Sha256.compute(b"resource");
        let parsed = DigestFunction::Sha256
            .parse_str(&digest.to_string())
            .unwrap();
        assert_eq!(parsed, digest);

        assert!(DigestFunction::Sha256.parse_str("nohash").is_err());
        assert!(DigestFunction::Sha256
            .parse_str(&format!("{EMPTY_SHA256}/x"))
            .is_err());
    }

    #[test]
    fn test_equality_uses_both_fields() {
        let a = Digest::new_unchecked(EMPTY_SHA256, 0);
        let b = Digest::new_unchecked(EMPTY_SHA256, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_json_size_accepts_string_and_number() {
        let from_str: Digest =
            serde_json::from_str(&format!(r#"{{"hash":"{EMPTY_SHA256}","sizeBytes":"12"}}"#))
                .unwrap();
        let from_num: Digest =
            serde_json::from_str(&format!(r#"{{"hash":"{EMPTY_SHA256}","sizeBytes":12}}"#))
                .unwrap();
        assert_eq!(from_str, from_num);

        let json = serde_json::to_string(&from_str).unwrap();
        assert!(json.contains(r#""sizeBytes":"12""#));
    }

    #[test]
    fn test_function_from_str() {
        assert_eq!("SHA256".parse::<DigestFunction>().unwrap(), DigestFunction::Sha256);
        assert_eq!("sha512".parse::<DigestFunction>().unwrap().hex_len(), 128);
        assert!("md5".parse::<DigestFunction>().is_err());
    }

    proptest! {
        #[test]
        fn prop_incremental_matches_one_shot(
            data in prop::collection::vec(any::<u8>(), 0..4096),
            split in 0usize..4096,
        ) {
            let split = split.min(data.len());
            let mut hasher = DigestHasher::new(DigestFunction::Sha256);
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            prop_assert_eq!(hasher.finalize(), DigestFunction::Sha256.compute(&data));
        }
    }
}
