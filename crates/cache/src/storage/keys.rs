//! Storage keys for CAS and AC objects
//!
//! Keys are sharded by the first two hash characters, 256-way, so that no
//! single directory or object-store prefix grows unbounded. The validated
//! instance name leads every key, which keeps tenants physically apart.

use remcache_core::{Digest, InstanceName, AC_NAMESPACE, CAS_NAMESPACE};
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

/// Opaque path of a stored object, relative to the backend root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey(String);

impl BlobKey {
    /// Key of a content blob
    pub fn cas(instance: &InstanceName, digest: &Digest) -> Self {
        Self::namespaced(instance, CAS_NAMESPACE, digest)
    }

    /// Key of an action result record
    pub fn ac(instance: &InstanceName, digest: &Digest) -> Self {
        Self::namespaced(instance, AC_NAMESPACE, digest)
    }

    fn namespaced(instance: &InstanceName, namespace: &str, digest: &Digest) -> Self {
        let shard = digest.hash.get(..2).unwrap_or("00");
        Self(instance.join(&format!(
            "{namespace}/{shard}/{}-{}",
            digest.hash, digest.size_bytes
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this key under a filesystem root
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |path, segment| path.join(segment))
    }
}

impl Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remcache_core::DigestFunction;

    #[test]
    fn test_key_layout() {
        let digest = DigestFunction::Sha256.compute(b"hello");
        let default = InstanceName::default_instance();
        let team = InstanceName::new("team/ci").unwrap();

        assert_eq!(
            BlobKey::cas(&default, &digest).as_str(),
            format!("cas/2c/{}-5", digest.hash)
        );
        assert_eq!(
            BlobKey::ac(&team, &digest).as_str(),
            format!("team/ci/ac/2c/{}-5", digest.hash)
        );
    }

    #[test]
    fn test_namespaces_and_instances_never_collide() {
        let digest = DigestFunction::Sha256.compute(b"x");
        let a = InstanceName::new("a").unwrap();
        let b = InstanceName::new("b").unwrap();

        assert_ne!(BlobKey::cas(&a, &digest), BlobKey::ac(&a, &digest));
        assert_ne!(BlobKey::cas(&a, &digest), BlobKey::cas(&b, &digest));
    }

    #[test]
    fn test_to_path() {
        let digest = DigestFunction::Sha256.compute(b"hello");
        let key = BlobKey::cas(&InstanceName::new("t").unwrap(), &digest);
        let path = key.to_path(Path::new("/srv/cache"));
        assert_eq!(
            path,
            Path::new("/srv/cache/t/cas/2c").join(format!("{}-5", digest.hash))
        );
    }
}
