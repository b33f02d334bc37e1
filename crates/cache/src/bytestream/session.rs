//! Upload sessions and their on-disk spool
//!
//! Bytes of an in-progress upload go to a temporary file, never to the CAS,
//! so nothing is visible to readers before the final chunk has been verified.

use remcache_core::{Digest, DigestFunction, DigestHasher, Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tracing::{debug, warn};

const SPOOL_BACKEND: &str = "spool";

/// Temporary file holding the bytes received so far, hashed as they arrive
pub(crate) struct SpoolFile {
    file: BufWriter<File>,
    path: PathBuf,
    hasher: DigestHasher,
    released: bool,
}

impl SpoolFile {
    pub(crate) async fn create(dir: &Path, digest_function: DigestFunction) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::from_io(SPOOL_BACKEND, &dir.display().to_string(), e))?;

        let path = dir.join(format!("{}.upload", uuid::Uuid::new_v4()));
        let file = File::create(&path)
            .await
            .map_err(|e| Error::from_io(SPOOL_BACKEND, &path.display().to_string(), e))?;

        Ok(Self {
            file: BufWriter::new(file),
            path,
            hasher: DigestHasher::new(digest_function),
            released: false,
        })
    }

    pub(crate) async fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| Error::from_io(SPOOL_BACKEND, &self.path.display().to_string(), e))?;
        self.hasher.update(data);
        Ok(())
    }

    /// Digest of everything appended so far
    pub(crate) fn digest(&self) -> Digest {
        self.hasher.clone().finalize()
    }

    /// Flush, read back the assembled bytes and remove the file
    pub(crate) async fn into_bytes(mut self) -> Result<Vec<u8>> {
        let path = self.path.display().to_string();
        self.file
            .flush()
            .await
            .map_err(|e| Error::from_io(SPOOL_BACKEND, &path, e))?;
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::from_io(SPOOL_BACKEND, &path, e))?;
        self.discard().await;
        Ok(data)
    }

    /// Remove the file without reading it
    pub(crate) async fn discard(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "failed to remove upload spool");
        }
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Lifecycle of one upload
pub(crate) enum SessionState {
    /// Accepting chunks; the spool is created on the first non-empty chunk
    Receiving(Option<SpoolFile>),
    /// Committed to the CAS; further writes are no-ops
    Complete,
    /// Removed from the session table; holders must start over
    Discarded,
}

pub(crate) struct UploadSession {
    pub(crate) digest: Digest,
    pub(crate) committed_size: i64,
    pub(crate) state: SessionState,
    pub(crate) last_activity: Instant,
}

impl UploadSession {
    pub(crate) fn new(digest: Digest) -> Self {
        Self {
            digest,
            committed_size: 0,
            state: SessionState::Receiving(None),
            last_activity: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn is_complete(&self) -> bool {
        matches!(self.state, SessionState::Complete)
    }

    pub(crate) fn is_discarded(&self) -> bool {
        matches!(self.state, SessionState::Discarded)
    }

    /// Append one chunk at the current committed size
    pub(crate) async fn append(
        &mut self,
        spool_dir: &Path,
        digest_function: DigestFunction,
        data: &[u8],
    ) -> Result<()> {
        let SessionState::Receiving(spool) = &mut self.state else {
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }

        if spool.is_none() {
            *spool = Some(SpoolFile::create(spool_dir, digest_function).await?);
        }
        if let Some(spool) = spool {
            spool.append(data).await?;
        }
        self.committed_size += data.len() as i64;
        debug!(digest = %self.digest, committed = self.committed_size, "chunk appended");
        Ok(())
    }

    /// Digest of the bytes received so far
    pub(crate) fn received_digest(&self, digest_function: DigestFunction) -> Digest {
        match &self.state {
            SessionState::Receiving(Some(spool)) => spool.digest(),
            _ => digest_function.empty_digest(),
        }
    }

    /// Take the spool out, leaving the session in `next`
    pub(crate) fn take_spool(&mut self, next: SessionState) -> Option<SpoolFile> {
        match std::mem::replace(&mut self.state, next) {
            SessionState::Receiving(spool) => spool,
            _ => None,
        }
    }
}
