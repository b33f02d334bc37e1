//! Action result records stored in the action cache

use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file produced by an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub path: String,
    pub digest: Digest,
    #[serde(default)]
    pub is_executable: bool,
}

/// A directory produced by an action, stored in the CAS as a tree blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDirectory {
    pub path: String,
    pub tree_digest: Digest,
}

/// Where and when the action ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub worker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_completed_at: Option<DateTime<Utc>>,
}

/// The cached outcome of executing an action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Digest of the action this result belongs to, set when stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_digest: Option<Digest>,
    #[serde(default)]
    pub output_files: Vec<OutputFile>,
    #[serde(default)]
    pub output_directories: Vec<OutputDirectory>,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_metadata: Option<ExecutionMetadata>,
}

impl ActionResult {
    /// Every CAS digest this record points at, in declaration order.
    ///
    /// Output files come first, then output directory trees, then stdout and
    /// stderr. Duplicates are kept; callers that need a set deduplicate.
    pub fn referenced_digests(&self) -> Vec<&Digest> {
        self.output_files
            .iter()
            .map(|f| &f.digest)
            .chain(self.output_directories.iter().map(|d| &d.tree_digest))
            .chain(self.stdout_digest.iter())
            .chain(self.stderr_digest.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DigestFunction;

    fn sample() -> ActionResult {
        let f = DigestFunction::Sha256;
        ActionResult {
            action_digest: Some(f.compute(b"action")),
            output_files: vec![OutputFile {
                path: "bin/app".to_string(),
                digest: f.compute(b"binary"),
                is_executable: true,
            }],
            output_directories: vec![OutputDirectory {
                path: "gen".to_string(),
                tree_digest: f.compute(b"tree"),
            }],
            exit_code: 0,
            stdout_digest: Some(f.compute(b"out")),
            stderr_digest: None,
            execution_metadata: Some(ExecutionMetadata {
                worker: "worker-1".to_string(),
                queued_at: None,
                worker_completed_at: None,
            }),
        }
    }

    #[test]
    fn test_referenced_digests_order() {
        let result = sample();
        let refs = result.referenced_digests();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0], &result.output_files[0].digest);
        assert_eq!(refs[1], &result.output_directories[0].tree_digest);
        assert_eq!(refs[2], result.stdout_digest.as_ref().unwrap());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["outputFiles"][0]["isExecutable"], true);
        assert!(json.get("stderrDigest").is_none());
        assert_eq!(json["actionDigest"]["sizeBytes"], "6");

        let decoded: ActionResult = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_minimal_record_decodes() {
        let decoded: ActionResult = serde_json::from_str(r#"{"exitCode":1}"#).unwrap();
        assert_eq!(decoded.exit_code, 1);
        assert!(decoded.referenced_digests().is_empty());
        assert!(decoded.action_digest.is_none());
    }
}
