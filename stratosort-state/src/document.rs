//! The single persisted unit and its on-disk shape.

use serde::{Deserialize, Serialize};

use crate::ledger::{JobLedger, OrganizeBatchLedger, ReadyQueue};
use crate::timestamp::{self, Timestamp};

pub const SCHEMA_VERSION: u32 = 1;

/// Everything the store persists. Always written whole, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub schema_version: u32,
    #[serde(default, deserialize_with = "timestamp::lenient")]
    pub created_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "timestamp::lenient")]
    pub updated_at: Option<Timestamp>,
    pub analysis: AnalysisSection,
    pub organize: OrganizeSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSection {
    pub jobs: JobLedger,
    #[serde(default)]
    pub ready: ReadyQueue,
    #[serde(default, deserialize_with = "timestamp::lenient")]
    pub last_updated: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeSection {
    pub batches: OrganizeBatchLedger,
    #[serde(default, deserialize_with = "timestamp::lenient")]
    pub last_updated: Option<Timestamp>,
}

/// Why a persisted file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("state file is not valid JSON or has the wrong shape: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported schema version {found} (expected {SCHEMA_VERSION})")]
    UnsupportedVersion { found: u32 },
}

impl StateDocument {
    pub fn empty(now: Timestamp) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: Some(now),
            updated_at: Some(now),
            analysis: AnalysisSection {
                last_updated: Some(now),
                ..AnalysisSection::default()
            },
            organize: OrganizeSection {
                last_updated: Some(now),
                ..OrganizeSection::default()
            },
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let doc: Self = serde_json::from_slice(bytes)?;
        if doc.schema_version != SCHEMA_VERSION {
            return Err(DocumentError::UnsupportedVersion {
                found: doc.schema_version,
            });
        }
        Ok(doc)
    }

    pub fn to_pretty_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn touch_analysis(&mut self, now: Timestamp) {
        self.analysis.last_updated = Some(now);
    }

    pub fn touch_organize(&mut self, now: Timestamp) {
        self.organize.last_updated = Some(now);
    }

    /// Move a path's job and ready entry together. Returns true if either
    /// was relocated.
    pub fn move_path(
        &mut self,
        old_key: &str,
        new_key: &str,
        now: Timestamp,
    ) -> bool {
        let job_moved = self.analysis.jobs.relocate(old_key, new_key);
        let ready_moved = self.analysis.ready.relocate(old_key, new_key);
        if job_moved || ready_moved {
            self.touch_analysis(now);
        }
        job_moved || ready_moved
    }
}
