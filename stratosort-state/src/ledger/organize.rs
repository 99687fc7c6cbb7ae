use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RetentionConfig;
use crate::timestamp::{self, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// One planned move inside a batch, as supplied by the batch runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub source: String,
    pub destination: String,
}

impl PlannedOperation {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Fields a runner may correct when an operation finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPatch {
    /// Final destination, e.g. after a collision rename.
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeOperation {
    pub source: String,
    pub destination: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeBatch {
    pub id: String,
    pub operations: Vec<OrganizeOperation>,
    #[serde(default, deserialize_with = "timestamp::lenient")]
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "timestamp::lenient")]
    pub completed_at: Option<Timestamp>,
}

impl OrganizeBatch {
    pub fn is_in_flight(&self) -> bool {
        self.completed_at.is_none()
    }

    pub fn has_failures(&self) -> bool {
        self.operations
            .iter()
            .any(|op| op.status == OperationStatus::Failed)
    }
}

/// Multi-operation reorganization batches keyed by opaque batch id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizeBatchLedger {
    batches: BTreeMap<String, OrganizeBatch>,
}

impl OrganizeBatchLedger {
    /// Create the batch unless it already exists; an existing batch is
    /// returned untouched so a resumed runner keeps its progress.
    pub fn create_or_load(
        &mut self,
        id: &str,
        operations: Vec<PlannedOperation>,
        now: Timestamp,
    ) -> OrganizeBatch {
        self.batches
            .entry(id.to_owned())
            .or_insert_with(|| OrganizeBatch {
                id: id.to_owned(),
                operations: operations
                    .into_iter()
                    .map(|op| OrganizeOperation {
                        source: op.source,
                        destination: op.destination,
                        status: OperationStatus::Pending,
                        error: None,
                    })
                    .collect(),
                started_at: Some(now),
                completed_at: None,
            })
            .clone()
    }

    pub fn mark_op_started(&mut self, id: &str, index: usize) {
        if let Some(op) = self.operation_mut(id, index) {
            op.status = OperationStatus::InProgress;
        }
    }

    pub fn mark_op_done(
        &mut self,
        id: &str,
        index: usize,
        patch: Option<OperationPatch>,
    ) {
        if let Some(op) = self.operation_mut(id, index) {
            op.status = OperationStatus::Done;
            op.error = None;
            if let Some(destination) = patch.and_then(|p| p.destination) {
                op.destination = destination;
            }
        }
    }

    pub fn mark_op_failed(&mut self, id: &str, index: usize, message: &str) {
        if let Some(op) = self.operation_mut(id, index) {
            op.status = OperationStatus::Failed;
            op.error = Some(message.to_owned());
        }
    }

    /// Stamp completion. The first stamp wins so the TTL is not extended by
    /// a repeated call.
    pub fn complete(&mut self, id: &str, now: Timestamp) {
        match self.batches.get_mut(id) {
            Some(batch) => {
                batch.completed_at.get_or_insert(now);
            }
            None => {
                debug!(target: "state::organize", batch = id, "complete for unknown batch ignored");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&OrganizeBatch> {
        self.batches.get(id)
    }

    /// Batches still in flight, oldest first.
    pub fn list_incomplete(&self) -> Vec<OrganizeBatch> {
        let mut out: Vec<OrganizeBatch> = self
            .batches
            .values()
            .filter(|batch| batch.is_in_flight())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    /// Drop completed batches past their TTL. In-flight batches are skipped
    /// without inspection.
    pub fn expire(
        &mut self,
        now: Timestamp,
        retention: &RetentionConfig,
    ) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, batch| {
            if batch.is_in_flight() {
                return true;
            }
            let ttl = if batch.has_failures() {
                retention.batch_failed_ttl()
            } else {
                retention.batch_done_ttl()
            };
            !timestamp::is_expired(batch.completed_at, now, ttl)
        });
        before - self.batches.len()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    fn operation_mut(
        &mut self,
        id: &str,
        index: usize,
    ) -> Option<&mut OrganizeOperation> {
        let op = self
            .batches
            .get_mut(id)
            .and_then(|batch| batch.operations.get_mut(index));
        if op.is_none() {
            debug!(target: "state::organize", batch = id, index, "operation update ignored; unknown batch or index");
        }
        op
    }
}
