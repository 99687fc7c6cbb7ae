//! In-memory ledgers that make up the persisted document.

pub mod jobs;
pub mod organize;
pub mod ready;
pub mod sanitize;

pub use jobs::{Job, JobLedger, JobStatus};
pub use organize::{
    OperationPatch, OperationStatus, OrganizeBatch, OrganizeBatchLedger,
    OrganizeOperation, PlannedOperation,
};
pub use ready::{FileMeta, ReadyEntry, ReadyQueue};
pub use sanitize::{AnalysisSummary, sanitize_analysis};
