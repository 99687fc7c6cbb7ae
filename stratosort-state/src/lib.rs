//! # Stratosort State
//!
//! Durable job-state store for a file-organizing desktop service. It records
//! which files are queued, being analyzed, done, or failed; keeps a bounded
//! queue of analysis results ready for review; and tracks multi-file organize
//! batches so an interrupted run can resume after a crash or restart.
//!
//! ## Overview
//!
//! - **Single JSON document** on disk, replaced atomically (temp file, fsync,
//!   rename) so a crash never leaves a half-written file.
//! - **Debounced saves**: bursts of mutations inside one window produce one
//!   write, and every caller in the burst sees that write's outcome.
//! - **Serialized writes**: at most one write is in flight; the newest state
//!   is always the last one written.
//! - **Retention**: finished jobs, stale ready entries, and old batches are
//!   evicted at load, on a periodic schedule, and at shutdown.
//! - **Save health**: repeated write failures are surfaced through
//!   [`StateStore::is_save_healthy`] instead of panicking.
//!
//! ## Example
//!
//! ```no_run
//! use stratosort_state::{StateStore, StoreConfig};
//!
//! # async fn run() -> stratosort_state::Result<()> {
//! let store = StateStore::new("/tmp/processing-state.json", StoreConfig::default());
//! store.mark_analysis_start("/docs/invoice.pdf").await?;
//! store.mark_analysis_complete("/docs/invoice.pdf", None).await?;
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod ledger;
pub mod persist;
pub mod store;
pub mod sweep;
pub mod timestamp;

pub use config::{RetentionConfig, SaveConfig, StoreConfig};
pub use document::{SCHEMA_VERSION, StateDocument};
pub use error::{Result, SaveFailure, SaveOutcome, StoreError};
pub use ledger::{
    AnalysisSummary, FileMeta, Job, JobStatus, OperationPatch, OperationStatus,
    OrganizeBatch, OrganizeOperation, PlannedOperation, ReadyEntry,
};
pub use persist::{SaveErrorRecord, SaveHealthSnapshot};
pub use store::StateStore;
pub use sweep::SweepReport;
pub use timestamp::Timestamp;
