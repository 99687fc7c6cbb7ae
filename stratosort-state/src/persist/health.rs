use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::SaveOutcome;
use crate::timestamp::{self, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveErrorRecord {
    pub message: String,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveHealthSnapshot {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
    pub last_success_at: Option<Timestamp>,
    /// Most recent failure, kept after recovery for diagnostics.
    pub last_error: Option<SaveErrorRecord>,
}

/// Tracks write outcomes so callers can poll for persistence trouble instead
/// of having every save throw.
#[derive(Debug)]
pub struct SaveHealth {
    threshold: u32,
    consecutive_failures: AtomicU32,
    writes_succeeded: AtomicU64,
    writes_failed: AtomicU64,
    last_success_at: Mutex<Option<Timestamp>>,
    last_error: Mutex<Option<SaveErrorRecord>>,
}

impl SaveHealth {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            writes_succeeded: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            last_success_at: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn record(&self, outcome: &SaveOutcome) {
        match outcome {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.writes_succeeded.fetch_add(1, Ordering::Relaxed);
                *self.last_success_at.lock() = Some(timestamp::now());
            }
            Err(failure) => {
                let streak =
                    self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.writes_failed.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(SaveErrorRecord {
                    message: failure.to_string(),
                    at: timestamp::now(),
                });

                if streak >= self.threshold {
                    error!(
                        target: "state::save",
                        severity = "critical",
                        consecutive_failures = streak,
                        error = %failure,
                        "state persistence is failing repeatedly; job state may be lost on exit"
                    );
                } else {
                    warn!(
                        target: "state::save",
                        consecutive_failures = streak,
                        error = %failure,
                        "state save failed"
                    );
                }
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) < self.threshold
    }

    pub fn last_error(&self) -> Option<SaveErrorRecord> {
        self.last_error.lock().clone()
    }

    pub fn snapshot(&self) -> SaveHealthSnapshot {
        SaveHealthSnapshot {
            healthy: self.is_healthy(),
            consecutive_failures: self
                .consecutive_failures
                .load(Ordering::Relaxed),
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            last_success_at: *self.last_success_at.lock(),
            last_error: self.last_error(),
        }
    }
}
