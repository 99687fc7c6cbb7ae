//! Eviction policy applied by the periodic sweep.
//!
//! Order matters: TTL eviction of ready entries runs before the capacity cap,
//! so the cap only ever trims entries that were still within their TTL.

use serde::Serialize;

use crate::config::RetentionConfig;
use crate::document::StateDocument;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub jobs_expired: usize,
    pub ready_expired: usize,
    pub ready_over_cap: usize,
    pub batches_expired: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.jobs_expired
            + self.ready_expired
            + self.ready_over_cap
            + self.batches_expired
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Apply one sweep pass to `doc` at instant `now`.
pub fn sweep(
    doc: &mut StateDocument,
    retention: &RetentionConfig,
    now: Timestamp,
) -> SweepReport {
    let report = SweepReport {
        jobs_expired: doc.analysis.jobs.expire(now, retention),
        ready_expired: doc.analysis.ready.expire(now, retention.ready_ttl()),
        ready_over_cap: doc
            .analysis
            .ready
            .enforce_cap(retention.ready_max_entries),
        batches_expired: doc.organize.batches.expire(now, retention),
    };

    if report.jobs_expired + report.ready_expired + report.ready_over_cap > 0 {
        doc.touch_analysis(now);
    }
    if report.batches_expired > 0 {
        doc.touch_organize(now);
    }
    report
}
