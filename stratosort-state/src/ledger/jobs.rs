use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::RetentionConfig;
use crate::timestamp::{self, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Lifecycle record for one file's analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub status: JobStatus,
    #[serde(default, deserialize_with = "timestamp::lenient_or_stale")]
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "timestamp::lenient_or_stale")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "timestamp::lenient_or_stale")]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub error: Option<String>,
    /// Key the job was tracked under before the file was moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<String>,
}

impl Job {
    fn started(now: Timestamp) -> Self {
        Self {
            status: JobStatus::InProgress,
            started_at: Some(now),
            updated_at: Some(now),
            completed_at: None,
            error: None,
            moved_from: None,
        }
    }

    /// Stamp used for TTL decisions once the job is terminal.
    pub fn settled_at(&self) -> Option<Timestamp> {
        self.completed_at.or(self.updated_at).or(self.started_at)
    }
}

/// Per-path analysis jobs, persisted as a JSON object keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobLedger {
    jobs: BTreeMap<String, Job>,
}

impl JobLedger {
    /// Starting an already-tracked job restarts it and clears any old result.
    pub fn mark_start(&mut self, key: &str, now: Timestamp) {
        self.jobs.insert(key.to_owned(), Job::started(now));
    }

    pub fn mark_complete(&mut self, key: &str, now: Timestamp) {
        let job = self
            .jobs
            .entry(key.to_owned())
            .or_insert_with(|| Job::started(now));
        job.status = JobStatus::Done;
        job.updated_at = Some(now);
        job.completed_at = Some(now);
        job.error = None;
    }

    pub fn mark_failed(&mut self, key: &str, message: &str, now: Timestamp) {
        let job = self
            .jobs
            .entry(key.to_owned())
            .or_insert_with(|| Job::started(now));
        job.status = JobStatus::Failed;
        job.updated_at = Some(now);
        job.completed_at = Some(now);
        job.error = Some(message.to_owned());
    }

    pub fn status(&self, key: &str) -> Option<JobStatus> {
        self.jobs.get(key).map(|job| job.status)
    }

    pub fn get(&self, key: &str) -> Option<&Job> {
        self.jobs.get(key)
    }

    pub fn clear(&mut self, key: &str) -> Option<Job> {
        self.jobs.remove(key)
    }

    /// Jobs that were never settled, oldest start first. These are the ones a
    /// host resumes after a crash.
    pub fn list_incomplete(&self) -> Vec<(String, Job)> {
        let mut out: Vec<(String, Job)> = self
            .jobs
            .iter()
            .filter(|(_, job)| !job.status.is_terminal())
            .map(|(key, job)| (key.clone(), job.clone()))
            .collect();
        out.sort_by(|(ka, a), (kb, b)| {
            a.started_at.cmp(&b.started_at).then_with(|| ka.cmp(kb))
        });
        out
    }

    /// Re-key a job, recording where it came from. Returns false when
    /// `old_key` is not tracked.
    pub fn relocate(&mut self, old_key: &str, new_key: &str) -> bool {
        if old_key == new_key {
            return self.jobs.contains_key(old_key);
        }
        let Some(mut job) = self.jobs.remove(old_key) else {
            return false;
        };
        job.moved_from = Some(old_key.to_owned());
        self.jobs.insert(new_key.to_owned(), job);
        true
    }

    /// Drop terminal jobs whose settle stamp is past its TTL or missing.
    pub fn expire(
        &mut self,
        now: Timestamp,
        retention: &RetentionConfig,
    ) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            let ttl = match job.status {
                JobStatus::Done => retention.job_done_ttl(),
                JobStatus::Failed => retention.job_failed_ttl(),
                JobStatus::Pending | JobStatus::InProgress => return true,
            };
            !timestamp::is_expired(job.settled_at(), now, ttl)
        });
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn retention() -> RetentionConfig {
        RetentionConfig::default()
    }

    #[test]
    fn lifecycle_follows_caller_transitions() {
        let now = timestamp::now();
        let mut ledger = JobLedger::default();

        ledger.mark_start("/a", now);
        assert_eq!(ledger.status("/a"), Some(JobStatus::InProgress));

        ledger.mark_complete("/a", now);
        assert_eq!(ledger.status("/a"), Some(JobStatus::Done));
        assert!(ledger.get("/a").unwrap().completed_at.is_some());

        ledger.mark_start("/b", now);
        ledger.mark_failed("/b", "x", now);
        let failed = ledger.get("/b").unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("x"));

        assert_eq!(ledger.status("/unknown"), None);
    }

    #[test]
    fn done_jobs_expire_after_thirty_minutes() {
        let now = timestamp::now();
        let mut ledger = JobLedger::default();
        ledger.mark_complete("/old", now - Duration::minutes(31));
        ledger.mark_complete("/fresh", now - Duration::minutes(29));

        assert_eq!(ledger.expire(now, &retention()), 1);
        assert_eq!(ledger.status("/old"), None);
        assert_eq!(ledger.status("/fresh"), Some(JobStatus::Done));
    }

    #[test]
    fn failed_jobs_outlive_done_ttl_but_not_two_hours() {
        let now = timestamp::now();
        let mut ledger = JobLedger::default();
        ledger.mark_failed("/recent", "boom", now - Duration::minutes(45));
        ledger.mark_failed("/stale", "boom", now - Duration::minutes(121));

        assert_eq!(ledger.expire(now, &retention()), 1);
        assert_eq!(ledger.status("/recent"), Some(JobStatus::Failed));
        assert_eq!(ledger.status("/stale"), None);
    }

    #[test]
    fn in_flight_jobs_are_never_expired() {
        let now = timestamp::now();
        let mut ledger = JobLedger::default();
        ledger.mark_start("/slow", now - Duration::days(30));

        assert_eq!(ledger.expire(now, &retention()), 0);
        assert_eq!(ledger.list_incomplete().len(), 1);
    }

    #[test]
    fn terminal_job_without_stamps_is_expired() {
        let now = timestamp::now();
        let mut ledger: JobLedger =
            serde_json::from_str(r#"{"/x": {"status": "done"}}"#).unwrap();

        assert_eq!(ledger.expire(now, &retention()), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn corrupt_completion_stamp_is_not_rescued_by_start_stamp() {
        let now = timestamp::now();
        let started = (now - Duration::minutes(1)).to_rfc3339();
        let mut ledger: JobLedger = serde_json::from_value(serde_json::json!({
            "/x": { "status": "done", "completedAt": "soon", "startedAt": started },
        }))
        .unwrap();

        assert_eq!(ledger.expire(now, &retention()), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn relocate_records_previous_key() {
        let now = timestamp::now();
        let mut ledger = JobLedger::default();
        ledger.mark_start("/old", now);

        assert!(ledger.relocate("/old", "/new"));
        assert_eq!(ledger.status("/old"), None);
        let moved = ledger.get("/new").unwrap();
        assert_eq!(moved.status, JobStatus::InProgress);
        assert_eq!(moved.moved_from.as_deref(), Some("/old"));

        assert!(!ledger.relocate("/missing", "/elsewhere"));
    }
}
