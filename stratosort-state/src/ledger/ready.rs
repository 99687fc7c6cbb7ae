use std::{cmp::Ordering, collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sanitize::{AnalysisSummary, sanitize_analysis};
use crate::timestamp::{self, Timestamp};

/// Filesystem facts captured for a ready entry. Every field is best-effort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMeta {
    pub size: Option<u64>,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
}

impl FileMeta {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            size: Some(meta.len()),
            created: meta.created().ok().map(Timestamp::from),
            modified: meta.modified().ok().map(Timestamp::from),
        }
    }
}

/// A completed analysis waiting to be consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEntry {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "timestamp::lenient_or_stale")]
    pub created: Option<Timestamp>,
    #[serde(default, deserialize_with = "timestamp::lenient_or_stale")]
    pub modified: Option<Timestamp>,
    #[serde(default, deserialize_with = "timestamp::lenient_or_stale")]
    pub analyzed_at: Option<Timestamp>,
    #[serde(default)]
    pub analysis: AnalysisSummary,
}

impl ReadyEntry {
    /// Best available recency stamp. An unreadable `analyzed_at` wins over
    /// the file times, so the entry ages out instead of borrowing them.
    pub fn recency(&self) -> Option<Timestamp> {
        self.analyzed_at.or(self.modified).or(self.created)
    }
}

/// Capped queue of sanitized results keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadyQueue {
    entries: BTreeMap<String, ReadyEntry>,
}

impl ReadyQueue {
    /// Sanitize and store a result, then enforce `cap`. Returns false (and
    /// stores nothing) when the payload has no usable content.
    pub fn upsert(
        &mut self,
        key: &str,
        raw: &Value,
        meta: FileMeta,
        now: Timestamp,
        cap: usize,
    ) -> bool {
        let Some(analysis) = sanitize_analysis(raw) else {
            return false;
        };

        self.entries.insert(
            key.to_owned(),
            ReadyEntry {
                path: key.to_owned(),
                name: display_name(key),
                size: meta.size,
                created: meta.created,
                modified: meta.modified,
                analyzed_at: Some(now),
                analysis,
            },
        );
        self.enforce_cap(cap);
        true
    }

    pub fn get(&self, key: &str) -> Option<&ReadyEntry> {
        self.entries.get(key)
    }

    pub fn clear(&mut self, key: &str) -> Option<ReadyEntry> {
        self.entries.remove(key)
    }

    /// Most recent first; entries without a usable stamp sort last.
    pub fn list(&self, limit: Option<usize>) -> Vec<ReadyEntry> {
        let mut out: Vec<(&String, &ReadyEntry)> = self.entries.iter().collect();
        out.sort_by(|a, b| by_recency(*b, *a));
        out.into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Re-key an entry, rewriting its path and display name.
    pub fn relocate(&mut self, old_key: &str, new_key: &str) -> bool {
        if old_key == new_key {
            return self.entries.contains_key(old_key);
        }
        let Some(mut entry) = self.entries.remove(old_key) else {
            return false;
        };
        entry.path = new_key.to_owned();
        entry.name = display_name(new_key);
        self.entries.insert(new_key.to_owned(), entry);
        true
    }

    /// Drop entries older than `ttl` or without a parsable stamp.
    pub fn expire(&mut self, now: Timestamp, ttl: chrono::Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !timestamp::is_expired(entry.recency(), now, ttl));
        before - self.entries.len()
    }

    /// Evict the oldest entries until at most `cap` remain.
    pub fn enforce_cap(&mut self, cap: usize) -> usize {
        let excess = self.entries.len().saturating_sub(cap);
        if excess == 0 {
            return 0;
        }

        let mut oldest: Vec<(&String, &ReadyEntry)> =
            self.entries.iter().collect();
        oldest.sort_by(|a, b| by_recency(*a, *b));
        let doomed: Vec<String> = oldest
            .into_iter()
            .take(excess)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.entries.remove(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ascending recency; ties fall back to the key so eviction is stable.
fn by_recency(
    (key_a, a): (&String, &ReadyEntry),
    (key_b, b): (&String, &ReadyEntry),
) -> Ordering {
    a.recency()
        .cmp(&b.recency())
        .then_with(|| key_a.cmp(key_b))
}

fn display_name(key: &str) -> String {
    Path::new(key)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.to_owned())
}
