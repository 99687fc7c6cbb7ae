use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SaveConfig;
use crate::document::StateDocument;
use crate::error::{SaveFailure, SaveOutcome};

/// Replaces the canonical state file through tmp + rename, so readers only
/// ever observe the previous document or the new one.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    path: PathBuf,
    rename_attempts: u32,
    rename_backoff: Duration,
}

impl AtomicWriter {
    pub fn new(path: PathBuf, save: &SaveConfig) -> Self {
        Self {
            path,
            rename_attempts: save.rename_attempts.max(1),
            rename_backoff: save.rename_backoff(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, document: &StateDocument) -> SaveOutcome {
        let bytes = document.to_pretty_json().map_err(|err| {
            SaveFailure::new(format!("failed to serialize state: {err}"), 0)
        })?;
        self.write_bytes(&bytes).await
    }

    pub async fn write_bytes(&self, bytes: &[u8]) -> SaveOutcome {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            SaveFailure::new(
                format!(
                    "failed to create state dir {}: {err}",
                    parent.display()
                ),
                0,
            )
        })?;

        let tmp = parent.join(format!(
            ".{}.tmp-{}",
            self.path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("state"),
            Uuid::new_v4().simple()
        ));

        if let Err(err) = write_temp(&tmp, bytes).await {
            discard_temp(&tmp).await;
            return Err(SaveFailure::new(
                format!(
                    "failed to write temp state file {}: {err}",
                    tmp.display()
                ),
                0,
            ));
        }

        let outcome = rename_with_retry(
            self.rename_attempts,
            self.rename_backoff,
            || tokio::fs::rename(&tmp, &self.path),
        )
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err((err, attempts)) => {
                warn!(
                    target: "state::save",
                    attempts,
                    path = %self.path.display(),
                    error = %err,
                    "state file rename failed"
                );
                discard_temp(&tmp).await;
                Err(SaveFailure::new(
                    format!(
                        "failed to move {} -> {}: {err}",
                        tmp.display(),
                        self.path.display()
                    ),
                    attempts,
                ))
            }
        }
    }
}

/// Run `rename` until it succeeds, hits a non-retryable error, or has been
/// tried `attempts` times. Attempt `n` is followed by a `n * backoff` pause.
///
/// Returns the number of attempts used, alongside the last error on failure.
pub(crate) async fn rename_with_retry<F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut rename: F,
) -> Result<u32, (std::io::Error, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match rename().await {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let delay = backoff.saturating_mul(attempt);
                debug!(
                    target: "state::save",
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "state file rename contended; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err((err, attempt)),
        }
    }
}

async fn write_temp(tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

async fn discard_temp(tmp: &Path) {
    if let Err(err) = tokio::fs::remove_file(tmp).await
        && err.kind() != ErrorKind::NotFound
    {
        debug!(target: "state::save", path = %tmp.display(), error = %err, "orphaned temp state file left behind");
    }
}

/// Rename errors that usually clear up once another handle on the target
/// is released.
pub fn is_retryable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::PermissionDenied
            | ErrorKind::ResourceBusy
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp;
    use std::io;
    use tempfile::tempdir;

    fn leftover_temps(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count()
    }

    #[tokio::test]
    async fn replaces_file_and_leaves_no_temp() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("processing-state.json");
        let writer = AtomicWriter::new(path.clone(), &SaveConfig::default());

        let doc = StateDocument::empty(timestamp::now());
        writer.write(&doc).await.expect("first write");
        writer.write(&doc).await.expect("overwrite");

        let reloaded =
            StateDocument::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(reloaded, doc);
        assert_eq!(leftover_temps(path.parent().unwrap()), 0);
    }

    #[tokio::test]
    async fn terminal_failure_cleans_up_temp() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("processing-state.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let writer = AtomicWriter::new(path.clone(), &SaveConfig::default());
        let failure = writer
            .write(&StateDocument::empty(timestamp::now()))
            .await
            .expect_err("rename onto a directory must fail");

        assert_eq!(failure.attempts, 1);
        assert_eq!(leftover_temps(dir.path()), 0);
        assert!(path.is_dir());
    }

    /// Fake rename that fails with `kind` for the first `failures` calls and
    /// records when each call happened.
    fn flaky_rename(
        failures: usize,
        kind: ErrorKind,
        calls: &parking_lot::Mutex<Vec<tokio::time::Instant>>,
    ) -> impl FnMut() -> std::future::Ready<io::Result<()>> + '_ {
        move || {
            let mut calls = calls.lock();
            calls.push(tokio::time::Instant::now());
            let result = if calls.len() <= failures {
                Err(io::Error::from(kind))
            } else {
                Ok(())
            };
            std::future::ready(result)
        }
    }

    fn assert_gap(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(5),
            "expected a pause of {expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn contended_rename_backs_off_linearly_then_succeeds() {
        let calls = parking_lot::Mutex::new(Vec::new());
        let backoff = Duration::from_millis(50);

        let used = rename_with_retry(
            3,
            backoff,
            flaky_rename(2, ErrorKind::PermissionDenied, &calls),
        )
        .await
        .expect("third attempt succeeds");

        assert_eq!(used, 3);
        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert_gap(calls[1] - calls[0], backoff);
        assert_gap(calls[2] - calls[1], backoff * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn contention_gives_up_after_configured_attempts() {
        let calls = parking_lot::Mutex::new(Vec::new());

        let (err, attempts) = rename_with_retry(
            3,
            Duration::from_millis(50),
            flaky_rename(usize::MAX, ErrorKind::ResourceBusy, &calls),
        )
        .await
        .expect_err("every attempt is contended");

        assert_eq!(attempts, 3);
        assert_eq!(err.kind(), ErrorKind::ResourceBusy);
        assert_eq!(calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_rename_error_is_not_retried() {
        let calls = parking_lot::Mutex::new(Vec::new());
        let started = tokio::time::Instant::now();

        let (_, attempts) = rename_with_retry(
            3,
            Duration::from_millis(50),
            flaky_rename(usize::MAX, ErrorKind::IsADirectory, &calls),
        )
        .await
        .expect_err("terminal failure");

        assert_eq!(attempts, 1);
        assert_eq!(calls.lock().len(), 1);
        assert_eq!(tokio::time::Instant::now(), started);
    }

    #[test]
    fn classifies_contention_as_retryable() {
        assert!(is_retryable(&io::Error::from(ErrorKind::PermissionDenied)));
        assert!(is_retryable(&io::Error::from(ErrorKind::ResourceBusy)));
        assert!(!is_retryable(&io::Error::from(ErrorKind::NotFound)));
        assert!(!is_retryable(&io::Error::from(ErrorKind::IsADirectory)));
    }
}
