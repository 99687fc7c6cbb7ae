mod support;

use stratosort_state::{StateDocument, StoreError};
use support::{fast_config, open_store, read_json, state_path};
use tempfile::tempdir;

fn corrupt_backups(dir: &tempfile::TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("processing-state.json.corrupt-"))
        .collect()
}

#[tokio::test]
async fn corrupt_file_resets_to_empty_document() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(state_path(&dir), b"{ \"analysis\": [not json").unwrap();

    let store = open_store(&dir, fast_config());
    store.initialize().await.expect("recovers from corruption");

    assert!(store.get_incomplete_analyses().await.unwrap().is_empty());
    let bytes = std::fs::read(state_path(&dir)).unwrap();
    let doc = StateDocument::from_slice(&bytes).expect("rewritten file is valid");
    assert!(doc.analysis.jobs.is_empty());
    assert_eq!(corrupt_backups(&dir).len(), 1);
}

#[tokio::test]
async fn unknown_schema_version_is_treated_as_corrupt() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(
        state_path(&dir),
        br#"{"schemaVersion": 99, "analysis": {"jobs": {}}, "organize": {"batches": {}}}"#,
    )
    .unwrap();

    let store = open_store(&dir, fast_config());
    store.initialize().await.unwrap();

    assert_eq!(read_json(&state_path(&dir))["schemaVersion"], 1);
    assert_eq!(corrupt_backups(&dir).len(), 1);
}

#[tokio::test]
async fn missing_file_is_created() {
    let dir = tempdir().expect("tempdir");
    let nested = dir.path().join("app-data").join("processing-state.json");
    let store = stratosort_state::StateStore::new(&nested, fast_config());

    store.initialize().await.unwrap();

    assert!(nested.exists());
    assert!(store.is_save_healthy());
}

#[tokio::test]
async fn repeated_write_failures_degrade_health() {
    let dir = tempdir().expect("tempdir");
    let path = state_path(&dir);
    let store = open_store(&dir, fast_config());
    store.initialize().await.unwrap();
    assert!(store.is_save_healthy());

    // A non-empty directory at the target makes every rename fail.
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("blocker"), b"x").unwrap();

    for i in 0..3 {
        let err = store
            .mark_analysis_start(&format!("/fail/{i}"))
            .await
            .expect_err("save must fail");
        assert!(matches!(err, StoreError::Save(_)));
    }

    assert!(!store.is_save_healthy());
    let health = store.save_health();
    assert_eq!(health.consecutive_failures, 3);
    assert!(store.last_save_error().is_some());

    // The in-memory state still holds every mutation.
    assert_eq!(store.get_incomplete_analyses().await.unwrap().len(), 3);

    // No temp files are left next to the target.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty());

    // Recovery resets the streak but keeps the last error for diagnostics.
    std::fs::remove_dir_all(&path).unwrap();
    store.mark_analysis_start("/fail/ok").await.unwrap();
    assert!(store.is_save_healthy());
    assert!(store.last_save_error().is_some());
}
