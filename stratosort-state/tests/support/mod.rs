#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use stratosort_state::{SaveConfig, StateStore, StoreConfig};
use tempfile::TempDir;

/// Store config with a short debounce so tests do not wait half a second per
/// save.
pub fn fast_config() -> StoreConfig {
    StoreConfig {
        save: SaveConfig {
            debounce_ms: 10,
            rename_backoff_ms: 2,
            ..SaveConfig::default()
        },
        ..StoreConfig::default()
    }
}

pub fn state_path(dir: &TempDir) -> PathBuf {
    dir.path().join("processing-state.json")
}

pub fn open_store(dir: &TempDir, config: StoreConfig) -> StateStore {
    StateStore::new(state_path(dir), config)
}

pub fn read_json(path: &Path) -> Value {
    let bytes = std::fs::read(path).expect("read state file");
    serde_json::from_slice(&bytes).expect("state file is valid JSON")
}

pub fn sample_analysis(name: &str) -> Value {
    json!({
        "suggestedName": name,
        "category": "Invoices",
        "keywords": ["billing", "2024"],
        "confidence": 87,
        "summary": "Quarterly invoice from the hosting provider",
    })
}
