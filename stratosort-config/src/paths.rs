use std::path::PathBuf;

use directories::ProjectDirs;

pub const STATE_FILE_NAME: &str = "processing-state.json";

/// `<app-data>/processing-state.json` for the current user.
///
/// Falls back to the working directory when the platform exposes no home
/// directory (containers, some CI runners).
pub fn default_state_path() -> PathBuf {
    match ProjectDirs::from("", "stratosort", "stratosort") {
        Some(dirs) => dirs.data_dir().join(STATE_FILE_NAME),
        None => {
            tracing::debug!("no platform data dir; using working directory for state file");
            PathBuf::from(STATE_FILE_NAME)
        }
    }
}
