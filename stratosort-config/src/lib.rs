//! Configuration for hosts embedding the StratoSort state store.
//!
//! Resolves where the state file lives, loads [`StoreConfig`] overrides from
//! files or the environment, and installs the tracing subscriber host
//! binaries log through.

pub mod models;
pub mod paths;
pub mod telemetry;
pub mod util;

pub use models::{Format, StateStoreConfigSource, StateStoreSettings, load_env_file};
pub use paths::{STATE_FILE_NAME, default_state_path};
pub use stratosort_state::StoreConfig;
pub use telemetry::init_tracing;
