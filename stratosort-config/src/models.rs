use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use stratosort_state::StoreConfig;

use crate::{paths, util};

/// Longest retention accepted for any TTL: ten years.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;
/// Largest rename backoff unit accepted (ms).
pub const MAX_RENAME_BACKOFF_MS: u64 = 60_000;
/// Largest debounce window accepted (ms).
pub const MAX_DEBOUNCE_MS: u64 = 60 * 60 * 1_000;

const DEFAULT_FILES: &[&str] = &[
    "state-store.toml",
    "state-store.json",
    "config/state-store.toml",
    "config/state-store.json",
];

/// Source that produced the state store settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StateStoreConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl fmt::Display for StateStoreConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("built-in defaults"),
            Self::EnvPath(path) => {
                write!(f, "$STATE_STORE_CONFIG_PATH ({})", path.display())
            }
            Self::EnvInline => f.write_str("$STATE_STORE_CONFIG_JSON"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl StateStoreConfigSource {
    /// Highest-priority source available right now: the env path, then
    /// inline JSON, then the first default file that exists.
    pub fn discover() -> Self {
        if let Some(path) = util::non_empty_var("STATE_STORE_CONFIG_PATH") {
            return Self::EnvPath(PathBuf::from(path));
        }
        if util::non_empty_var("STATE_STORE_CONFIG_JSON").is_some() {
            return Self::EnvInline;
        }
        DEFAULT_FILES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| Self::File(path.to_path_buf()))
            .unwrap_or_default()
    }

    /// Settings as written in this source, before env overrides.
    fn read(&self) -> anyhow::Result<StateStoreSettings> {
        match self {
            Self::Default => Ok(StateStoreSettings::default()),
            Self::EnvPath(path) | Self::File(path) => {
                StateStoreSettings::load_from_file(path)
            }
            Self::EnvInline => {
                let raw = util::non_empty_var("STATE_STORE_CONFIG_JSON")
                    .unwrap_or_default();
                StateStoreSettings::parse(&raw, Format::Json)
            }
        }
    }
}

/// How to interpret a settings payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
    /// Unknown extension: try TOML, then JSON.
    Either,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::Toml,
            Some("json") => Self::Json,
            _ => Self::Either,
        }
    }
}

/// Where the state file lives and how the store behaves.
///
/// Every field has a default, so a file only needs the values it changes:
///
/// ```toml
/// state_path = "/var/lib/stratosort/processing-state.json"
///
/// [store.save]
/// debounce_ms = 250
///
/// [store.retention]
/// ready_max_entries = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateStoreSettings {
    /// Absolute path of the JSON state file. Defaults to the per-user
    /// app-data directory.
    pub state_path: PathBuf,
    /// Debounce, retry, retention, and sweep tuning.
    pub store: StoreConfig,
}

impl Default for StateStoreSettings {
    fn default() -> Self {
        Self {
            state_path: paths::default_state_path(),
            store: StoreConfig::default(),
        }
    }
}

impl StateStoreSettings {
    /// Load `.env` (if present), then [`StateStoreSettings::load_from_env`].
    pub fn load() -> anyhow::Result<(Self, StateStoreConfigSource)> {
        load_env_file()?;
        Self::load_from_env()
    }

    /// Resolve settings from the environment: read the discovered source,
    /// apply `STATE_STORE_PATH`/`_SAVE_DEBOUNCE`/`_SWEEP_INTERVAL` on top,
    /// and validate the result.
    pub fn load_from_env() -> anyhow::Result<(Self, StateStoreConfigSource)> {
        let source = StateStoreConfigSource::discover();
        let mut settings = source
            .read()
            .with_context(|| format!("failed to load state store settings from {source}"))?;
        settings.apply_env_overrides()?;
        settings
            .validate()
            .with_context(|| format!("invalid state store settings from {source}"))?;
        tracing::debug!(%source, path = %settings.state_path.display(), "state store settings resolved");
        Ok((settings, source))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read state store config from {}", path.display())
        })?;
        Self::parse(&contents, Format::from_path(path))
            .with_context(|| format!("invalid state store config {}", path.display()))
    }

    pub fn parse(contents: &str, format: Format) -> anyhow::Result<Self> {
        match format {
            Format::Toml => toml::from_str(contents).map_err(|err| anyhow!("toml: {err}")),
            Format::Json => {
                serde_json::from_str(contents).map_err(|err| anyhow!("json: {err}"))
            }
            Format::Either => Self::parse(contents, Format::Toml).or_else(|toml_err| {
                Self::parse(contents, Format::Json)
                    .map_err(|json_err| anyhow!("{toml_err}; {json_err}"))
            }),
        }
    }

    /// Apply `STATE_STORE_PATH`, `STATE_STORE_SAVE_DEBOUNCE` and
    /// `STATE_STORE_SWEEP_INTERVAL` on top of whatever was loaded.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Some(path) = util::non_empty_var("STATE_STORE_PATH") {
            self.state_path = PathBuf::from(path);
        }

        if let Some(debounce) = util::parse_duration_var("STATE_STORE_SAVE_DEBOUNCE")? {
            self.store.save.debounce_ms =
                u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        }

        if let Some(interval) = util::parse_duration_var("STATE_STORE_SWEEP_INTERVAL")? {
            // Sub-second intervals round up to one second.
            let secs = interval.as_secs() + u64::from(interval.subsec_nanos() > 0);
            self.store.sweep_interval_secs = secs.max(1);
        }

        Ok(())
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.state_path.as_os_str().is_empty() {
            bail!("state_path must not be empty");
        }
        if self.state_path.is_dir() {
            bail!("state_path {} is a directory", self.state_path.display());
        }

        let save = &self.store.save;
        if save.rename_attempts == 0 {
            bail!("store.save.rename_attempts must be at least 1");
        }
        if save.failure_threshold == 0 {
            bail!("store.save.failure_threshold must be at least 1");
        }
        if save.rename_backoff_ms > MAX_RENAME_BACKOFF_MS {
            bail!(
                "store.save.rename_backoff_ms must be at most {MAX_RENAME_BACKOFF_MS} (got {})",
                save.rename_backoff_ms
            );
        }
        if save.debounce_ms > MAX_DEBOUNCE_MS {
            bail!(
                "store.save.debounce_ms must be at most {MAX_DEBOUNCE_MS} (got {})",
                save.debounce_ms
            );
        }

        let retention = &self.store.retention;
        for (name, value) in [
            ("job_done_ttl_secs", retention.job_done_ttl_secs),
            ("job_failed_ttl_secs", retention.job_failed_ttl_secs),
            ("ready_ttl_secs", retention.ready_ttl_secs),
            ("batch_done_ttl_secs", retention.batch_done_ttl_secs),
            ("batch_failed_ttl_secs", retention.batch_failed_ttl_secs),
        ] {
            if !(0..=MAX_TTL_SECS).contains(&value) {
                bail!(
                    "store.retention.{name} must be between 0 and {MAX_TTL_SECS} (got {value})"
                );
            }
        }
        if retention.ready_max_entries == 0 {
            bail!("store.retention.ready_max_entries must be at least 1");
        }
        if self.store.sweep_interval_secs == 0 {
            bail!("store.sweep_interval_secs must be at least 1");
        }

        Ok(())
    }
}

/// Load `.env` from the working directory when present. Returns whether a
/// file was loaded; a malformed file is an error.
pub fn load_env_file() -> anyhow::Result<bool> {
    let loaded = dotenvy::dotenv().map(|_| true).or_else(|err| match err {
        dotenvy::Error::Io(_) => Ok(false),
        _ => Err(err),
    })?;
    if loaded {
        tracing::debug!("loaded .env file");
    }
    Ok(loaded)
}
