use std::time::Duration;

use anyhow::Context;

/// Value of `name`, ignoring unset and blank variables.
pub fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

/// Parse a humantime duration such as `250ms`, `2s` or `5m`. A bare integer
/// is read as milliseconds.
pub fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(raw)
        .with_context(|| format!("failed to parse duration '{raw}'"))
}

pub fn parse_duration_var(name: &str) -> anyhow::Result<Option<Duration>> {
    non_empty_var(name)
        .map(|raw| parse_duration(&raw).with_context(|| format!("invalid {name}")))
        .transpose()
}
