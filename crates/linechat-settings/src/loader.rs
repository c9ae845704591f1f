//! Settings loading.
//!
//! Compiled defaults, then the JSON file (see [`deep_merge`]), then
//! `LINECHAT_*` variables, then [`validate`]. A missing file is not an error.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::LinechatSettings;

/// Upper bound for `server.shutdownGraceSecs`.
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 3600;

/// Resolve the default settings file path (`~/.linechat/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".linechat").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LinechatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<LinechatSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
fn load_file_layer(path: &Path) -> Result<LinechatSettings> {
    let defaults = serde_json::to_value(LinechatSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Overlay `source` onto `target`.
///
/// Objects merge key by key; a `null` in `source` leaves the target value in
/// place; anything else in `source` wins outright.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut merged), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let combined = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = merged.insert(key, combined);
            }
            Value::Object(merged)
        }
        (_, source) => source,
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &LinechatSettings) -> Result<()> {
    if settings.server.host.trim().is_empty() {
        return Err(SettingsError::InvalidValue("server.host is empty".into()));
    }
    if settings.server.idle_timeout_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.idleTimeoutSecs must be at least 1".into(),
        ));
    }
    if settings.server.max_line_length == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxLineLength must be at least 1".into(),
        ));
    }
    if settings.server.shutdown_grace_secs > MAX_SHUTDOWN_GRACE_SECS {
        return Err(SettingsError::InvalidValue(format!(
            "server.shutdownGraceSecs must be at most {MAX_SHUTDOWN_GRACE_SECS}"
        )));
    }
    Ok(())
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut LinechatSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_overrides<F>(settings: &mut LinechatSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.string("LINECHAT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("LINECHAT_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("LINECHAT_IDLE_TIMEOUT_SECS", 1, 86_400) {
        settings.server.idle_timeout_secs = v;
    }
    if let Some(v) = env.usize("LINECHAT_MAX_LINE_LENGTH", 1, 1_048_576) {
        settings.server.max_line_length = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = env.string("LINECHAT_LOG_LEVEL") {
        match serde_json::from_value(Value::String(v.to_lowercase())) {
            Ok(level) => settings.logging.level = level,
            Err(_) => tracing::warn!(key = "LINECHAT_LOG_LEVEL", value = %v, "invalid log level, ignoring"),
        }
    }
    if let Some(v) = env.string("LINECHAT_LOG_FORMAT") {
        match serde_json::from_value(Value::String(v.to_lowercase())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => tracing::warn!(key = "LINECHAT_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
