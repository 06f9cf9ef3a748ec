//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ConsultSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `CONSULT_*` environment overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ConsultSettings;

/// Resolve the path to the settings file (`~/.consult/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".consult").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ConsultSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConsultSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<ConsultSettings> {
    let defaults = serde_json::to_value(ConsultSettings::default())?;
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

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning, leaving the file/default value in place.
pub fn apply_env_overrides(settings: &mut ConsultSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("CONSULT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("CONSULT_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = env.u64_in("CONSULT_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = usize::try_from(v).unwrap_or(settings.server.max_connections);
    }
    if let Some(v) = env.u64_in("CONSULT_HEARTBEAT_INTERVAL_SECS", 1, 3_600) {
        settings.liveness.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64_in("CONSULT_CLEANUP_INTERVAL_SECS", 1, 3_600) {
        settings.liveness.cleanup_interval_secs = v;
    }
    if let Some(v) = env.u64_in("CONSULT_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
        settings.liveness.timeout_secs = v;
    }
    if let Some(v) = env.u64_in("CONSULT_SEND_TIMEOUT_MS", 10, 600_000) {
        settings.delivery.send_timeout_ms = v;
    }
    if let Some(v) = env.string("CONSULT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("CONSULT_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let parsed = parse_bool(&val);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        parsed
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        parsed
    }
}
