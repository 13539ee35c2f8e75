//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TETHER_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge: objects merge per key, everything else is replaced, and
//! `null` in the file keeps the default.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TetherSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed validation is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, resolving environment variables through `env`.
pub fn load_settings_with<F>(path: &Path, env: F) -> Result<TetherSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
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

/// Apply `TETHER_*` overrides resolved through `env`.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning.
pub fn apply_env_overrides<F>(settings: &mut TetherSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let conn = &mut settings.connection;
    if let Some(v) = read_string(&env, "TETHER_URL") {
        conn.url = v;
    }
    if let Some(v) = read_u32(&env, "TETHER_MAX_RECONNECT_ATTEMPTS", 1, 1_000) {
        conn.max_reconnect_attempts = v;
    }
    if let Some(v) = read_u64(&env, "TETHER_RECONNECT_DELAY_MS", 10, 600_000) {
        conn.reconnect_delay_ms = v;
        conn.reconnect_delay_max_ms = conn.reconnect_delay_max_ms.max(v);
    }
    if let Some(v) = read_u64(&env, "TETHER_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        conn.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_u64(&env, "TETHER_HEARTBEAT_TIMEOUT_MS", 50, 600_000) {
        conn.heartbeat_timeout_ms = v;
    }
    if let Some(v) = read_u64(&env, "TETHER_HIGH_LATENCY_MS", 1, 600_000) {
        conn.high_latency_threshold_ms = v;
    }
    if let Some(v) = read_bool(&env, "TETHER_FORCE_RECONNECT") {
        conn.force_reconnect_on_timeout = v;
    }
    if let Some(v) = read_string(&env, "TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

fn read_string<F: Fn(&str) -> Option<String>>(env: &F, name: &str) -> Option<String> {
    env(name).filter(|v| !v.is_empty())
}

fn read_bool<F: Fn(&str) -> Option<String>>(env: &F, name: &str) -> Option<bool> {
    let val = env(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_u64<F: Fn(&str) -> Option<String>>(env: &F, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = env(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, min, max, "invalid numeric env var, ignoring");
    }
    result
}

fn read_u32<F: Fn(&str) -> Option<String>>(env: &F, name: &str, min: u32, max: u32) -> Option<u32> {
    read_u64(env, name, u64::from(min), u64::from(max)).and_then(|v| u32::try_from(v).ok())
}
