//! Settings storage for the break engine.
//!
//! Settings are flat `key -> value` pairs such as `timers/micro_pause/limit`.
//! The engine only talks to a [`ConfigProvider`]; two implementations are
//! provided:
//!
//! - [`MemoryConfig`] keeps everything in memory (tests, simulation).
//! - [`JsonConfig`] persists the map as a pretty-printed JSON object in the
//!   application data directory (see [`DataStorage`]).
//!
//! ## Change notifications
//!
//! Listeners register for a key prefix and are called with the changed key
//! after the value actually changed. Callbacks run after the provider's
//! internal lock is released, so they may read or write settings.
//!
//! ## Defaults
//!
//! [`init_defaults`] writes the built-in defaults for every key that is not
//! set yet and migrates settings written by older versions.
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! use respite::libs::config::{init_defaults, ConfigProvider, ConfigValue, JsonConfig};
//!
//! let config = JsonConfig::open_default()?;
//! init_defaults(&config);
//! config.set("timers/micro_pause/limit", ConfigValue::Int(300));
//! assert_eq!(config.get_int("timers/micro_pause/limit"), Some(300));
//! # Ok::<(), anyhow::Error>(())
//! ```

use super::data_storage::DataStorage;
use crate::libs::break_kind::BreakKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Settings file name inside the data directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

pub const TIMERS_PREFIX: &str = "timers/";
pub const BREAKS_PREFIX: &str = "breaks/";
pub const MONITOR_PREFIX: &str = "monitor/";

pub const TIMER_LIMIT: &str = "limit";
pub const TIMER_AUTO_RESET: &str = "auto_reset";
pub const TIMER_RESET_PRED: &str = "reset_pred";
pub const TIMER_SNOOZE: &str = "snooze";
pub const BREAK_MAX_PRELUDES: &str = "max_preludes";
pub const BREAK_ENABLED: &str = "enabled";

pub const USE_MICROBREAK_ACTIVITY: &str = "timers/daily_limit/use_microbreak_activity";
/// Older versions selected the daily limit's activity source here.
pub const LEGACY_DAILY_LIMIT_MONITOR: &str = "timers/daily_limit/monitor";
const LEGACY_MONITOR_REPLACED: &str = "deprecated. replaced by use_microbreak_activity";

pub const MONITOR_NOISE: &str = "monitor/noise";
pub const MONITOR_ACTIVITY: &str = "monitor/activity";
pub const MONITOR_IDLE: &str = "monitor/idle";
pub const MONITOR_SENSITIVITY: &str = "monitor/sensitivity";
pub const MONITOR_BACKEND: &str = "monitor/backend";

/// `timers/<break>/<field>`
pub fn timer_key(kind: BreakKind, field: &str) -> String {
    format!("{}{}/{}", TIMERS_PREFIX, kind.config_name(), field)
}

/// `breaks/<break>/<field>`
pub fn break_key(kind: BreakKind, field: &str) -> String {
    format!("{}{}/{}", BREAKS_PREFIX, kind.config_name(), field)
}

/// Monitor thresholds below 50 were stored in seconds by older versions.
pub fn monitor_millis(value: i64) -> u64 {
    let value = value.max(0) as u64;
    if value < 50 {
        value * 1000
    } else {
        value
    }
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl ConfigValue {
    /// Interprets command-line text: booleans, then integers, then
    /// floating point numbers, otherwise a string.
    pub fn parse_loose(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(value) = trimmed.parse::<bool>() {
            ConfigValue::Bool(value)
        } else if let Ok(value) = trimmed.parse::<i64>() {
            ConfigValue::Int(value)
        } else if let Ok(value) = trimmed.parse::<f64>() {
            ConfigValue::Double(value)
        } else {
            ConfigValue::String(text.to_string())
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Double(_) => "double",
            ConfigValue::String(_) => "string",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(value) => write!(f, "{}", value),
            ConfigValue::Int(value) => write!(f, "{}", value),
            ConfigValue::Double(value) => write!(f, "{}", value),
            ConfigValue::String(value) => write!(f, "\"{}\"", value),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Double(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

/// Errors reading the settings file.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type ListenerId = u64;

/// Called with the key that changed.
pub type ConfigCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Access to named settings.
///
/// Type mismatches read as absent. Writes report failure as `false`.
pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn set(&self, key: &str, value: ConfigValue) -> bool;

    /// Removes a key. Returns `false` when it could not be persisted.
    fn remove(&self, key: &str) -> bool;

    /// All keys currently set, sorted.
    fn keys(&self) -> Vec<String>;

    fn add_listener(&self, prefix: &str, callback: ConfigCallback) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            ConfigValue::Int(value) => Some(value),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            ConfigValue::Bool(value) => Some(value),
            _ => None,
        }
    }

    fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            ConfigValue::Double(value) => Some(value),
            ConfigValue::Int(value) => Some(value as f64),
            _ => None,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            ConfigValue::String(value) => Some(value),
            _ => None,
        }
    }
}

struct Listener {
    id: ListenerId,
    prefix: String,
    callback: ConfigCallback,
}

/// Prefix-scoped change listeners shared by the providers.
#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<Listener>>,
}

impl Listeners {
    fn add(&self, prefix: &str, callback: ConfigCallback) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().push(Listener {
            id,
            prefix: prefix.to_string(),
            callback,
        });
        id
    }

    fn remove(&self, id: ListenerId) {
        self.entries.lock().retain(|listener| listener.id != id);
    }

    fn notify(&self, key: &str) {
        let matching: Vec<ConfigCallback> = self
            .entries
            .lock()
            .iter()
            .filter(|listener| key.starts_with(&listener.prefix))
            .map(|listener| listener.callback.clone())
            .collect();
        for callback in matching {
            callback(key);
        }
    }
}

/// In-memory settings.
#[derive(Default)]
pub struct MemoryConfig {
    values: Mutex<BTreeMap<String, ConfigValue>>,
    listeners: Listeners,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values(values: BTreeMap<String, ConfigValue>) -> Self {
        Self {
            values: Mutex::new(values),
            listeners: Listeners::default(),
        }
    }

    /// Stores `value`; returns whether it differed from the previous one.
    fn store(&self, key: &str, value: ConfigValue) -> bool {
        let mut values = self.values.lock();
        if values.get(key) == Some(&value) {
            return false;
        }
        values.insert(key.to_string(), value);
        true
    }

    fn discard(&self, key: &str) -> bool {
        self.values.lock().remove(key).is_some()
    }

    fn snapshot(&self) -> BTreeMap<String, ConfigValue> {
        self.values.lock().clone()
    }
}

impl ConfigProvider for MemoryConfig {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: ConfigValue) -> bool {
        if self.store(key, value) {
            self.listeners.notify(key);
        }
        true
    }

    fn remove(&self, key: &str) -> bool {
        if self.discard(key) {
            self.listeners.notify(key);
        }
        true
    }

    fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }

    fn add_listener(&self, prefix: &str, callback: ConfigCallback) -> ListenerId {
        self.listeners.add(prefix, callback)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id)
    }
}

/// Settings persisted as a flat JSON object.
pub struct JsonConfig {
    path: PathBuf,
    memory: MemoryConfig,
    write_lock: Mutex<()>,
}

impl JsonConfig {
    /// Opens the settings file at `path`. A missing file means no settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| ConfigFileError::Io {
                path: path.clone(),
                source,
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|source| ConfigFileError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            BTreeMap::new()
        };
        debug!("loaded {} settings from {}", values.len(), path.display());

        Ok(Self {
            path,
            memory: MemoryConfig::with_values(values),
            write_lock: Mutex::new(()),
        })
    }

    /// Opens `settings.json` in the application data directory.
    pub fn open_default() -> anyhow::Result<Self> {
        let path = DataStorage::new().get_path(SETTINGS_FILE_NAME)?;
        Ok(Self::open(path)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes every setting and deletes the file.
    pub fn clear(&self) -> Result<(), ConfigFileError> {
        let keys = self.memory.keys();
        for key in &keys {
            self.memory.discard(key);
        }
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|source| ConfigFileError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        for key in &keys {
            self.memory.listeners.notify(key);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), ConfigFileError> {
        let _guard = self.write_lock.lock();
        let io_error = |source| ConfigFileError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let file = File::create(&self.path).map_err(io_error)?;
        serde_json::to_writer_pretty(&file, &self.memory.snapshot()).map_err(|source| ConfigFileError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn persist_logged(&self) -> bool {
        match self.persist() {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to save settings: {}", e);
                false
            }
        }
    }
}

impl ConfigProvider for JsonConfig {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.memory.get(key)
    }

    fn set(&self, key: &str, value: ConfigValue) -> bool {
        if !self.memory.store(key, value) {
            return true;
        }
        let saved = self.persist_logged();
        self.memory.listeners.notify(key);
        saved
    }

    fn remove(&self, key: &str) -> bool {
        if !self.memory.discard(key) {
            return true;
        }
        let saved = self.persist_logged();
        self.memory.listeners.notify(key);
        saved
    }

    fn keys(&self) -> Vec<String> {
        self.memory.keys()
    }

    fn add_listener(&self, prefix: &str, callback: ConfigCallback) -> ListenerId {
        self.memory.add_listener(prefix, callback)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.memory.remove_listener(id)
    }
}

/// Built-in defaults, in break ordinal order.
pub fn defaults() -> Vec<(String, ConfigValue)> {
    let mut values = Vec::new();
    for kind in BreakKind::ALL {
        let (limit, auto_reset, reset_pred, snooze) = match kind {
            BreakKind::MicroBreak => (180, 30, "", 150),
            BreakKind::RestBreak => (2700, 600, "", 180),
            BreakKind::DailyLimit => (14400, 0, "day/4:00", 1200),
        };
        values.push((timer_key(kind, TIMER_LIMIT), ConfigValue::Int(limit)));
        values.push((timer_key(kind, TIMER_AUTO_RESET), ConfigValue::Int(auto_reset)));
        values.push((timer_key(kind, TIMER_RESET_PRED), ConfigValue::from(reset_pred)));
        values.push((timer_key(kind, TIMER_SNOOZE), ConfigValue::Int(snooze)));
        values.push((break_key(kind, BREAK_MAX_PRELUDES), ConfigValue::Int(3)));
        values.push((break_key(kind, BREAK_ENABLED), ConfigValue::Bool(true)));
    }
    values.push((USE_MICROBREAK_ACTIVITY.to_string(), ConfigValue::Bool(false)));
    values.push((MONITOR_NOISE.to_string(), ConfigValue::Int(9000)));
    values.push((MONITOR_ACTIVITY.to_string(), ConfigValue::Int(0)));
    values.push((MONITOR_IDLE.to_string(), ConfigValue::Int(5000)));
    values.push((MONITOR_SENSITIVITY.to_string(), ConfigValue::Int(3)));
    values.push((MONITOR_BACKEND.to_string(), ConfigValue::from("auto")));
    values
}

/// Looks up the built-in default of a key.
pub fn default_value(key: &str) -> Option<ConfigValue> {
    defaults().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Writes defaults for absent keys and migrates legacy settings.
/// Returns `false` when any write failed.
pub fn init_defaults(config: &dyn ConfigProvider) -> bool {
    let mut ok = true;
    for (key, value) in defaults() {
        if config.get(&key).is_none() {
            ok &= config.set(&key, value);
        }
    }

    if config.get_string(LEGACY_DAILY_LIMIT_MONITOR).as_deref() == Some("micro_pause") {
        debug!("migrating {}", LEGACY_DAILY_LIMIT_MONITOR);
        ok &= config.set(LEGACY_DAILY_LIMIT_MONITOR, ConfigValue::from(LEGACY_MONITOR_REPLACED));
        ok &= config.set(USE_MICROBREAK_ACTIVITY, ConfigValue::Bool(true));
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_type_mismatch_reads_as_absent() {
        let config = MemoryConfig::new();
        config.set("timers/micro_pause/limit", ConfigValue::Int(180));
        assert_eq!(config.get_string("timers/micro_pause/limit"), None);
        assert_eq!(config.get_bool("timers/micro_pause/limit"), None);
        assert_eq!(config.get_double("timers/micro_pause/limit"), Some(180.0));
        assert_eq!(config.get_int("missing"), None);
    }

    #[test]
    fn test_listeners_fire_on_change_only() {
        let config = MemoryConfig::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = config.add_listener(
            "timers/rest_break/",
            Arc::new(move |_key: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        config.set("timers/rest_break/limit", ConfigValue::Int(10));
        config.set("timers/rest_break/limit", ConfigValue::Int(10));
        config.set("timers/micro_pause/limit", ConfigValue::Int(10));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        config.remove_listener(id);
        config.set("timers/rest_break/limit", ConfigValue::Int(11));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_loose() {
        assert_eq!(ConfigValue::parse_loose("true"), ConfigValue::Bool(true));
        assert_eq!(ConfigValue::parse_loose("42"), ConfigValue::Int(42));
        assert_eq!(ConfigValue::parse_loose("0.5"), ConfigValue::Double(0.5));
        assert_eq!(ConfigValue::parse_loose("day/4:00"), ConfigValue::from("day/4:00"));
    }

    #[test]
    fn test_init_defaults_keeps_existing_and_migrates() {
        let config = MemoryConfig::new();
        config.set("timers/micro_pause/limit", ConfigValue::Int(300));
        config.set(LEGACY_DAILY_LIMIT_MONITOR, ConfigValue::from("micro_pause"));

        assert!(init_defaults(&config));
        assert_eq!(config.get_int("timers/micro_pause/limit"), Some(300));
        assert_eq!(config.get_int("timers/rest_break/limit"), Some(2700));
        assert_eq!(config.get_string("timers/daily_limit/reset_pred").as_deref(), Some("day/4:00"));
        assert_eq!(config.get_bool(USE_MICROBREAK_ACTIVITY), Some(true));
    }

    #[test]
    fn test_monitor_millis() {
        assert_eq!(monitor_millis(5), 5000);
        assert_eq!(monitor_millis(0), 0);
        assert_eq!(monitor_millis(9000), 9000);
    }
}
