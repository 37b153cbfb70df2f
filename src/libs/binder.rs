//! Binds settings to the break timers and the activity monitor.
//!
//! [`ConfigBinder::load`] applies every setting of one break at once. After
//! [`ConfigBinder::bind`], a change to a single key re-applies just that
//! field, so accumulated time survives configuration edits.
//!
//! Missing or mistyped values fall back to the built-in defaults. A
//! malformed reset predicate keeps the previous predicate.

use crate::libs::activity::{ActivityMonitor, BackendChoice, MonitorSettings};
use crate::libs::break_kind::BreakKind;
use crate::libs::breaks::Breaks;
use crate::libs::config::{
    self, break_key, monitor_millis, timer_key, ConfigProvider, ConfigValue, ListenerId, BREAKS_PREFIX, BREAK_ENABLED,
    BREAK_MAX_PRELUDES, MONITOR_ACTIVITY, MONITOR_BACKEND, MONITOR_IDLE, MONITOR_NOISE, MONITOR_PREFIX, MONITOR_SENSITIVITY,
    TIMERS_PREFIX, TIMER_AUTO_RESET, TIMER_LIMIT, TIMER_RESET_PRED, TIMER_SNOOZE, USE_MICROBREAK_ACTIVITY,
};
use crate::libs::daily::DailyPredicate;
use crate::libs::timer::ActivitySource;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// A single setting of a break, as addressed by its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakField {
    Limit,
    AutoReset,
    ResetPredicate,
    Snooze,
    Enabled,
    MaxPreludes,
    MicroBreakActivity,
}

impl BreakField {
    const ALL: [BreakField; 7] = [
        BreakField::Limit,
        BreakField::AutoReset,
        BreakField::ResetPredicate,
        BreakField::Snooze,
        BreakField::Enabled,
        BreakField::MaxPreludes,
        BreakField::MicroBreakActivity,
    ];

    fn key(self, kind: BreakKind) -> Option<String> {
        match self {
            BreakField::Limit => Some(timer_key(kind, TIMER_LIMIT)),
            BreakField::AutoReset => Some(timer_key(kind, TIMER_AUTO_RESET)),
            BreakField::ResetPredicate => Some(timer_key(kind, TIMER_RESET_PRED)),
            BreakField::Snooze => Some(timer_key(kind, TIMER_SNOOZE)),
            BreakField::Enabled => Some(break_key(kind, BREAK_ENABLED)),
            BreakField::MaxPreludes => Some(break_key(kind, BREAK_MAX_PRELUDES)),
            BreakField::MicroBreakActivity if kind == BreakKind::DailyLimit => Some(USE_MICROBREAK_ACTIVITY.to_string()),
            BreakField::MicroBreakActivity => None,
        }
    }

    /// Resolves a changed key to the break field it configures.
    fn from_key(key: &str) -> Option<(BreakKind, BreakField)> {
        BreakKind::ALL.into_iter().find_map(|kind| {
            BreakField::ALL
                .into_iter()
                .find(|field| field.key(kind).as_deref() == Some(key))
                .map(|field| (kind, field))
        })
    }
}

/// Value read for one field, ready to apply.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Seconds(u64),
    Predicate(Option<DailyPredicate>),
    /// Malformed predicate: keep the current one.
    KeepPredicate,
    Flag(bool),
    Count(i32),
}

fn read_int(config: &dyn ConfigProvider, key: &str) -> i64 {
    config
        .get_int(key)
        .or_else(|| match config::default_value(key) {
            Some(ConfigValue::Int(value)) => Some(value),
            _ => None,
        })
        .unwrap_or(0)
}

fn read_bool(config: &dyn ConfigProvider, key: &str) -> bool {
    config
        .get_bool(key)
        .or_else(|| match config::default_value(key) {
            Some(ConfigValue::Bool(value)) => Some(value),
            _ => None,
        })
        .unwrap_or(false)
}

fn read_string(config: &dyn ConfigProvider, key: &str) -> String {
    config
        .get_string(key)
        .or_else(|| match config::default_value(key) {
            Some(ConfigValue::String(value)) => Some(value),
            _ => None,
        })
        .unwrap_or_default()
}

fn read_field(config: &dyn ConfigProvider, kind: BreakKind, field: BreakField) -> Option<FieldValue> {
    let key = field.key(kind)?;
    let value = match field {
        BreakField::Limit | BreakField::AutoReset | BreakField::Snooze => {
            FieldValue::Seconds(read_int(config, &key).max(0) as u64)
        }
        BreakField::ResetPredicate => {
            let spec = read_string(config, &key);
            match DailyPredicate::parse_optional(&spec) {
                Ok(predicate) => FieldValue::Predicate(predicate),
                Err(e) => {
                    warn!("{}: {}", key, e);
                    FieldValue::KeepPredicate
                }
            }
        }
        BreakField::Enabled | BreakField::MicroBreakActivity => FieldValue::Flag(read_bool(config, &key)),
        BreakField::MaxPreludes => {
            let count = read_int(config, &key).clamp(i64::from(i32::MIN), i64::from(i32::MAX));
            FieldValue::Count(count as i32)
        }
    };
    Some(value)
}

fn apply_field(breaks: &mut Breaks, kind: BreakKind, field: BreakField, value: FieldValue) {
    if let (BreakField::MaxPreludes, FieldValue::Count(count)) = (field, &value) {
        breaks.set_max_preludes(kind, *count);
        return;
    }
    let timer = breaks.timer_mut(kind);
    match (field, value) {
        (BreakField::Limit, FieldValue::Seconds(limit)) => timer.set_limit(limit),
        (BreakField::AutoReset, FieldValue::Seconds(auto_reset)) => timer.set_auto_reset(auto_reset),
        (BreakField::Snooze, FieldValue::Seconds(snooze)) => timer.set_snooze(snooze),
        (BreakField::ResetPredicate, FieldValue::Predicate(predicate)) => timer.set_daily_reset(predicate),
        (BreakField::ResetPredicate, FieldValue::KeepPredicate) => {}
        // The daily limit keeps running; its switch only controls the limit.
        (BreakField::Enabled, FieldValue::Flag(enabled)) if kind == BreakKind::DailyLimit => timer.set_limit_enabled(enabled),
        (BreakField::Enabled, FieldValue::Flag(enabled)) => timer.set_enabled(enabled),
        (BreakField::MicroBreakActivity, FieldValue::Flag(use_micro)) => {
            let source = if use_micro {
                ActivitySource::Break(BreakKind::MicroBreak)
            } else {
                ActivitySource::Shared
            };
            timer.set_activity_source(source);
        }
        (field, value) => debug!("ignoring {:?} for {:?}", value, field),
    }
}

/// Reads the activity monitor settings.
pub fn load_monitor_settings(config: &dyn ConfigProvider) -> MonitorSettings {
    let millis = |key: &str| Duration::from_millis(monitor_millis(read_int(config, key)));
    let backend = read_string(config, MONITOR_BACKEND);
    let backend = backend.parse::<BackendChoice>().unwrap_or_else(|e| {
        warn!("{}: {}", MONITOR_BACKEND, e);
        BackendChoice::Auto
    });
    MonitorSettings {
        noise: millis(MONITOR_NOISE),
        activity: millis(MONITOR_ACTIVITY),
        idle: millis(MONITOR_IDLE),
        sensitivity: read_int(config, MONITOR_SENSITIVITY).clamp(0, i64::from(i32::MAX)) as i32,
        backend,
    }
}

/// Keeps the break timers and the activity monitor in sync with settings.
pub struct ConfigBinder {
    config: Arc<dyn ConfigProvider>,
    breaks: Arc<Mutex<Breaks>>,
    monitor: Option<Arc<ActivityMonitor>>,
    listeners: Mutex<Vec<ListenerId>>,
}

impl ConfigBinder {
    pub fn new(config: Arc<dyn ConfigProvider>, breaks: Arc<Mutex<Breaks>>, monitor: Option<Arc<ActivityMonitor>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            breaks,
            monitor,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Applies every setting of `kind` under a single lock.
    pub fn load(&self, kind: BreakKind) {
        let values: Vec<_> = BreakField::ALL
            .into_iter()
            .filter_map(|field| read_field(self.config.as_ref(), kind, field).map(|value| (field, value)))
            .collect();

        let mut breaks = self.breaks.lock();
        for (field, value) in values {
            apply_field(&mut breaks, kind, field, value);
        }
        debug!("loaded settings of {}", kind);
    }

    /// Applies every break and the monitor settings.
    pub fn load_all(&self) {
        for kind in BreakKind::ALL {
            self.load(kind);
        }
        if let Some(monitor) = &self.monitor {
            monitor.set_settings(load_monitor_settings(self.config.as_ref()));
        }
    }

    /// Re-applies the field configured by `key`. Returns `false` for keys
    /// that configure nothing.
    pub fn reload_key(&self, key: &str) -> bool {
        if key.starts_with(MONITOR_PREFIX) {
            if let Some(monitor) = &self.monitor {
                monitor.set_settings(load_monitor_settings(self.config.as_ref()));
            }
            return true;
        }
        let Some((kind, field)) = BreakField::from_key(key) else {
            return false;
        };
        if let Some(value) = read_field(self.config.as_ref(), kind, field) {
            apply_field(&mut self.breaks.lock(), kind, field, value);
            debug!("reloaded {}", key);
        }
        true
    }

    /// Subscribes to changes of every break's and the monitor's settings.
    pub fn bind(self: &Arc<Self>) {
        let mut prefixes: Vec<String> = Vec::new();
        for kind in BreakKind::ALL {
            prefixes.push(format!("{}{}/", TIMERS_PREFIX, kind.config_name()));
            prefixes.push(format!("{}{}/", BREAKS_PREFIX, kind.config_name()));
        }
        prefixes.push(MONITOR_PREFIX.to_string());

        let mut ids = self.listeners.lock();
        for prefix in prefixes {
            let binder: Weak<Self> = Arc::downgrade(self);
            let id = self.config.add_listener(
                &prefix,
                Arc::new(move |key: &str| {
                    if let Some(binder) = binder.upgrade() {
                        binder.reload_key(key);
                    }
                }),
            );
            ids.push(id);
        }
    }

    /// Stops following changes.
    pub fn unbind(&self) {
        for id in self.listeners.lock().drain(..) {
            self.config.remove_listener(id);
        }
    }
}

impl Drop for ConfigBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::config::MemoryConfig;

    #[test]
    fn test_key_resolution() {
        assert_eq!(
            BreakField::from_key("timers/rest_break/snooze"),
            Some((BreakKind::RestBreak, BreakField::Snooze))
        );
        assert_eq!(
            BreakField::from_key(USE_MICROBREAK_ACTIVITY),
            Some((BreakKind::DailyLimit, BreakField::MicroBreakActivity))
        );
        assert_eq!(BreakField::from_key("timers/micro_pause/use_microbreak_activity"), None);
        assert_eq!(BreakField::from_key("timers/lunch/limit"), None);
    }

    #[test]
    fn test_mistyped_value_uses_default() {
        let config: Arc<dyn ConfigProvider> = Arc::new(MemoryConfig::new());
        config.set("timers/micro_pause/limit", ConfigValue::from("soon"));
        let breaks = Arc::new(Mutex::new(Breaks::new(Duration::ZERO)));
        let binder = ConfigBinder::new(config, breaks.clone(), None);

        binder.load(BreakKind::MicroBreak);
        assert_eq!(breaks.lock().timer(BreakKind::MicroBreak).settings().limit, 180);
    }

    #[test]
    fn test_monitor_settings_from_legacy_seconds() {
        let config = MemoryConfig::new();
        config.set(MONITOR_IDLE, ConfigValue::Int(8));
        config.set(MONITOR_BACKEND, ConfigValue::from("compositor"));
        let settings = load_monitor_settings(&config);
        assert_eq!(settings.idle, Duration::from_secs(8));
        assert_eq!(settings.noise, Duration::from_millis(9000));
        assert_eq!(settings.backend, BackendChoice::Compositor);
    }
}
