//! Per-break timer state.
//!
//! A [`BreakTimer`] is ticked once per engine heartbeat with the activity
//! state that feeds it. It accumulates active, idle and overdue time and
//! reports at most one [`TimerEvent`] per tick:
//!
//! - `LimitReached` once when active time reaches the limit, and again after
//!   every further `snooze` seconds of active time until the timer resets.
//! - `AutoReset` when the user was idle for `auto_reset` seconds.
//! - `DailyReset` when the daily predicate's next time has passed.
//!
//! Configuration fields are only changed through the setters. The
//! accumulators are only changed by [`BreakTimer::tick`] and the explicit
//! reset/snooze operations used by break control.

use crate::libs::activity::ActivityState;
use crate::libs::break_kind::BreakKind;
use crate::libs::daily::DailyPredicate;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Which activity signal feeds a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    /// The aggregated activity state.
    #[default]
    Shared,
    /// Whether another break's timer is running.
    Break(BreakKind),
}

/// Configuration-derived fields of a timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSettings {
    /// Active seconds before the break is due. 0 disables the limit.
    pub limit: u64,
    /// Idle seconds that reset the timer. 0 disables auto-reset.
    pub auto_reset: u64,
    /// Active seconds between repeated limit notifications. 0 disables them.
    pub snooze: u64,
    pub daily_reset: Option<DailyPredicate>,
    /// Whether the timer runs at all.
    pub enabled: bool,
    /// Whether the limit applies.
    pub limit_enabled: bool,
    pub activity_source: ActivitySource,
}

impl TimerSettings {
    /// Built-in defaults per break kind.
    pub fn defaults(kind: BreakKind) -> Self {
        let (limit, auto_reset, snooze, daily_reset) = match kind {
            BreakKind::MicroBreak => (180, 30, 150, None),
            BreakKind::RestBreak => (2700, 600, 180, None),
            BreakKind::DailyLimit => (14400, 0, 1200, Some(DailyPredicate::new(4, 0))),
        };
        Self {
            limit,
            auto_reset,
            snooze,
            daily_reset,
            enabled: true,
            limit_enabled: true,
            activity_source: ActivitySource::Shared,
        }
    }
}

/// Outcome of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerEvent {
    None,
    LimitReached,
    /// Idle long enough. `natural` when the limit had not been exceeded.
    AutoReset { natural: bool },
    DailyReset,
}

/// Coarse state of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Disabled,
    Armed,
    Accumulating,
    LimitReached,
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimerState::Disabled => "disabled",
            TimerState::Armed => "armed",
            TimerState::Accumulating => "accumulating",
            TimerState::LimitReached => "limit reached",
        };
        write!(f, "{}", label)
    }
}

/// Read-only copy of a timer for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub kind: BreakKind,
    pub state: TimerState,
    pub elapsed_active: u64,
    pub elapsed_idle: u64,
    pub total_overdue: u64,
    pub limit: u64,
    pub auto_reset: u64,
    pub snooze: u64,
    pub daily_reset: Option<String>,
    pub next_daily_reset: Option<DateTime<Local>>,
    pub enabled: bool,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct BreakTimer {
    kind: BreakKind,
    settings: TimerSettings,
    elapsed_active: Duration,
    elapsed_idle: Duration,
    total_overdue: Duration,
    running: bool,
    /// Limit signalled since the last reset.
    notified: bool,
    /// Active time at the last limit notification.
    active_at_last_limit: Duration,
    snooze_inhibited: bool,
    next_daily_reset: Option<DateTime<Local>>,
    last_tick: Duration,
}

impl BreakTimer {
    /// Creates a timer whose first tick measures from `now`.
    pub fn new(kind: BreakKind, settings: TimerSettings, now: Duration) -> Self {
        Self {
            kind,
            settings,
            elapsed_active: Duration::ZERO,
            elapsed_idle: Duration::ZERO,
            total_overdue: Duration::ZERO,
            running: false,
            notified: false,
            active_at_last_limit: Duration::ZERO,
            snooze_inhibited: false,
            next_daily_reset: None,
            last_tick: now,
        }
    }

    pub fn kind(&self) -> BreakKind {
        self.kind
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    /// Advances the timer to `now` given the activity seen since last tick.
    pub fn tick(&mut self, activity: ActivityState, now: Duration, wall: DateTime<Local>) -> TimerEvent {
        let delta = now.saturating_sub(self.last_tick);
        self.last_tick = now;

        self.accumulate(activity, delta);

        if let Some(event) = self.check_daily_reset(wall) {
            return event;
        }
        if let Some(event) = self.check_limit(activity) {
            return event;
        }
        self.check_auto_reset(activity).unwrap_or(TimerEvent::None)
    }

    fn accumulate(&mut self, activity: ActivityState, delta: Duration) {
        if !self.settings.enabled {
            self.running = false;
            return;
        }
        match activity {
            ActivityState::Active => {
                self.running = true;
                self.elapsed_idle = Duration::ZERO;
                self.elapsed_active += delta;
                if let Some(limit) = self.active_limit() {
                    let past_limit = self.elapsed_active.saturating_sub(limit);
                    self.total_overdue += past_limit.min(delta);
                }
            }
            ActivityState::Idle => {
                self.running = false;
                self.elapsed_idle += delta;
            }
            // Frozen.
            ActivityState::Suspended => self.running = false,
        }
    }

    fn check_daily_reset(&mut self, wall: DateTime<Local>) -> Option<TimerEvent> {
        let predicate = self.settings.daily_reset?;
        match self.next_daily_reset {
            None => {
                self.next_daily_reset = Some(predicate.next_after(&wall));
                None
            }
            Some(next) if wall >= next => {
                debug!("{} daily reset", self.kind);
                self.reset_accumulators();
                self.total_overdue = Duration::ZERO;
                self.next_daily_reset = Some(predicate.next_after(&wall));
                Some(TimerEvent::DailyReset)
            }
            Some(_) => None,
        }
    }

    fn check_limit(&mut self, activity: ActivityState) -> Option<TimerEvent> {
        let limit = self.active_limit()?;
        if self.elapsed_active < limit {
            return None;
        }
        if !self.notified {
            self.notified = true;
            self.active_at_last_limit = self.elapsed_active;
            debug!("{} limit reached", self.kind);
            return Some(TimerEvent::LimitReached);
        }

        let snooze = Duration::from_secs(self.settings.snooze);
        if activity == ActivityState::Active
            && !self.snooze_inhibited
            && !snooze.is_zero()
            && self.elapsed_active >= self.active_at_last_limit + snooze
        {
            self.active_at_last_limit = self.elapsed_active;
            debug!("{} limit reached again after snooze", self.kind);
            return Some(TimerEvent::LimitReached);
        }
        None
    }

    fn check_auto_reset(&mut self, activity: ActivityState) -> Option<TimerEvent> {
        let auto_reset = Duration::from_secs(self.settings.auto_reset);
        if !self.settings.enabled
            || auto_reset.is_zero()
            || activity != ActivityState::Idle
            || self.elapsed_idle < auto_reset
            || (self.elapsed_active.is_zero() && !self.notified)
        {
            return None;
        }
        let natural = match self.active_limit() {
            Some(limit) => self.elapsed_active <= limit,
            None => true,
        };
        debug!("{} auto reset (natural: {})", self.kind, natural);
        self.reset_accumulators();
        Some(TimerEvent::AutoReset { natural })
    }

    /// The limit, when it applies.
    fn active_limit(&self) -> Option<Duration> {
        let applies = self.settings.enabled && self.settings.limit_enabled && self.settings.limit > 0;
        applies.then(|| Duration::from_secs(self.settings.limit))
    }

    fn reset_accumulators(&mut self) {
        self.elapsed_active = Duration::ZERO;
        self.elapsed_idle = Duration::ZERO;
        self.notified = false;
        self.active_at_last_limit = Duration::ZERO;
        self.snooze_inhibited = false;
    }

    /// Full reset after a completed or skipped break. Overdue time is kept.
    pub fn reset(&mut self) {
        self.reset_accumulators();
    }

    /// Restarts the snooze window from the current active time.
    pub fn snooze(&mut self) {
        if self.notified {
            self.active_at_last_limit = self.elapsed_active;
        }
    }

    /// Suppresses repeated limit notifications until the next reset.
    pub fn inhibit_snooze(&mut self) {
        self.snooze_inhibited = true;
    }

    /// Counts `gap` as idle time without a tick, e.g. time the system
    /// spent asleep. The next idle tick applies the auto-reset.
    pub fn credit_idle(&mut self, gap: Duration) {
        if self.settings.enabled {
            self.running = false;
            self.elapsed_idle += gap;
        }
    }

    /// Clears the overdue total.
    pub fn clear_overdue(&mut self) {
        self.total_overdue = Duration::ZERO;
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.settings.limit = limit;
        if self.elapsed_active < Duration::from_secs(limit) {
            self.notified = false;
            self.active_at_last_limit = Duration::ZERO;
        }
    }

    pub fn set_auto_reset(&mut self, auto_reset: u64) {
        if auto_reset > self.settings.auto_reset {
            self.snooze_inhibited = false;
        }
        self.settings.auto_reset = auto_reset;
    }

    pub fn set_snooze(&mut self, snooze: u64) {
        self.settings.snooze = snooze;
    }

    pub fn set_daily_reset(&mut self, predicate: Option<DailyPredicate>) {
        if self.settings.daily_reset != predicate {
            self.settings.daily_reset = predicate;
            self.next_daily_reset = None;
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
        if !enabled {
            self.running = false;
        }
    }

    pub fn set_limit_enabled(&mut self, enabled: bool) {
        self.settings.limit_enabled = enabled;
    }

    pub fn set_activity_source(&mut self, source: ActivitySource) {
        self.settings.activity_source = source;
    }

    pub fn elapsed_active(&self) -> Duration {
        self.elapsed_active
    }

    pub fn elapsed_idle(&self) -> Duration {
        self.elapsed_idle
    }

    pub fn total_overdue(&self) -> Duration {
        self.total_overdue
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Whether the limit has been signalled since the last reset.
    pub fn is_limit_reached(&self) -> bool {
        self.notified
    }

    pub fn next_daily_reset(&self) -> Option<DateTime<Local>> {
        self.next_daily_reset
    }

    pub fn state(&self) -> TimerState {
        if !self.settings.enabled {
            return TimerState::Disabled;
        }
        match self.active_limit() {
            Some(limit) if self.elapsed_active >= limit => TimerState::LimitReached,
            _ if self.running || !self.elapsed_active.is_zero() => TimerState::Accumulating,
            _ => TimerState::Armed,
        }
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            kind: self.kind,
            state: self.state(),
            elapsed_active: self.elapsed_active.as_secs(),
            elapsed_idle: self.elapsed_idle.as_secs(),
            total_overdue: self.total_overdue.as_secs(),
            limit: self.settings.limit,
            auto_reset: self.settings.auto_reset,
            snooze: self.settings.snooze,
            daily_reset: self.settings.daily_reset.map(|p| p.to_string()),
            next_daily_reset: self.next_daily_reset,
            enabled: self.settings.enabled,
            running: self.running,
        }
    }
}
