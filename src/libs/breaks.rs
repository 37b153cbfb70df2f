//! Break control.
//!
//! [`Breaks`] owns one [`BreakTimer`] and one break stage machine per
//! [`BreakKind`]. On every heartbeat it ticks the timers in ordinal order,
//! reacts to their events and advances the stages:
//!
//! ```text
//! None --limit--> Prelude --idle 10s--> Taking --reset--> None
//!                    |                    |
//!                    +--active 30s--> Snoozed --limit again--> Prelude
//! ```
//!
//! After `max_preludes` ignored preludes the break starts without one.
//! Events are returned to the caller, which forwards them to observers.

use crate::libs::activity::ActivityState;
use crate::libs::break_kind::BreakKind;
use crate::libs::timer::{ActivitySource, BreakTimer, TimerEvent, TimerSettings, TimerSnapshot};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Idle seconds during a prelude after which the break starts.
const PRELUDE_IDLE_TO_BREAK: u32 = 10;
/// Active seconds during a prelude after which it counts as ignored.
const PRELUDE_IGNORED_AFTER: u32 = 30;
/// Wall-clock time passing this much faster than monotonic time between two
/// heartbeats means the system was asleep.
const TIME_WARP_THRESHOLD: Duration = Duration::from_secs(10);

/// Lifecycle events of a break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakEvent {
    PreludeStarted,
    BreakStarted,
    BreakStartedForced,
    BreakEnded,
    BreakIgnored,
    BreakIdle,
    BreakTaken,
    BreakPostponed,
    BreakSkipped,
}

impl fmt::Display for BreakEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BreakEvent::PreludeStarted => "prelude started",
            BreakEvent::BreakStarted => "break started",
            BreakEvent::BreakStartedForced => "break started (forced)",
            BreakEvent::BreakEnded => "break ended",
            BreakEvent::BreakIgnored => "break ignored",
            BreakEvent::BreakIdle => "break idle",
            BreakEvent::BreakTaken => "break taken",
            BreakEvent::BreakPostponed => "break postponed",
            BreakEvent::BreakSkipped => "break skipped",
        };
        write!(f, "{}", label)
    }
}

/// Receives break events. Called outside every engine lock.
pub trait BreakObserver: Send + Sync {
    fn on_break_event(&self, kind: BreakKind, event: BreakEvent);
}

impl<F> BreakObserver for F
where
    F: Fn(BreakKind, BreakEvent) + Send + Sync,
{
    fn on_break_event(&self, kind: BreakKind, event: BreakEvent) {
        self(kind, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakStage {
    None,
    Prelude,
    Taking,
    Snoozed,
}

impl fmt::Display for BreakStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BreakStage::None => "none",
            BreakStage::Prelude => "prelude",
            BreakStage::Taking => "taking",
            BreakStage::Snoozed => "snoozed",
        };
        write!(f, "{}", label)
    }
}

pub type Notification = (BreakKind, BreakEvent);

#[derive(Debug, Clone)]
struct BreakControl {
    kind: BreakKind,
    stage: BreakStage,
    stage_time: u32,
    prelude_count: i32,
    max_preludes: i32,
    forced: bool,
    user_abort: bool,
}

impl BreakControl {
    fn new(kind: BreakKind) -> Self {
        Self {
            kind,
            stage: BreakStage::None,
            stage_time: 0,
            prelude_count: 0,
            max_preludes: 3,
            forced: false,
            user_abort: false,
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.stage, BreakStage::Prelude | BreakStage::Taking)
    }

    fn reached_max_preludes(&self) -> bool {
        self.max_preludes >= 0 && self.prelude_count >= self.max_preludes
    }

    fn start(&mut self, out: &mut Vec<Notification>) {
        self.forced = false;
        self.user_abort = false;
        if self.reached_max_preludes() {
            self.goto_taking(out);
        } else {
            self.prelude_count += 1;
            self.stage = BreakStage::Prelude;
            self.stage_time = 0;
            out.push((self.kind, BreakEvent::PreludeStarted));
        }
    }

    fn force_start(&mut self, out: &mut Vec<Notification>) {
        self.forced = true;
        self.user_abort = false;
        self.goto_taking(out);
    }

    fn goto_taking(&mut self, out: &mut Vec<Notification>) {
        self.stage = BreakStage::Taking;
        self.stage_time = 0;
        let event = if self.forced {
            BreakEvent::BreakStartedForced
        } else {
            BreakEvent::BreakStarted
        };
        out.push((self.kind, event));
    }

    fn process(&mut self, user_active: bool, out: &mut Vec<Notification>) {
        self.stage_time = self.stage_time.saturating_add(1);
        if self.stage != BreakStage::Prelude {
            return;
        }
        if !user_active {
            if self.stage_time >= PRELUDE_IDLE_TO_BREAK {
                self.goto_taking(out);
            }
        } else if self.stage_time >= PRELUDE_IGNORED_AFTER {
            if self.reached_max_preludes() {
                self.goto_taking(out);
            } else {
                self.stage = BreakStage::Snoozed;
                out.push((self.kind, BreakEvent::BreakIgnored));
                out.push((self.kind, BreakEvent::BreakIdle));
            }
        }
    }

    /// Ends the break. `taken` when it ended by the user resting.
    fn stop(&mut self, taken: bool, out: &mut Vec<Notification>) {
        match self.stage {
            BreakStage::Prelude => {
                if !self.forced {
                    out.push((self.kind, BreakEvent::BreakIgnored));
                }
                out.push((self.kind, BreakEvent::BreakIdle));
            }
            BreakStage::Taking => {
                if taken && !self.user_abort {
                    out.push((self.kind, BreakEvent::BreakTaken));
                }
                out.push((self.kind, BreakEvent::BreakIdle));
            }
            BreakStage::None | BreakStage::Snoozed => {}
        }
        self.stage = BreakStage::None;
        self.prelude_count = 0;
        self.forced = false;
        out.push((self.kind, BreakEvent::BreakEnded));
    }
}

/// Per-break state exposed for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakSnapshot {
    pub stage: BreakStage,
    pub prelude_count: i32,
    #[serde(flatten)]
    pub timer: TimerSnapshot,
}

/// Timers and break stages of all break kinds.
#[derive(Debug, Clone)]
pub struct Breaks {
    timers: Vec<BreakTimer>,
    controls: Vec<BreakControl>,
    /// Timers keep running but no break starts.
    quiet: bool,
    last_beat: Option<(Duration, DateTime<Local>)>,
}

impl Breaks {
    /// Creates every break with its built-in defaults, measuring from `now`.
    pub fn new(now: Duration) -> Self {
        Self {
            timers: BreakKind::ALL
                .iter()
                .map(|&kind| BreakTimer::new(kind, TimerSettings::defaults(kind), now))
                .collect(),
            controls: BreakKind::ALL.iter().map(|&kind| BreakControl::new(kind)).collect(),
            quiet: false,
            last_beat: None,
        }
    }

    /// In quiet mode a reached limit is recorded but starts no break.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Wall-clock time that passed beyond the monotonic time since the last
    /// heartbeat, when it is large enough to be a system sleep.
    pub fn time_warp(&self, now: Duration, wall: DateTime<Local>) -> Option<Duration> {
        let (last_now, last_wall) = self.last_beat?;
        let wall_delta = (wall - last_wall).to_std().ok()?;
        let gap = wall_delta.saturating_sub(now.saturating_sub(last_now));
        (gap >= TIME_WARP_THRESHOLD).then_some(gap)
    }

    pub fn timer(&self, kind: BreakKind) -> &BreakTimer {
        &self.timers[kind.index()]
    }

    /// Mutable access for the configuration binder.
    pub fn timer_mut(&mut self, kind: BreakKind) -> &mut BreakTimer {
        &mut self.timers[kind.index()]
    }

    pub fn stage(&self, kind: BreakKind) -> BreakStage {
        self.controls[kind.index()].stage
    }

    pub fn is_active(&self, kind: BreakKind) -> bool {
        self.controls[kind.index()].is_active()
    }

    pub fn set_max_preludes(&mut self, kind: BreakKind, max_preludes: i32) {
        self.controls[kind.index()].max_preludes = max_preludes;
    }

    pub fn max_preludes(&self, kind: BreakKind) -> i32 {
        self.controls[kind.index()].max_preludes
    }

    /// Activity seen by one timer during this heartbeat.
    fn activity_for(&self, kind: BreakKind, shared: ActivityState) -> ActivityState {
        match self.timers[kind.index()].settings().activity_source {
            ActivitySource::Shared => shared,
            ActivitySource::Break(_) if shared == ActivityState::Suspended => ActivityState::Suspended,
            ActivitySource::Break(source) if self.timers[source.index()].is_running() => ActivityState::Active,
            ActivitySource::Break(_) => ActivityState::Idle,
        }
    }

    /// One heartbeat against a single activity snapshot.
    ///
    /// A time warp (see [`Breaks::time_warp`]) is counted as idle time
    /// for every timer unless activity is suspended.
    pub fn heartbeat(&mut self, activity: ActivityState, now: Duration, wall: DateTime<Local>) -> Vec<Notification> {
        let mut out = Vec::new();

        let mut activity = activity;
        if let Some(gap) = self.time_warp(now, wall) {
            info!("time warp of {}s, counted as idle", gap.as_secs());
            if activity != ActivityState::Suspended {
                activity = ActivityState::Idle;
                self.timers.iter_mut().for_each(|timer| timer.credit_idle(gap));
            }
        }
        self.last_beat = Some((now, wall));

        for kind in BreakKind::ALL {
            let input = self.activity_for(kind, activity);
            let event = self.timers[kind.index()].tick(input, now, wall);
            match event {
                TimerEvent::None => {}
                TimerEvent::LimitReached if self.quiet => debug!("{} due, quiet", kind),
                TimerEvent::LimitReached => {
                    info!("{} due", kind);
                    self.start_break(kind, &mut out);
                }
                TimerEvent::AutoReset { .. } => {
                    if self.controls[kind.index()].is_active() {
                        self.controls[kind.index()].stop(true, &mut out);
                    }
                }
                TimerEvent::DailyReset => {
                    if self.controls[kind.index()].is_active() {
                        self.controls[kind.index()].stop(false, &mut out);
                    }
                    if kind == BreakKind::DailyLimit {
                        debug!("daily limit reset, clearing overdue time of every break");
                        self.timers.iter_mut().for_each(BreakTimer::clear_overdue);
                    }
                }
            }
        }

        let user_active = activity == ActivityState::Active;
        for control in &mut self.controls {
            control.process(user_active, &mut out);
        }
        self.end_forced_breaks(&mut out);
        out
    }

    /// A forced break on a timer without active time never sees an
    /// auto-reset; end it once the user rested for the reset period.
    fn end_forced_breaks(&mut self, out: &mut Vec<Notification>) {
        for kind in BreakKind::ALL {
            let timer = &self.timers[kind.index()];
            let control = &self.controls[kind.index()];
            let rested = timer.settings().auto_reset > 0
                && timer.elapsed_idle() >= Duration::from_secs(timer.settings().auto_reset);
            if control.forced && control.stage == BreakStage::Taking && rested {
                self.controls[kind.index()].stop(true, out);
            }
        }
    }

    fn start_break(&mut self, kind: BreakKind, out: &mut Vec<Notification>) {
        // Never start while this or a bigger break is active.
        if BreakKind::ALL[kind.index()..].iter().any(|k| self.controls[k.index()].is_active()) {
            return;
        }
        for smaller in &BreakKind::ALL[..kind.index()] {
            if self.controls[smaller.index()].is_active() {
                self.controls[smaller.index()].stop(false, out);
            }
        }
        self.controls[kind.index()].start(out);
    }

    /// Starts a break immediately, without prelude.
    pub fn force_break(&mut self, kind: BreakKind) -> Vec<Notification> {
        let mut out = Vec::new();
        for smaller in &BreakKind::ALL[..kind.index()] {
            if self.controls[smaller.index()].is_active() {
                self.controls[smaller.index()].stop(false, &mut out);
            }
        }
        self.controls[kind.index()].force_start(&mut out);
        out
    }

    /// Postpones a break being taken: the timer is snoozed.
    pub fn postpone_break(&mut self, kind: BreakKind) -> Vec<Notification> {
        let mut out = Vec::new();
        let control = &mut self.controls[kind.index()];
        if control.stage != BreakStage::Taking {
            return out;
        }
        control.user_abort = true;
        if !control.forced {
            self.timers[kind.index()].snooze();
            out.push((kind, BreakEvent::BreakPostponed));
        }
        control.stop(false, &mut out);
        out
    }

    /// Skips a break being taken: the timer is reset, except for the daily
    /// limit, which only stops repeating its notification.
    pub fn skip_break(&mut self, kind: BreakKind) -> Vec<Notification> {
        let mut out = Vec::new();
        let control = &mut self.controls[kind.index()];
        if control.stage != BreakStage::Taking {
            return out;
        }
        control.user_abort = true;
        let timer = &mut self.timers[kind.index()];
        if kind == BreakKind::DailyLimit {
            timer.inhibit_snooze();
        } else {
            timer.reset();
        }
        out.push((kind, BreakEvent::BreakSkipped));
        control.stop(false, &mut out);
        out
    }

    /// Ends every active break.
    pub fn stop_all(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        for control in &mut self.controls {
            if control.is_active() {
                control.stop(false, &mut out);
            }
        }
        out
    }

    pub fn snapshot(&self, kind: BreakKind) -> BreakSnapshot {
        let control = &self.controls[kind.index()];
        BreakSnapshot {
            stage: control.stage,
            prelude_count: control.prelude_count,
            timer: self.timers[kind.index()].snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Run {
        breaks: Breaks,
        now: Duration,
        wall: DateTime<Local>,
    }

    impl Run {
        fn new() -> Self {
            let mut breaks = Breaks::new(Duration::ZERO);
            breaks.timer_mut(BreakKind::DailyLimit).set_daily_reset(None);
            Self {
                breaks,
                now: Duration::ZERO,
                wall: Local.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            }
        }

        fn run(&mut self, activity: ActivityState, seconds: u64) -> Vec<Notification> {
            let mut all = Vec::new();
            for _ in 0..seconds {
                self.now += Duration::from_secs(1);
                self.wall = self.wall + chrono::Duration::seconds(1);
                all.extend(self.breaks.heartbeat(activity, self.now, self.wall));
            }
            all
        }
    }

    const MICRO: BreakKind = BreakKind::MicroBreak;

    #[test]
    fn test_prelude_turns_into_break_when_idle() {
        let mut run = Run::new();
        assert_eq!(run.run(ActivityState::Active, 180), vec![(MICRO, BreakEvent::PreludeStarted)]);
        assert_eq!(run.breaks.stage(MICRO), BreakStage::Prelude);

        assert_eq!(run.run(ActivityState::Idle, 10), vec![(MICRO, BreakEvent::BreakStarted)]);
        assert_eq!(run.breaks.stage(MICRO), BreakStage::Taking);

        let events = run.run(ActivityState::Idle, 20);
        assert_eq!(
            events,
            vec![
                (MICRO, BreakEvent::BreakTaken),
                (MICRO, BreakEvent::BreakIdle),
                (MICRO, BreakEvent::BreakEnded)
            ]
        );
        assert_eq!(run.breaks.stage(MICRO), BreakStage::None);
    }

    #[test]
    fn test_ignored_preludes_end_in_a_break() {
        let mut run = Run::new();
        run.run(ActivityState::Active, 180);
        let events = run.run(ActivityState::Active, 30);
        assert_eq!(events, vec![(MICRO, BreakEvent::BreakIgnored), (MICRO, BreakEvent::BreakIdle)]);
        assert_eq!(run.breaks.stage(MICRO), BreakStage::Snoozed);

        // Snooze re-notification brings the second and third preludes.
        assert!(run.run(ActivityState::Active, 120).contains(&(MICRO, BreakEvent::PreludeStarted)));
        run.run(ActivityState::Active, 30);
        assert!(run.run(ActivityState::Active, 120).contains(&(MICRO, BreakEvent::PreludeStarted)));

        let events = run.run(ActivityState::Active, 30);
        assert_eq!(events, vec![(MICRO, BreakEvent::BreakStarted)]);
    }

    #[test]
    fn test_postpone_snoozes_timer() {
        let mut run = Run::new();
        run.run(ActivityState::Active, 180);
        run.run(ActivityState::Idle, 10);
        assert_eq!(run.breaks.stage(MICRO), BreakStage::Taking);

        let events = run.breaks.postpone_break(MICRO);
        assert_eq!(
            events,
            vec![
                (MICRO, BreakEvent::BreakPostponed),
                (MICRO, BreakEvent::BreakIdle),
                (MICRO, BreakEvent::BreakEnded)
            ]
        );
        assert_eq!(run.breaks.timer(MICRO).elapsed_active(), Duration::from_secs(180));
        assert!(run.breaks.postpone_break(MICRO).is_empty());
    }

    #[test]
    fn test_skip_resets_timer_but_daily_limit_only_goes_quiet() {
        let mut run = Run::new();
        run.run(ActivityState::Active, 180);
        run.run(ActivityState::Idle, 10);
        let events = run.breaks.skip_break(MICRO);
        assert_eq!(events[0], (MICRO, BreakEvent::BreakSkipped));
        assert_eq!(run.breaks.timer(MICRO).elapsed_active(), Duration::ZERO);

        let daily = BreakKind::DailyLimit;
        run.breaks.force_break(daily);
        run.breaks.timer_mut(daily).set_limit(1);
        run.run(ActivityState::Active, 1);
        run.breaks.skip_break(daily);
        assert_eq!(run.breaks.stage(daily), BreakStage::None);
        assert!(run.breaks.timer(daily).elapsed_active() > Duration::ZERO);
    }

    #[test]
    fn test_sleep_gap_counts_as_idle() {
        let mut run = Run::new();
        run.run(ActivityState::Active, 100);
        assert_eq!(run.breaks.timer(MICRO).elapsed_active(), Duration::from_secs(100));

        // One hour asleep: monotonic time stood still, the wall clock did not.
        run.now += Duration::from_secs(1);
        run.wall = run.wall + chrono::Duration::seconds(3601);
        assert_eq!(run.breaks.time_warp(run.now, run.wall), Some(Duration::from_secs(3600)));
        let events = run.breaks.heartbeat(ActivityState::Active, run.now, run.wall);

        assert!(events.is_empty());
        assert_eq!(run.breaks.timer(MICRO).elapsed_active(), Duration::ZERO);
        assert_eq!(run.breaks.timer(BreakKind::RestBreak).elapsed_active(), Duration::ZERO);
        assert_eq!(run.breaks.time_warp(run.now, run.wall), None);
    }

    #[test]
    fn test_short_wall_jump_is_not_a_sleep() {
        let mut run = Run::new();
        run.run(ActivityState::Active, 100);
        run.now += Duration::from_secs(1);
        run.wall = run.wall + chrono::Duration::seconds(10);
        assert_eq!(run.breaks.time_warp(run.now, run.wall), None);
        run.breaks.heartbeat(ActivityState::Active, run.now, run.wall);
        assert_eq!(run.breaks.timer(MICRO).elapsed_active(), Duration::from_secs(101));
    }

    #[test]
    fn test_suspended_sleep_leaves_timers_frozen() {
        let mut run = Run::new();
        run.run(ActivityState::Active, 100);
        run.now += Duration::from_secs(1);
        run.wall = run.wall + chrono::Duration::seconds(3601);
        run.breaks.heartbeat(ActivityState::Suspended, run.now, run.wall);
        assert_eq!(run.breaks.timer(MICRO).elapsed_active(), Duration::from_secs(100));
        assert_eq!(run.breaks.timer(MICRO).elapsed_idle(), Duration::ZERO);
    }

    #[test]
    fn test_quiet_mode_starts_no_break() {
        let mut run = Run::new();
        run.breaks.set_quiet(true);
        assert!(run.run(ActivityState::Active, 200).is_empty());
        assert_eq!(run.breaks.stage(MICRO), BreakStage::None);
        assert!(run.breaks.timer(MICRO).is_limit_reached());
        assert_eq!(run.breaks.timer(MICRO).total_overdue(), Duration::from_secs(20));
    }

    #[test]
    fn test_smaller_break_waits_for_bigger_one() {
        let mut run = Run::new();
        run.breaks.force_break(BreakKind::RestBreak);
        let events = run.run(ActivityState::Active, 180);
        assert!(!events.contains(&(MICRO, BreakEvent::PreludeStarted)));
        assert_eq!(run.breaks.stage(MICRO), BreakStage::None);
    }

    #[test]
    fn test_microbreak_activity_feeds_daily_limit() {
        let mut run = Run::new();
        run.breaks
            .timer_mut(BreakKind::DailyLimit)
            .set_activity_source(ActivitySource::Break(MICRO));
        run.breaks.timer_mut(MICRO).set_enabled(false);
        run.run(ActivityState::Active, 60);
        assert_eq!(run.breaks.timer(BreakKind::DailyLimit).elapsed_active(), Duration::ZERO);

        run.breaks.timer_mut(MICRO).set_enabled(true);
        run.run(ActivityState::Active, 60);
        assert_eq!(run.breaks.timer(BreakKind::DailyLimit).elapsed_active(), Duration::from_secs(60));
    }
}
