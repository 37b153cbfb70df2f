//! Break engine.
//!
//! [`Engine`] wires the pieces together: a [`Scheduler`] drives a one second
//! heartbeat which takes a single [`ActivityState`] snapshot from the
//! [`ActivityMonitor`] and feeds it to every break timer. Settings come from a
//! [`ConfigProvider`] through the [`ConfigBinder`], and break events are
//! delivered to the registered [`BreakObserver`]s outside of every lock.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use respite::libs::breaks::BreakEvent;
//! use respite::libs::break_kind::BreakKind;
//! use respite::libs::config::JsonConfig;
//! use respite::libs::engine::Engine;
//! use std::sync::Arc;
//!
//! let config = Arc::new(JsonConfig::open_default()?);
//! let engine = Engine::realtime(config);
//! engine.add_observer(|kind: BreakKind, event: BreakEvent| println!("{}: {}", kind, event));
//! engine.start_default()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::libs::activity::{self, ActivityMonitor, ActivityState, InputListener, SessionEnvironment};
use crate::libs::binder::{load_monitor_settings, ConfigBinder};
use crate::libs::break_kind::BreakKind;
use crate::libs::breaks::{BreakEvent, BreakObserver, BreakSnapshot, Breaks, Notification};
use crate::libs::clock::{Clock, SharedClock, SimulatedClock};
use crate::libs::config::{init_defaults, ConfigProvider};
use crate::libs::scheduler::Scheduler;
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Name of the scheduler task driving the timers.
pub const HEARTBEAT_TASK: &str = "heartbeat";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

type Observers = Arc<RwLock<Vec<Arc<dyn BreakObserver>>>>;

/// How the engine reacts to break limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Limits start preludes and breaks.
    #[default]
    Normal,
    /// Timers keep running but no break starts.
    Quiet,
    /// Activity is ignored and every timer is frozen.
    Suspended,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationMode::Normal => "normal",
            OperationMode::Quiet => "quiet",
            OperationMode::Suspended => "suspended",
        };
        write!(f, "{}", label)
    }
}

pub struct Engine {
    scheduler: Arc<Scheduler>,
    clock: SharedClock,
    monitor: Arc<ActivityMonitor>,
    breaks: Arc<Mutex<Breaks>>,
    binder: Arc<ConfigBinder>,
    config: Arc<dyn ConfigProvider>,
    observers: Observers,
    mode: Mutex<OperationMode>,
}

impl Engine {
    /// Builds an engine on `scheduler`, loading every setting from `config`.
    ///
    /// Missing settings are written with their defaults first. The heartbeat
    /// is registered right away; nothing runs in real time until
    /// [`Engine::start`].
    pub fn new(scheduler: Scheduler, config: Arc<dyn ConfigProvider>) -> Self {
        if !init_defaults(config.as_ref()) {
            warn!("could not store default settings");
        }

        let scheduler = Arc::new(scheduler);
        let clock = scheduler.clock();
        let monitor = Arc::new(ActivityMonitor::new(clock.clone(), load_monitor_settings(config.as_ref())));
        let breaks = Arc::new(Mutex::new(Breaks::new(clock.monotonic())));
        let binder = ConfigBinder::new(config.clone(), breaks.clone(), Some(monitor.clone()));
        binder.load_all();
        binder.bind();

        let engine = Self {
            scheduler,
            clock,
            monitor,
            breaks,
            binder,
            config,
            observers: Arc::new(RwLock::new(Vec::new())),
            mode: Mutex::new(OperationMode::Normal),
        };
        engine.register_heartbeat();
        engine
    }

    /// Engine on the real clock.
    pub fn realtime(config: Arc<dyn ConfigProvider>) -> Self {
        Self::new(Scheduler::realtime(), config)
    }

    /// Engine on a simulated clock advanced with [`Engine::simulate`].
    pub fn with_simulated_clock(config: Arc<dyn ConfigProvider>, clock: Arc<SimulatedClock>) -> Self {
        Self::new(Scheduler::with_simulated_clock(clock), config)
    }

    fn register_heartbeat(&self) {
        let monitor = self.monitor.clone();
        let breaks = self.breaks.clone();
        let clock = self.clock.clone();
        let observers = self.observers.clone();

        self.scheduler.create(HEARTBEAT_TASK, HEARTBEAT_INTERVAL, move || {
            let (now, wall) = (clock.monotonic(), clock.wall());
            // Input seen before a system sleep must not carry over.
            if breaks.lock().time_warp(now, wall).is_some() {
                monitor.force_idle();
            }
            let activity = monitor.heartbeat();
            let notifications = breaks.lock().heartbeat(activity, now, wall);
            deliver(&monitor, &observers, notifications);
        });
    }

    /// Starts the first listener of `candidates` that initializes and the
    /// real-time driver. Returns the backend in use, `None` when degraded.
    pub fn start(&self, candidates: Vec<Box<dyn InputListener>>) -> Result<Option<&'static str>> {
        let backend = self.monitor.start(candidates);
        self.scheduler.start()?;
        info!(backend = backend.unwrap_or("none"), "engine started");
        Ok(backend)
    }

    /// Starts with the listeners chosen by `monitor/backend` and the session.
    pub fn start_default(&self) -> Result<Option<&'static str>> {
        let choice = self.monitor.settings().backend;
        self.start(activity::candidates(choice, &SessionEnvironment::detect()))
    }

    /// Stops the driver, the listeners and the settings subscription.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.monitor.terminate();
        self.binder.unbind();
        info!("engine stopped");
    }

    pub fn add_observer<O>(&self, observer: O)
    where
        O: BreakObserver + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    pub fn postpone_break(&self, kind: BreakKind) {
        let notifications = self.breaks.lock().postpone_break(kind);
        deliver(&self.monitor, &self.observers, notifications);
    }

    pub fn skip_break(&self, kind: BreakKind) {
        let notifications = self.breaks.lock().skip_break(kind);
        deliver(&self.monitor, &self.observers, notifications);
    }

    pub fn force_break(&self, kind: BreakKind) {
        let notifications = self.breaks.lock().force_break(kind);
        deliver(&self.monitor, &self.observers, notifications);
    }

    /// Ends every break in progress.
    pub fn stop_breaks(&self) {
        let notifications = self.breaks.lock().stop_all();
        deliver(&self.monitor, &self.observers, notifications);
    }

    pub fn operation_mode(&self) -> OperationMode {
        *self.mode.lock()
    }

    /// Switches the operation mode.
    ///
    /// Leaving normal mode ends every break in progress. Suspension makes
    /// the user idle and freezes the timers until another mode is chosen.
    pub fn set_operation_mode(&self, mode: OperationMode) {
        let previous = {
            let mut current = self.mode.lock();
            std::mem::replace(&mut *current, mode)
        };
        if previous == mode {
            return;
        }
        info!(%previous, %mode, "operation mode changed");

        let notifications = {
            let mut breaks = self.breaks.lock();
            breaks.set_quiet(mode == OperationMode::Quiet);
            if mode != OperationMode::Normal || previous == OperationMode::Suspended {
                breaks.stop_all()
            } else {
                Vec::new()
            }
        };
        match mode {
            OperationMode::Suspended => {
                self.monitor.force_idle();
                self.monitor.suspend();
            }
            _ if previous == OperationMode::Suspended => self.monitor.resume(),
            _ => {}
        }
        deliver(&self.monitor, &self.observers, notifications);
    }

    pub fn suspend(&self) {
        self.set_operation_mode(OperationMode::Suspended);
    }

    /// Leaves suspension for normal mode. No-op in any other mode.
    pub fn resume(&self) {
        if self.operation_mode() == OperationMode::Suspended {
            self.set_operation_mode(OperationMode::Normal);
        }
    }

    pub fn force_idle(&self) {
        self.monitor.force_idle();
    }

    pub fn activity(&self) -> ActivityState {
        self.monitor.state()
    }

    pub fn snapshot(&self, kind: BreakKind) -> BreakSnapshot {
        self.breaks.lock().snapshot(kind)
    }

    /// Snapshots of every break, in ordinal order, taken under one lock.
    pub fn snapshots(&self) -> Vec<BreakSnapshot> {
        let breaks = self.breaks.lock();
        BreakKind::ALL.iter().map(|&kind| breaks.snapshot(kind)).collect()
    }

    pub fn monitor(&self) -> &Arc<ActivityMonitor> {
        &self.monitor
    }

    pub fn config(&self) -> &Arc<dyn ConfigProvider> {
        &self.config
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn set_simulated(&self, on: bool) {
        self.scheduler.set_simulated(on);
    }

    /// Advances simulated time. Returns `false` on the real clock.
    pub fn simulate(&self, duration: Duration, step_delay: Duration) -> bool {
        self.scheduler.simulate(duration, step_delay)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.scheduler.destroy(HEARTBEAT_TASK);
        self.shutdown();
    }
}

/// Forwards `notifications` to the observers. A prelude or break that just
/// started makes the user idle so that only fresh input counts.
fn deliver(monitor: &ActivityMonitor, observers: &Observers, notifications: Vec<Notification>) {
    if notifications.is_empty() {
        return;
    }
    let starts_break = notifications.iter().any(|(_, event)| {
        matches!(
            event,
            BreakEvent::PreludeStarted | BreakEvent::BreakStarted | BreakEvent::BreakStartedForced
        )
    });
    if starts_break {
        monitor.force_idle();
    }

    let observers: Vec<_> = observers.read().clone();
    for (kind, event) in notifications {
        info!("{}: {}", kind, event);
        for observer in &observers {
            observer.on_break_event(kind, event);
        }
    }
}
