//! User activity monitoring.
//!
//! The [`ActivityMonitor`] aggregates input from exactly one platform
//! listener into a single [`ActivityState`] that the break timers sample on
//! every heartbeat.
//!
//! ## Features
//!
//! - **Noise filter**: in raw-input mode a burst of input must last
//!   `activity` long before the user counts as active; gaps longer than
//!   `noise` restart the burst.
//! - **Pointer sensitivity**: pointer moves smaller than `sensitivity`
//!   pixels on both axes are ignored unless a button is held.
//! - **Idle debounce**: the user goes idle after `idle` without input. In
//!   watch mode the platform does this and the debounce is skipped.
//! - **Suspend / force idle**: suspension freezes the reported state while
//!   input is still recorded.
//! - **Backend fallback**: listeners are tried in order; a listener that
//!   dies is replaced by the next candidate, and without any listener the
//!   user is assumed to be always active.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use respite::libs::activity::{ActivityMonitor, MonitorSettings, ManualListener, InputEvent};
//! use respite::libs::clock::SharedClock;
//!
//! let monitor = ActivityMonitor::new(SharedClock::system(), MonitorSettings::default());
//! monitor.start(vec![Box::new(ManualListener::raw())]);
//! monitor.report(InputEvent::KeyPress);
//! println!("{}", monitor.state());
//! monitor.terminate();
//! ```

pub mod idle_watch;
pub mod input_hook;
pub mod listener;

pub use listener::{
    candidates, candidate_order, BackendChoice, EventSink, InputEvent, InputListener, ListenerContext, ListenerKind, ListenerMode,
    ManualListener, SessionEnvironment,
};

use crate::libs::clock::{Clock, SharedClock};
use listener::ListenerMessage;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Capacity of the listener queue.
const EVENT_QUEUE: usize = 1024;

/// The aggregated activity of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Active,
    Idle,
    Suspended,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActivityState::Active => "active",
            ActivityState::Idle => "idle",
            ActivityState::Suspended => "suspended",
        };
        write!(f, "{}", label)
    }
}

/// Thresholds of the activity state machine (`monitor/*` settings).
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Longest gap between inputs that still belongs to one burst.
    pub noise: Duration,
    /// Burst length before the user counts as active.
    pub activity: Duration,
    /// Inactivity after which the user counts as idle.
    pub idle: Duration,
    /// Minimum pointer travel in pixels.
    pub sensitivity: i32,
    pub backend: BackendChoice,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            noise: Duration::from_millis(9000),
            activity: Duration::ZERO,
            idle: Duration::from_millis(5000),
            sensitivity: 3,
            backend: BackendChoice::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseState {
    Idle,
    Noise,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// No listener started yet.
    Stopped,
    Listening(ListenerMode),
    /// No listener available; the user is assumed to be always active.
    Degraded,
}

#[derive(Debug)]
struct Core {
    settings: MonitorSettings,
    mode: Mode,
    base: BaseState,
    suspended: bool,
    burst_start: Duration,
    last_action: Duration,
    pointer: Option<(f64, f64)>,
    button_held: bool,
    backend: Option<&'static str>,
}

impl Core {
    fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            mode: Mode::Stopped,
            base: BaseState::Idle,
            suspended: false,
            burst_start: Duration::ZERO,
            last_action: Duration::ZERO,
            pointer: None,
            button_held: false,
            backend: None,
        }
    }

    fn current(&self) -> ActivityState {
        if self.suspended {
            ActivityState::Suspended
        } else if self.mode == Mode::Degraded {
            ActivityState::Active
        } else if self.base == BaseState::Active {
            ActivityState::Active
        } else {
            ActivityState::Idle
        }
    }

    fn apply(&mut self, event: InputEvent, now: Duration) {
        match event {
            InputEvent::PointerMove { x, y } => {
                let moved = match self.pointer {
                    Some((px, py)) => {
                        let sensitivity = f64::from(self.settings.sensitivity);
                        (x - px).abs() >= sensitivity || (y - py).abs() >= sensitivity
                    }
                    None => false,
                };
                self.pointer = Some((x, y));
                if moved || self.button_held {
                    self.action(now);
                }
            }
            InputEvent::PointerButton { pressed } => {
                self.button_held = pressed;
                if pressed {
                    self.action(now);
                }
            }
            InputEvent::Wheel | InputEvent::KeyPress => self.action(now),
            InputEvent::KeyRelease => {}
            InputEvent::IdleWatchFired => self.base = BaseState::Idle,
            InputEvent::ActiveWatchFired => {
                self.base = BaseState::Active;
                self.burst_start = now;
                self.last_action = now;
            }
        }
    }

    fn action(&mut self, now: Duration) {
        match self.base {
            BaseState::Idle => {
                self.burst_start = now;
                self.base = if self.settings.activity.is_zero() {
                    BaseState::Active
                } else {
                    BaseState::Noise
                };
            }
            BaseState::Noise => {
                if now.saturating_sub(self.last_action) > self.settings.noise {
                    self.burst_start = now;
                } else if now.saturating_sub(self.burst_start) >= self.settings.activity {
                    self.base = BaseState::Active;
                }
            }
            BaseState::Active => {}
        }
        self.last_action = now;
    }

    fn debounce(&mut self, now: Duration) {
        if self.suspended || self.mode != Mode::Listening(ListenerMode::RawInput) {
            return;
        }
        let quiet = now.saturating_sub(self.last_action);
        match self.base {
            BaseState::Active if quiet > self.settings.idle => self.base = BaseState::Idle,
            BaseState::Noise if quiet > self.settings.noise => self.base = BaseState::Idle,
            _ => {}
        }
    }
}

struct Shared {
    clock: SharedClock,
    core: Mutex<Core>,
    state_tx: watch::Sender<ActivityState>,
}

impl Shared {
    /// Runs `f` on the core and publishes a state change to subscribers.
    fn update<R>(&self, f: impl FnOnce(&mut Core, Duration) -> R) -> R {
        let now = self.clock.monotonic();
        let mut core = self.core.lock();
        let result = f(&mut core, now);
        let state = core.current();
        self.state_tx.send_if_modified(|published| {
            if *published != state {
                *published = state;
                true
            } else {
                false
            }
        });
        result
    }
}

/// Aggregates listener input into an [`ActivityState`].
pub struct ActivityMonitor {
    shared: Arc<Shared>,
    tx: SyncSender<ListenerMessage>,
    rx: Mutex<Option<Receiver<ListenerMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityMonitor {
    pub fn new(clock: SharedClock, settings: MonitorSettings) -> Self {
        let (tx, rx) = mpsc::sync_channel(EVENT_QUEUE);
        let (state_tx, _) = watch::channel(ActivityState::Idle);
        Self {
            shared: Arc::new(Shared {
                clock,
                core: Mutex::new(Core::new(settings)),
                state_tx,
            }),
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    /// Tries `candidates` in order and starts consuming the first one that
    /// initializes. Returns the winning backend's name, or `None` when the
    /// monitor degraded to always-active.
    ///
    /// Calling `start` again while running has no effect.
    pub fn start(&self, candidates: Vec<Box<dyn InputListener>>) -> Option<&'static str> {
        let Some(rx) = self.rx.lock().take() else {
            return self.backend();
        };

        let mut remaining = candidates.into_iter();
        let idle = self.shared.core.lock().settings.idle;
        let active = first_working(&mut remaining, &self.tx, idle);
        self.adopt(active.as_ref().map(|l| (l.name(), l.mode())));

        let shared = self.shared.clone();
        let tx = self.tx.clone();
        let rest: Vec<_> = remaining.collect();
        let spawned = thread::Builder::new()
            .name("respite-activity".into())
            .spawn(move || consume(shared, rx, tx, active, rest));
        match spawned {
            Ok(handle) => *self.worker.lock() = Some(handle),
            Err(e) => warn!("failed to spawn activity worker: {}", e),
        }
        self.backend()
    }

    fn adopt(&self, listener: Option<(&'static str, ListenerMode)>) {
        adopt(&self.shared, listener);
    }

    /// Stops the active listener and the worker. Returns once no further
    /// listener event can be delivered.
    pub fn terminate(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if self.tx.send(ListenerMessage::Shutdown).is_ok() {
            let _ = worker.join();
        }
        self.shared.update(|core, _| {
            core.backend = None;
        });
    }

    /// Freezes the reported state at `Suspended`.
    pub fn suspend(&self) {
        self.shared.update(|core, _| core.suspended = true);
    }

    /// Leaves suspension; the state reflects input recorded meanwhile.
    pub fn resume(&self) {
        self.shared.update(|core, now| {
            core.suspended = false;
            core.debounce(now);
        });
    }

    /// Makes the user idle until the next qualifying input.
    pub fn force_idle(&self) {
        self.shared.update(|core, _| {
            core.base = BaseState::Idle;
        });
    }

    pub fn state(&self) -> ActivityState {
        self.shared.core.lock().current()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ActivityState::Active
    }

    /// Applies the idle debounce. Called once per engine heartbeat.
    pub fn heartbeat(&self) -> ActivityState {
        self.shared.update(|core, now| {
            core.debounce(now);
            core.current()
        })
    }

    /// Applies an event synchronously, bypassing the listener queue.
    pub fn report(&self, event: InputEvent) {
        self.shared.update(|core, now| core.apply(event, now));
    }

    /// Sink for reporting events from another thread.
    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone(), "external")
    }

    pub fn settings(&self) -> MonitorSettings {
        self.shared.core.lock().settings.clone()
    }

    /// Replaces the thresholds. The current state is kept.
    pub fn set_settings(&self, settings: MonitorSettings) {
        debug!(?settings, "monitor settings changed");
        self.shared.update(|core, _| core.settings = settings);
    }

    /// Name of the listener in use.
    pub fn backend(&self) -> Option<&'static str> {
        self.shared.core.lock().backend
    }

    /// Whether no listener could be started.
    pub fn is_degraded(&self) -> bool {
        self.shared.core.lock().mode == Mode::Degraded
    }

    /// Receives every change of the aggregated state.
    pub fn subscribe(&self) -> watch::Receiver<ActivityState> {
        self.shared.state_tx.subscribe()
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn first_working(
    candidates: &mut impl Iterator<Item = Box<dyn InputListener>>,
    tx: &SyncSender<ListenerMessage>,
    idle_threshold: Duration,
) -> Option<Box<dyn InputListener>> {
    for mut listener in candidates.by_ref() {
        let context = ListenerContext {
            sink: EventSink::new(tx.clone(), listener.name()),
            idle_threshold,
        };
        if listener.init(context) {
            info!("activity backend: {}", listener.name());
            return Some(listener);
        }
        debug!("activity backend {} unavailable", listener.name());
    }
    None
}

fn adopt(shared: &Shared, listener: Option<(&'static str, ListenerMode)>) {
    shared.update(|core, now| match listener {
        Some((name, mode)) => {
            core.mode = Mode::Listening(mode);
            core.backend = Some(name);
            // Watch listeners only report transitions, so assume the user
            // who just started us is present.
            if mode == ListenerMode::Watch {
                core.base = BaseState::Active;
                core.burst_start = now;
                core.last_action = now;
            }
        }
        None => {
            warn!("no activity backend available, assuming the user is always active");
            core.mode = Mode::Degraded;
            core.backend = None;
        }
    });
}

fn consume(
    shared: Arc<Shared>,
    rx: Receiver<ListenerMessage>,
    tx: SyncSender<ListenerMessage>,
    mut active: Option<Box<dyn InputListener>>,
    rest: Vec<Box<dyn InputListener>>,
) {
    let mut remaining = rest.into_iter();
    while let Ok(message) = rx.recv() {
        match message {
            ListenerMessage::Input(event) => shared.update(|core, now| core.apply(event, now)),
            ListenerMessage::Lost(name) => {
                if active.as_ref().map(|l| l.name()) != Some(name) {
                    continue;
                }
                warn!("activity backend {} lost", name);
                if let Some(mut lost) = active.take() {
                    lost.terminate();
                }
                let idle = shared.core.lock().settings.idle;
                active = first_working(&mut remaining, &tx, idle);
                adopt(&shared, active.as_ref().map(|l| (l.name(), l.mode())));
            }
            ListenerMessage::Shutdown => break,
        }
    }
    if let Some(mut listener) = active.take() {
        listener.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::clock::SimulatedClock;
    use chrono::Local;

    fn monitor(activity: Duration) -> (ActivityMonitor, Arc<SimulatedClock>) {
        let sim = Arc::new(SimulatedClock::starting_at(Local::now()));
        let settings = MonitorSettings {
            activity,
            ..MonitorSettings::default()
        };
        let monitor = ActivityMonitor::new(SharedClock::new(sim.clone()), settings);
        monitor.start(vec![Box::new(ManualListener::raw())]);
        (monitor, sim)
    }

    #[test]
    fn test_idle_debounce_in_raw_mode() {
        let (monitor, clock) = monitor(Duration::ZERO);
        assert_eq!(monitor.state(), ActivityState::Idle);

        monitor.report(InputEvent::KeyPress);
        assert_eq!(monitor.state(), ActivityState::Active);

        clock.advance(Duration::from_secs(5));
        assert_eq!(monitor.heartbeat(), ActivityState::Active);
        clock.advance(Duration::from_secs(1));
        assert_eq!(monitor.heartbeat(), ActivityState::Idle);
    }

    #[test]
    fn test_noise_filter_requires_sustained_input() {
        let (monitor, clock) = monitor(Duration::from_secs(1));
        monitor.report(InputEvent::KeyPress);
        assert_eq!(monitor.state(), ActivityState::Idle);

        clock.advance(Duration::from_millis(500));
        monitor.report(InputEvent::KeyPress);
        assert_eq!(monitor.state(), ActivityState::Idle);

        clock.advance(Duration::from_millis(600));
        monitor.report(InputEvent::Wheel);
        assert_eq!(monitor.state(), ActivityState::Active);
    }

    #[test]
    fn test_small_pointer_moves_are_ignored() {
        let (monitor, _clock) = monitor(Duration::ZERO);
        monitor.report(InputEvent::PointerMove { x: 100.0, y: 100.0 });
        monitor.report(InputEvent::PointerMove { x: 101.0, y: 102.0 });
        assert_eq!(monitor.state(), ActivityState::Idle);

        monitor.report(InputEvent::PointerButton { pressed: true });
        monitor.report(InputEvent::PointerButton { pressed: false });
        monitor.force_idle();
        monitor.report(InputEvent::PointerMove { x: 105.0, y: 102.0 });
        assert_eq!(monitor.state(), ActivityState::Active);
    }

    #[test]
    fn test_suspend_freezes_state() {
        let (monitor, _clock) = monitor(Duration::ZERO);
        monitor.suspend();
        monitor.report(InputEvent::KeyPress);
        assert_eq!(monitor.state(), ActivityState::Suspended);
        monitor.resume();
        assert_eq!(monitor.state(), ActivityState::Active);
    }

    #[test]
    fn test_no_backend_degrades_to_active() {
        let monitor = ActivityMonitor::new(SharedClock::system(), MonitorSettings::default());
        assert_eq!(monitor.start(Vec::new()), None);
        assert!(monitor.is_degraded());
        assert_eq!(monitor.heartbeat(), ActivityState::Active);
        monitor.terminate();
    }
}
