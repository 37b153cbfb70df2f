//! Periodic callback scheduler.
//!
//! Named tasks are invoked at a fixed interval against the [`SharedClock`]
//! the scheduler was built with. In real time a background driver thread
//! pumps due tasks; in simulated time [`Scheduler::simulate`] advances the
//! clock and invokes tasks synchronously, which makes timer behaviour fully
//! deterministic in tests.
//!
//! ## Guarantees
//!
//! - At most one registration per name. Re-registering with the same
//!   interval keeps the task's phase; a different interval re-arms it.
//! - A task never overlaps with itself. Different tasks have no ordering
//!   relative to each other.
//! - A due task fires once per due time. When time jumps over several
//!   periods the task fires once and its next due time becomes
//!   `now + interval` (no backlog).
//! - After [`Scheduler::destroy`] returns the task will not fire again.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use respite::libs::scheduler::Scheduler;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = Arc::new(Scheduler::realtime());
//! scheduler.create("heartbeat", Duration::from_secs(1), || println!("tick"));
//! scheduler.start()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use super::clock::{Clock, SharedClock, SimulatedClock, SystemClock};
use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, warn};

/// Callback invoked when a task is due.
pub type TaskCallback = Box<dyn FnMut() + Send + 'static>;

/// Longest time the driver sleeps without re-checking its tasks.
const MAX_PARK: Duration = Duration::from_secs(1);

struct TaskEntry {
    name: String,
    callback: Mutex<TaskCallback>,
    // Installed at the start of the next invocation, so re-registering
    // never blocks on an in-flight callback.
    replacement: Mutex<Option<TaskCallback>>,
    cancelled: AtomicBool,
    executor: Mutex<Option<ThreadId>>,
}

impl TaskEntry {
    fn new(name: &str, callback: TaskCallback) -> Self {
        Self {
            name: name.to_string(),
            callback: Mutex::new(callback),
            replacement: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            executor: Mutex::new(None),
        }
    }

    fn invoke(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let mut callback = self.callback.lock();
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if let Some(replacement) = self.replacement.lock().take() {
            *callback = replacement;
        }

        *self.executor.lock() = Some(thread::current().id());
        (callback)();
        *self.executor.lock() = None;
    }
}

struct Registration {
    interval: Duration,
    next_due: Option<Duration>,
    entry: Arc<TaskEntry>,
}

#[derive(Default)]
struct DriverState {
    shutdown: bool,
    woken: bool,
}

/// Named periodic task scheduler.
pub struct Scheduler {
    clock: SharedClock,
    simulated: Mutex<Option<Arc<SimulatedClock>>>,
    tasks: Mutex<HashMap<String, Registration>>,
    driver_state: Mutex<DriverState>,
    wake: Condvar,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Creates a scheduler running on `clock`.
    ///
    /// If the installed clock is a manual one, pass it through
    /// [`Scheduler::with_simulated_clock`] instead so that
    /// [`Scheduler::simulate`] can advance it.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            simulated: Mutex::new(None),
            tasks: Mutex::new(HashMap::new()),
            driver_state: Mutex::new(DriverState::default()),
            wake: Condvar::new(),
            driver: Mutex::new(None),
        }
    }

    /// Scheduler on the real clock.
    pub fn realtime() -> Self {
        Self::new(SharedClock::system())
    }

    /// Scheduler whose clock starts out simulated at `clock`'s reading.
    pub fn with_simulated_clock(clock: Arc<SimulatedClock>) -> Self {
        let shared = SharedClock::new(clock.clone());
        let scheduler = Self::new(shared);
        *scheduler.simulated.lock() = Some(clock);
        scheduler
    }

    /// Handle to the clock every task is scheduled against.
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Registers or replaces the task `name`.
    ///
    /// An `interval` of zero disarms the task but keeps its callback.
    /// Re-registering with an unchanged interval keeps the next due time.
    pub fn create<F>(&self, name: &str, interval: Duration, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let now = self.clock.monotonic();
        let next_due = (!interval.is_zero()).then(|| now + interval);

        let mut tasks = self.tasks.lock();
        match tasks.get_mut(name) {
            Some(registration) => {
                *registration.entry.replacement.lock() = Some(Box::new(callback));
                if registration.interval != interval {
                    debug!(task = name, ?interval, "Re-arming task");
                    registration.interval = interval;
                    registration.next_due = next_due;
                }
            }
            None => {
                debug!(task = name, ?interval, "Creating task");
                tasks.insert(
                    name.to_string(),
                    Registration {
                        interval,
                        next_due,
                        entry: Arc::new(TaskEntry::new(name, Box::new(callback))),
                    },
                );
            }
        }
        drop(tasks);
        self.notify_driver();
    }

    /// Cancels and removes the task `name`. No-op if absent.
    ///
    /// Waits for an in-flight invocation on another thread to finish. When
    /// called from the task's own callback, the current invocation is the
    /// last one.
    pub fn destroy(&self, name: &str) {
        let removed = self.tasks.lock().remove(name);
        let Some(registration) = removed else {
            return;
        };

        debug!(task = name, "Destroying task");
        let entry = registration.entry;
        entry.cancelled.store(true, Ordering::Release);

        let own_callback = *entry.executor.lock() == Some(thread::current().id());
        if !own_callback {
            drop(entry.callback.lock());
        }
        self.notify_driver();
    }

    /// Whether a task called `name` is registered (armed or not).
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.lock().contains_key(name)
    }

    /// Monotonic time at which `name` is next due, if armed.
    pub fn next_due(&self, name: &str) -> Option<Duration> {
        self.tasks.lock().get(name).and_then(|registration| registration.next_due)
    }

    /// Interval `name` is registered with.
    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.tasks.lock().get(name).map(|registration| registration.interval)
    }

    /// Whether the simulated clock is currently installed.
    pub fn is_simulated(&self) -> bool {
        self.simulated.lock().is_some()
    }

    /// Switches every task between the real clock and a simulated clock.
    ///
    /// Entering simulation starts the simulated clock at the current
    /// reading, so next due times stay valid and no task is lost; the
    /// driver stops pumping. Leaving simulation installs a real clock that
    /// continues from the simulated reading, so monotonic time never goes
    /// backwards, and re-arms every task one interval from now.
    pub fn set_simulated(&self, on: bool) {
        let mut simulated = self.simulated.lock();
        match (on, simulated.is_some()) {
            (true, false) => {
                let clock = Arc::new(SimulatedClock::new(self.clock.monotonic(), self.clock.wall()));
                self.clock.install(clock.clone());
                *simulated = Some(clock);
                debug!("Scheduler switched to simulated time");
            }
            (false, true) => {
                let reading = self.clock.monotonic();
                self.clock.install(Arc::new(SystemClock::continuing_from(reading)));
                *simulated = None;

                let now = self.clock.monotonic();
                for registration in self.tasks.lock().values_mut() {
                    registration.next_due = (!registration.interval.is_zero()).then(|| now + registration.interval);
                }
                debug!("Scheduler switched to real time");
            }
            _ => {}
        }
        drop(simulated);
        self.notify_driver();
    }

    /// Advances the simulated clock by `duration`.
    ///
    /// The clock jumps from one due time to the next, invoking every task
    /// that is due at each step exactly once, and sleeps `step_delay` of
    /// real time between steps. Returns `false` when no simulated clock is
    /// installed.
    pub fn simulate(&self, duration: Duration, step_delay: Duration) -> bool {
        let Some(clock) = self.simulated.lock().clone() else {
            warn!("simulate() called while the scheduler runs on the real clock");
            return false;
        };

        let end = clock.monotonic() + duration;
        loop {
            self.run_due();

            let now = clock.monotonic();
            if now >= end {
                break;
            }

            let remaining = end - now;
            let step = self
                .earliest_due()
                .map(|next| next.saturating_sub(now))
                .unwrap_or(remaining)
                .min(remaining);
            if step.is_zero() {
                continue;
            }

            clock.advance(step);
            if !step_delay.is_zero() {
                thread::sleep(step_delay);
            }
        }
        true
    }

    /// Invokes every task that is due now. Returns how many were invoked.
    pub fn run_due(&self) -> usize {
        let now = self.clock.monotonic();
        let due: Vec<Arc<TaskEntry>> = {
            let mut tasks = self.tasks.lock();
            tasks
                .values_mut()
                .filter_map(|registration| match registration.next_due {
                    Some(next) if now >= next => {
                        registration.next_due = Some(now + registration.interval);
                        Some(registration.entry.clone())
                    }
                    _ => None,
                })
                .collect()
        };

        for entry in &due {
            debug!(task = %entry.name, "Invoking task");
            entry.invoke();
        }
        due.len()
    }

    /// Starts the real-time driver thread. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Ok(());
        }
        self.driver_state.lock().shutdown = false;

        let weak = Arc::downgrade(self);
        let handle = thread::Builder::new().name("respite-scheduler".into()).spawn(move || drive(weak))?;
        *driver = Some(handle);
        Ok(())
    }

    /// Stops the driver thread and waits for it to exit.
    pub fn shutdown(&self) {
        {
            let mut state = self.driver_state.lock();
            state.shutdown = true;
            state.woken = true;
        }
        self.wake.notify_all();

        if let Some(handle) = self.driver.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Scheduler driver thread panicked");
            }
        }
    }

    fn earliest_due(&self) -> Option<Duration> {
        self.tasks.lock().values().filter_map(|registration| registration.next_due).min()
    }

    fn notify_driver(&self) {
        self.driver_state.lock().woken = true;
        self.wake.notify_all();
    }
}

fn drive(scheduler: Weak<Scheduler>) {
    loop {
        let Some(this) = scheduler.upgrade() else {
            break;
        };
        if this.driver_state.lock().shutdown {
            break;
        }

        let wait = if this.clock.is_free_running() {
            this.run_due();
            let now = this.clock.monotonic();
            this.earliest_due().map(|next| next.saturating_sub(now)).unwrap_or(MAX_PARK).min(MAX_PARK)
        } else {
            MAX_PARK
        };

        let mut state = this.driver_state.lock();
        if !state.shutdown && !state.woken && !wait.is_zero() {
            this.wake.wait_for(&mut state, wait);
        }
        state.woken = false;
    }
    debug!("Scheduler driver exited");
}
