//! Clock sources for the scheduler, the activity aggregator and the timers.
//!
//! Production code and tests differ only in which [`Clock`] is injected.
//! Every consumer holds a [`SharedClock`], a cheap cloneable handle whose
//! underlying clock can be swapped at runtime. This is how the scheduler
//! switches all of its dependants to simulated time at once.

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the clock's own origin. Never goes backwards.
    fn monotonic(&self) -> Duration;

    /// Current local wall-clock time.
    fn wall(&self) -> DateTime<Local>;

    /// Whether time advances on its own.
    ///
    /// A background driver only pumps due tasks against a free-running
    /// clock; a manually advanced clock is driven by whoever advances it.
    fn is_free_running(&self) -> bool;
}

/// The real clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    base: Duration,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::continuing_from(Duration::ZERO)
    }

    /// A real clock whose monotonic reading starts at `base`.
    ///
    /// Used when leaving simulated time, so that readings keep increasing
    /// for everyone who measured against the simulated clock.
    pub fn continuing_from(base: Duration) -> Self {
        Self {
            origin: Instant::now(),
            base,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.base + self.origin.elapsed()
    }

    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }

    fn is_free_running(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct SimulatedState {
    monotonic: Duration,
    wall: DateTime<Local>,
}

/// A clock that only moves when [`SimulatedClock::advance`] is called.
///
/// Monotonic and wall time advance in lock-step, so calendar logic
/// (daily resets) sees the same passage of time as the interval logic.
#[derive(Debug)]
pub struct SimulatedClock {
    state: Mutex<SimulatedState>,
}

impl SimulatedClock {
    /// Creates a clock reading `monotonic` and `wall`.
    pub fn new(monotonic: Duration, wall: DateTime<Local>) -> Self {
        Self {
            state: Mutex::new(SimulatedState { monotonic, wall }),
        }
    }

    /// Creates a clock with a zero monotonic origin at the given wall time.
    pub fn starting_at(wall: DateTime<Local>) -> Self {
        Self::new(Duration::ZERO, wall)
    }

    /// Moves both time bases forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.monotonic += by;
        state.wall = state.wall + chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }

    /// Moves only the wall clock forward, as a system sleep does: the
    /// monotonic clock stands still while the machine is suspended.
    pub fn suspend_for(&self, by: Duration) {
        let mut state = self.state.lock();
        state.wall = state.wall + chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for SimulatedClock {
    fn monotonic(&self) -> Duration {
        self.state.lock().monotonic
    }

    fn wall(&self) -> DateTime<Local> {
        self.state.lock().wall
    }

    fn is_free_running(&self) -> bool {
        false
    }
}

/// Swappable handle to the clock currently in effect.
#[derive(Clone)]
pub struct SharedClock {
    inner: Arc<RwLock<Arc<dyn Clock>>>,
}

impl SharedClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(clock)),
        }
    }

    /// Handle backed by the real clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }

    /// Replaces the clock seen by every holder of this handle.
    pub fn install(&self, clock: Arc<dyn Clock>) -> Arc<dyn Clock> {
        std::mem::replace(&mut *self.inner.write(), clock)
    }

    /// The clock currently installed.
    pub fn current(&self) -> Arc<dyn Clock> {
        self.inner.read().clone()
    }
}

impl fmt::Debug for SharedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedClock").field(&self.current()).finish()
    }
}

impl Clock for SharedClock {
    fn monotonic(&self) -> Duration {
        self.inner.read().monotonic()
    }

    fn wall(&self) -> DateTime<Local> {
        self.inner.read().wall()
    }

    fn is_free_running(&self) -> bool {
        self.inner.read().is_free_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_simulated_clock_moves_only_when_advanced() {
        let start = Local.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        let clock = SimulatedClock::starting_at(start);
        assert_eq!(clock.monotonic(), Duration::ZERO);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.monotonic(), Duration::from_secs(90));
        assert_eq!(clock.wall(), Local.with_ymd_and_hms(2024, 1, 10, 8, 1, 30).unwrap());
        assert!(!clock.is_free_running());
    }

    #[test]
    fn test_shared_clock_swap_is_seen_by_clones() {
        let shared = SharedClock::system();
        let other = shared.clone();
        assert!(other.is_free_running());

        let start = Local.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        shared.install(Arc::new(SimulatedClock::starting_at(start)));
        assert!(!other.is_free_running());
        assert_eq!(other.wall(), start);
    }

    #[test]
    fn test_continuing_clock_starts_at_base() {
        let clock = SystemClock::continuing_from(Duration::from_secs(600));
        assert!(clock.monotonic() >= Duration::from_secs(600));
        assert!(clock.monotonic() < Duration::from_secs(660));
    }
}
