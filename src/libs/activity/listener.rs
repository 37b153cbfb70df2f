//! Input listener abstraction.
//!
//! A listener turns one platform activity source into [`InputEvent`]s and
//! pushes them through an [`EventSink`], a bounded channel drained by the
//! activity aggregator's worker thread. Listeners run on their own threads
//! or event loops and never call into the aggregator directly.
//!
//! Backends are tried in order at start-up; the first one whose
//! [`InputListener::init`] succeeds wins.

use super::idle_watch::{CompositorIdleListener, SessionBusIdleListener};
use super::input_hook::InputHookListener;
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

/// Raw activity reported by a listener.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerMove { x: f64, y: f64 },
    PointerButton { pressed: bool },
    Wheel,
    KeyPress,
    KeyRelease,
    /// The platform decided the user went idle.
    IdleWatchFired,
    /// The platform decided the user became active.
    ActiveWatchFired,
}

/// How a listener reports activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    /// Every input event is reported; the aggregator debounces idle itself.
    RawInput,
    /// The platform debounces and reports explicit idle/active transitions.
    Watch,
}

/// Messages travelling from listeners to the aggregator worker.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ListenerMessage {
    Input(InputEvent),
    Lost(&'static str),
    Shutdown,
}

/// Sending half handed to a listener.
#[derive(Clone)]
pub struct EventSink {
    tx: SyncSender<ListenerMessage>,
    source: &'static str,
}

impl EventSink {
    pub(crate) fn new(tx: SyncSender<ListenerMessage>, source: &'static str) -> Self {
        Self { tx, source }
    }

    /// Name of the listener this sink belongs to.
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Forwards an event without blocking.
    ///
    /// Raw input is dropped when the queue is full; the next event carries
    /// the same information. Watch transitions are retried briefly.
    /// Returns `false` once the aggregator is gone.
    pub fn send(&self, event: InputEvent) -> bool {
        let retries = match event {
            InputEvent::IdleWatchFired | InputEvent::ActiveWatchFired => 20,
            _ => 0,
        };
        self.deliver(ListenerMessage::Input(event), retries)
    }

    /// Reports that the listener stopped unexpectedly.
    pub fn lost(&self) {
        self.deliver(ListenerMessage::Lost(self.source), 20);
    }

    fn deliver(&self, message: ListenerMessage, retries: usize) -> bool {
        let mut message = message;
        for attempt in 0..=retries {
            match self.tx.try_send(message) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(returned)) => {
                    if attempt == retries {
                        return true;
                    }
                    message = returned;
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
        true
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").field("source", &self.source).finish()
    }
}

/// Everything a listener needs to start.
#[derive(Debug, Clone)]
pub struct ListenerContext {
    pub sink: EventSink,
    /// Inactivity after which watch-based listeners report idle.
    pub idle_threshold: Duration,
}

/// Capability set shared by every activity backend.
pub trait InputListener: Send {
    fn name(&self) -> &'static str;

    fn mode(&self) -> ListenerMode;

    /// Starts listening. Returns `false` when the backend is unavailable.
    fn init(&mut self, context: ListenerContext) -> bool;

    /// Stops listening. After this returns no further event is delivered.
    fn terminate(&mut self);
}

/// Listener fed from outside the process, e.g. by a simulation driver or
/// another component reporting activity on the user's behalf.
///
/// It produces nothing on its own; events are reported through
/// [`super::ActivityMonitor::report`] or the monitor's sink.
#[derive(Debug)]
pub struct ManualListener {
    mode: ListenerMode,
}

impl ManualListener {
    /// Reports individual input events; idle is debounced by the aggregator.
    pub fn raw() -> Self {
        Self { mode: ListenerMode::RawInput }
    }

    /// Reports explicit idle/active transitions.
    pub fn watch() -> Self {
        Self { mode: ListenerMode::Watch }
    }
}

impl InputListener for ManualListener {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn mode(&self) -> ListenerMode {
        self.mode
    }

    fn init(&mut self, _context: ListenerContext) -> bool {
        true
    }

    fn terminate(&mut self) {}
}

/// Backend selection, from the `monitor/backend` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    #[default]
    Auto,
    InputHook,
    SessionBus,
    Compositor,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(BackendChoice::Auto),
            "input-hook" | "input_hook" | "rdev" => Ok(BackendChoice::InputHook),
            "dbus" | "session-bus" | "mutter" => Ok(BackendChoice::SessionBus),
            "compositor" | "wayland" | "swayidle" => Ok(BackendChoice::Compositor),
            other => Err(format!("unknown monitor backend '{}'", other)),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendChoice::Auto => "auto",
            BackendChoice::InputHook => "input-hook",
            BackendChoice::SessionBus => "dbus",
            BackendChoice::Compositor => "compositor",
        };
        write!(f, "{}", name)
    }
}

/// Concrete platform backends, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    InputHook,
    SessionBus,
    Compositor,
}

impl ListenerKind {
    pub fn create(self) -> Box<dyn InputListener> {
        match self {
            ListenerKind::InputHook => Box::new(InputHookListener::new()),
            ListenerKind::SessionBus => Box::new(SessionBusIdleListener::new()),
            ListenerKind::Compositor => Box::new(CompositorIdleListener::new()),
        }
    }
}

/// Facts about the session used to order the candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEnvironment {
    pub wayland: bool,
    pub gnome: bool,
}

impl SessionEnvironment {
    pub fn detect() -> Self {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
        Self {
            wayland: std::env::var_os("WAYLAND_DISPLAY").is_some(),
            gnome: desktop.to_uppercase().contains("GNOME"),
        }
    }
}

/// Backends to try, in order, for the given choice and session.
pub fn candidate_order(choice: BackendChoice, session: &SessionEnvironment) -> Vec<ListenerKind> {
    match choice {
        BackendChoice::InputHook => vec![ListenerKind::InputHook],
        BackendChoice::SessionBus => vec![ListenerKind::SessionBus],
        BackendChoice::Compositor => vec![ListenerKind::Compositor],
        BackendChoice::Auto if !cfg!(target_os = "linux") => vec![ListenerKind::InputHook],
        BackendChoice::Auto if session.wayland && session.gnome => {
            vec![ListenerKind::SessionBus, ListenerKind::Compositor, ListenerKind::InputHook]
        }
        BackendChoice::Auto if session.wayland => {
            vec![ListenerKind::Compositor, ListenerKind::SessionBus, ListenerKind::InputHook]
        }
        BackendChoice::Auto => vec![ListenerKind::InputHook, ListenerKind::SessionBus],
    }
}

/// Instantiates the candidates in order.
pub fn candidates(choice: BackendChoice, session: &SessionEnvironment) -> Vec<Box<dyn InputListener>> {
    candidate_order(choice, session).into_iter().map(ListenerKind::create).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn test_forced_backend_is_tried_alone() {
        let session = SessionEnvironment::default();
        assert_eq!(candidate_order(BackendChoice::Compositor, &session), vec![ListenerKind::Compositor]);
        assert_eq!("dbus".parse::<BackendChoice>(), Ok(BackendChoice::SessionBus));
        assert!("x11".parse::<BackendChoice>().is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_wayland_sessions_prefer_watch_backends() {
        let session = SessionEnvironment { wayland: true, gnome: true };
        assert_eq!(candidate_order(BackendChoice::Auto, &session)[0], ListenerKind::SessionBus);

        let session = SessionEnvironment { wayland: true, gnome: false };
        assert_eq!(candidate_order(BackendChoice::Auto, &session)[0], ListenerKind::Compositor);

        let session = SessionEnvironment::default();
        assert_eq!(candidate_order(BackendChoice::Auto, &session)[0], ListenerKind::InputHook);
    }

    #[test]
    fn test_sink_drops_raw_input_when_full() {
        let (tx, rx) = sync_channel(1);
        let sink = EventSink::new(tx, "test");
        assert!(sink.send(InputEvent::KeyPress));
        assert!(sink.send(InputEvent::KeyPress));
        assert_eq!(rx.try_recv(), Ok(ListenerMessage::Input(InputEvent::KeyPress)));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!sink.send(InputEvent::Wheel));
    }
}
