//! Global input hook backed by `rdev`.
//!
//! `rdev::listen` blocks its thread for the lifetime of the process and
//! offers no way to stop it. Terminating therefore closes a gate in front of
//! the sink: the hook thread keeps running detached but nothing it sees
//! reaches the aggregator any more.

use super::listener::{EventSink, InputEvent, InputListener, ListenerContext, ListenerMode};
use parking_lot::Mutex;
use rdev::{listen, Event, EventType};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Time allowed for `rdev` to report a start-up failure.
const STARTUP_GRACE: Duration = Duration::from_millis(200);
/// Restarts attempted after the hook failed at runtime.
const MAX_RESTARTS: u32 = 3;
const RESTART_DELAY: Duration = Duration::from_secs(1);

type Gate = Arc<Mutex<Option<EventSink>>>;

pub struct InputHookListener {
    gate: Gate,
}

impl InputHookListener {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for InputHookListener {
    fn default() -> Self {
        Self::new()
    }
}

impl InputListener for InputHookListener {
    fn name(&self) -> &'static str {
        "input-hook"
    }

    fn mode(&self) -> ListenerMode {
        ListenerMode::RawInput
    }

    fn init(&mut self, context: ListenerContext) -> bool {
        if cfg!(target_os = "linux") && std::env::var_os("DISPLAY").is_none() {
            debug!("input hook unavailable: no X display");
            return false;
        }

        *self.gate.lock() = Some(context.sink);
        let (failed_tx, failed_rx) = mpsc::channel::<String>();
        let gate = self.gate.clone();

        let spawned = thread::Builder::new()
            .name("respite-input-hook".into())
            .spawn(move || run_hook(gate, failed_tx));
        if let Err(e) = spawned {
            warn!("failed to spawn input hook thread: {}", e);
            self.gate.lock().take();
            return false;
        }

        match failed_rx.recv_timeout(STARTUP_GRACE) {
            Ok(error) => {
                debug!("input hook failed to start: {}", error);
                self.gate.lock().take();
                false
            }
            Err(mpsc::RecvTimeoutError::Timeout) => true,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.gate.lock().take();
                false
            }
        }
    }

    fn terminate(&mut self) {
        self.gate.lock().take();
    }
}

/// Hook thread body. The first failure is reported through `failed`;
/// later failures restart the hook a few times before giving up.
fn run_hook(gate: Gate, failed: mpsc::Sender<String>) {
    let mut restarts = 0;
    let mut first = true;
    loop {
        let launched = Instant::now();
        let forward_gate = gate.clone();
        let result = listen(move |event: Event| forward(&forward_gate, event));
        let error = match result {
            Ok(()) => "input hook returned".to_string(),
            Err(e) => format!("{:?}", e),
        };

        if first && launched.elapsed() < STARTUP_GRACE {
            let _ = failed.send(error);
            return;
        }
        first = false;
        if gate.lock().is_none() {
            return;
        }
        if restarts >= MAX_RESTARTS {
            warn!("input hook stopped: {}", error);
            if let Some(sink) = gate.lock().take() {
                sink.lost();
            }
            return;
        }
        restarts += 1;
        warn!("input hook failed: {}. Retrying in 1 second...", error);
        thread::sleep(RESTART_DELAY);
    }
}

fn forward(gate: &Gate, event: Event) {
    let Some(input) = translate(&event.event_type) else {
        return;
    };
    if let Some(sink) = gate.lock().as_ref() {
        sink.send(input);
    }
}

fn translate(event: &EventType) -> Option<InputEvent> {
    match event {
        EventType::KeyPress(_) => Some(InputEvent::KeyPress),
        EventType::KeyRelease(_) => Some(InputEvent::KeyRelease),
        EventType::ButtonPress(_) => Some(InputEvent::PointerButton { pressed: true }),
        EventType::ButtonRelease(_) => Some(InputEvent::PointerButton { pressed: false }),
        EventType::MouseMove { x, y } => Some(InputEvent::PointerMove { x: *x, y: *y }),
        EventType::Wheel { .. } => Some(InputEvent::Wheel),
    }
}
