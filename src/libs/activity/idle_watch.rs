//! Watch-based listeners for sessions where a global input hook is not
//! available (Wayland).
//!
//! Both listeners let the desktop decide when the user is idle and report
//! only the transitions:
//!
//! - [`SessionBusIdleListener`] polls Mutter's `GetIdletime` over the session
//!   bus using `gdbus`.
//! - [`CompositorIdleListener`] runs `swayidle`, which speaks the
//!   `ext-idle-notify` protocol, and reads its `idle`/`active` lines.

use super::listener::{EventSink, InputEvent, InputListener, ListenerContext, ListenerMode};
use parking_lot::{Condvar, Mutex};
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Consecutive failed polls before the session bus listener gives up.
const MAX_POLL_FAILURES: u32 = 3;
const SPAWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Sleeps for `timeout` unless stopped first. Returns `true` when stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

/// Polls `org.gnome.Mutter.IdleMonitor.GetIdletime`.
pub struct SessionBusIdleListener {
    stop: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl SessionBusIdleListener {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(StopSignal::default()),
            worker: None,
        }
    }
}

impl Default for SessionBusIdleListener {
    fn default() -> Self {
        Self::new()
    }
}

impl InputListener for SessionBusIdleListener {
    fn name(&self) -> &'static str {
        "dbus"
    }

    fn mode(&self) -> ListenerMode {
        ListenerMode::Watch
    }

    fn init(&mut self, context: ListenerContext) -> bool {
        if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_none() {
            debug!("session bus unavailable");
            return false;
        }
        let Some(initial) = query_idle_time() else {
            debug!("Mutter idle monitor not reachable");
            return false;
        };

        let threshold = context.idle_threshold;
        let sink = context.sink;
        let mut idle = initial >= threshold;
        sink.send(watch_event(idle));

        let stop = Arc::new(StopSignal::default());
        self.stop = stop.clone();
        let spawned = thread::Builder::new().name("respite-dbus-idle".into()).spawn(move || {
            let mut failures = 0;
            while !stop.wait(POLL_INTERVAL) {
                match query_idle_time() {
                    Some(idle_time) => {
                        failures = 0;
                        let now_idle = idle_time >= threshold;
                        if now_idle != idle {
                            idle = now_idle;
                            if !sink.send(watch_event(idle)) {
                                return;
                            }
                        }
                    }
                    None => {
                        failures += 1;
                        if failures >= MAX_POLL_FAILURES {
                            warn!("Mutter idle monitor stopped answering");
                            sink.lost();
                            return;
                        }
                    }
                }
            }
        });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                true
            }
            Err(e) => {
                warn!("failed to spawn idle poller: {}", e);
                false
            }
        }
    }

    fn terminate(&mut self) {
        self.stop.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn watch_event(idle: bool) -> InputEvent {
    if idle {
        InputEvent::IdleWatchFired
    } else {
        InputEvent::ActiveWatchFired
    }
}

fn query_idle_time() -> Option<Duration> {
    let output = Command::new("gdbus")
        .args([
            "call",
            "--session",
            "--dest",
            "org.gnome.Mutter.IdleMonitor",
            "--object-path",
            "/org/gnome/Mutter/IdleMonitor/Core",
            "--method",
            "org.gnome.Mutter.IdleMonitor.GetIdletime",
        ])
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_idle_reply(&String::from_utf8_lossy(&output.stdout)).map(Duration::from_millis)
}

/// Parses a `gdbus` reply such as `(uint64 5234,)`.
fn parse_idle_reply(reply: &str) -> Option<u64> {
    let inner = reply.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut tokens = inner.split_whitespace();
    let first = tokens.next()?;
    let value = if first == "uint64" { tokens.next()? } else { first };
    value.trim_end_matches(',').parse().ok()
}

/// Reads idle transitions from a `swayidle` child process.
pub struct CompositorIdleListener {
    child: Arc<Mutex<Option<Child>>>,
    terminating: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl CompositorIdleListener {
    pub fn new() -> Self {
        Self {
            child: Arc::new(Mutex::new(None)),
            terminating: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }
}

impl Default for CompositorIdleListener {
    fn default() -> Self {
        Self::new()
    }
}

impl InputListener for CompositorIdleListener {
    fn name(&self) -> &'static str {
        "compositor"
    }

    fn mode(&self) -> ListenerMode {
        ListenerMode::Watch
    }

    fn init(&mut self, context: ListenerContext) -> bool {
        if std::env::var_os("WAYLAND_DISPLAY").is_none() {
            debug!("compositor idle notify unavailable: not a Wayland session");
            return false;
        }

        let timeout = context.idle_threshold.as_secs().max(1).to_string();
        let spawned = Command::new("swayidle")
            .args(["-w", "timeout", &timeout, "echo idle", "resume", "echo active"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!("swayidle not available: {}", e);
                return false;
            }
        };

        thread::sleep(SPAWN_GRACE);
        if let Ok(Some(status)) = child.try_wait() {
            debug!("swayidle exited during start-up: {}", status);
            return false;
        }
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return false;
        };

        *self.child.lock() = Some(child);
        self.terminating.store(false, Ordering::SeqCst);
        let terminating = self.terminating.clone();
        let sink = context.sink;
        let spawned = thread::Builder::new()
            .name("respite-swayidle".into())
            .spawn(move || read_transitions(BufReader::new(stdout), &sink, &terminating));

        match spawned {
            Ok(handle) => {
                self.reader = Some(handle);
                true
            }
            Err(e) => {
                warn!("failed to spawn swayidle reader: {}", e);
                self.terminate();
                false
            }
        }
    }

    fn terminate(&mut self) {
        self.terminating.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn read_transitions<R: BufRead>(reader: R, sink: &EventSink, terminating: &AtomicBool) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if terminating.load(Ordering::SeqCst) {
            return;
        }
        let event = match line.trim() {
            "idle" => InputEvent::IdleWatchFired,
            "active" => InputEvent::ActiveWatchFired,
            _ => continue,
        };
        if !sink.send(event) {
            return;
        }
    }
    if !terminating.load(Ordering::SeqCst) {
        warn!("swayidle exited");
        sink.lost();
    }
}
