//! Foreground break engine.
//!
//! Runs the engine on the real clock with the stored settings and prints
//! every break event until SIGINT or SIGTERM (Ctrl+C on Windows).

use crate::libs::activity::{self, ActivityState, BackendChoice, SessionEnvironment};
use crate::libs::break_kind::BreakKind;
use crate::libs::breaks::BreakEvent;
use crate::libs::clock::Clock;
use crate::libs::config::JsonConfig;
use crate::libs::engine::{Engine, OperationMode};
use crate::libs::formatter::format_datetime;
use crate::libs::messages::Message;
use crate::libs::view::View;
use crate::{msg_debug, msg_error, msg_info, msg_print, msg_warning};
use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[arg(long, short, help = "Activity backend: auto, input-hook, dbus or compositor")]
    backend: Option<BackendChoice>,

    #[arg(long, short, default_value_t = 0, help = "Print the timers every N seconds (0 = never)")]
    status: u64,

    #[arg(long, short, help = "Track activity but start no breaks")]
    quiet: bool,
}

pub async fn cmd(args: WatchArgs) -> Result<()> {
    let config = Arc::new(JsonConfig::open_default()?);
    let engine = Arc::new(Engine::realtime(config));

    let clock = engine.clock();
    engine.add_observer(move |kind: BreakKind, event: BreakEvent| {
        msg_print!(Message::BreakNotice {
            time: format_datetime(&clock.wall()),
            kind: kind.to_string(),
            event: event.to_string(),
        });
    });

    if args.quiet {
        engine.set_operation_mode(OperationMode::Quiet);
    }

    let choice = args.backend.unwrap_or_else(|| engine.monitor().settings().backend);
    match engine.start(activity::candidates(choice, &SessionEnvironment::detect()))? {
        Some(backend) => msg_info!(Message::EngineStarted(backend.to_string())),
        None => msg_warning!(Message::EngineDegraded),
    }

    let mut activity = engine.monitor().subscribe();
    let activity_task = tokio::spawn(async move {
        while activity.changed().await.is_ok() {
            let state: ActivityState = *activity.borrow_and_update();
            msg_debug!(format!("activity: {}", state));
        }
    });

    let every = Duration::from_secs(args.status);
    let status_task = (!every.is_zero()).then(|| {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                View::breaks(&engine.snapshots());
            }
        })
    });

    wait_for_shutdown().await;
    msg_info!(Message::EngineShuttingDown);

    activity_task.abort();
    if let Some(task) = status_task {
        task.abort();
        if let Err(e) = task.await {
            if e.is_panic() {
                msg_error!(Message::EngineTaskPanicked(e.to_string()));
            }
        }
    }
    engine.shutdown();
    msg_info!(Message::EngineStopped);
    Ok(())
}

/// Resolves once the process is asked to stop.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => msg_info!(Message::WatcherReceivedSigterm),
                    _ = sigint.recv() => msg_info!(Message::WatcherReceivedSigint),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => msg_error!(Message::WatcherSignalHandlerFailed(e.to_string())),
        }
    }

    #[cfg(any(unix, windows))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => msg_info!(Message::WatcherReceivedCtrlC),
            Err(e) => msg_error!(Message::WatcherCtrlCListenFailed(e.to_string())),
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        msg_warning!(Message::WatcherSignalHandlingNotSupported);
        std::future::pending::<()>().await;
    }
}
