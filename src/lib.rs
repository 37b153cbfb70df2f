//! # Respite - break reminders against repetitive strain injury
//!
//! A break-scheduling engine: it watches keyboard and pointer activity and
//! decides when a micro-break, a rest break or the daily limit is due.
//!
//! ## Features
//!
//! - **Activity Monitoring**: input hook, GNOME idle monitor or compositor idle
//!   notifications, reduced to one active/idle/suspended state
//! - **Break Timers**: active, idle and overdue time per break with auto-reset,
//!   snooze and a daily reset time
//! - **Break Control**: preludes, breaks, postpone and skip, delivered to observers
//! - **Simulation**: a deterministic clock that replays activity patterns
//! - **Configuration**: JSON settings that are applied while running
//!
//! ## Usage
//!
//! ```rust,no_run
//! use respite::commands::Cli;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Cli::menu().await
//! }
//! ```

pub mod commands;
pub mod libs;
