//! Core library modules for respite.
//!
//! ## Features
//!
//! - **Time**: swappable clocks and the periodic task scheduler
//! - **Activity Monitoring**: platform listeners reduced to one activity state
//! - **Break Timers**: active, idle and overdue accounting with daily resets
//! - **Break Control**: preludes, breaks, postpone and skip
//! - **Configuration**: typed settings, JSON storage and live rebinding
//! - **User Interface**: console messages, tables and formatting
//!
//! ## Usage
//!
//! ```rust,no_run
//! use respite::libs::clock::SimulatedClock;
//! use respite::libs::config::MemoryConfig;
//! use respite::libs::engine::Engine;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(SimulatedClock::starting_at(chrono::Local::now()));
//! let engine = Engine::with_simulated_clock(Arc::new(MemoryConfig::new()), clock);
//! engine.simulate(Duration::from_secs(60), Duration::ZERO);
//! ```

pub mod activity;
pub mod binder;
pub mod break_kind;
pub mod breaks;
pub mod clock;
pub mod config;
pub mod daily;
pub mod data_storage;
pub mod engine;
pub mod formatter;
pub mod messages;
pub mod scheduler;
pub mod timer;
pub mod view;
