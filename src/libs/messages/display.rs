//! Display implementation for respite messages.
//!
//! All user-facing text lives here, one arm per [`Message`] variant, so that
//! the commands only ever deal with structured messages.

use super::types::Message;
use std::fmt::{Display, Formatter, Result};

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let text = match self {
            // === ENGINE MESSAGES ===
            Message::EngineStarted(backend) => format!("Break engine started (activity backend: {})", backend),
            Message::EngineDegraded => "No activity backend available, assuming the user is always active".to_string(),
            Message::EngineStopped => "Break engine stopped".to_string(),
            Message::EngineShuttingDown => "Shutting down break engine...".to_string(),
            Message::EngineTaskPanicked(error) => format!("Break engine task panicked: {}", error),
            Message::BreakNotice { time, kind, event } => format!("[{}] {}: {}", time, kind, event),

            // === WATCHER SIGNAL MESSAGES ===
            Message::WatcherReceivedSigterm => "Received SIGTERM, shutting down".to_string(),
            Message::WatcherReceivedSigint => "Received SIGINT, shutting down".to_string(),
            Message::WatcherReceivedCtrlC => "Received Ctrl+C, shutting down".to_string(),
            Message::WatcherCtrlCListenFailed(error) => format!("Failed to listen for Ctrl+C: {}", error),
            Message::WatcherSignalHandlerFailed(error) => format!("Failed to create signal handler: {}", error),
            Message::WatcherSignalHandlingNotSupported => "Signal handling is not supported on this platform".to_string(),

            // === SIMULATION MESSAGES ===
            Message::EmptyPattern => "Activity pattern is empty".to_string(),
            Message::InvalidPatternSegment(segment) => {
                format!("Invalid pattern segment '{}': expected <seconds>a or <seconds>i", segment)
            }
            Message::InvalidOverride(text) => format!("Invalid override '{}': expected KEY=VALUE", text),
            Message::SimulationRequiresSimulatedClock => "Simulation requires a simulated clock".to_string(),
            Message::SimulationSummary { active, idle } => {
                format!("Simulated {}s active and {}s idle", active, idle)
            }
            Message::SimulationEventsHeader => "Break events:".to_string(),
            Message::SimulationNoEvents => "No break events".to_string(),
            Message::SimulationTimersHeader => "Timers:".to_string(),

            // === DAILY RESET MESSAGES ===
            Message::InvalidResetPredicate(error) => format!("Invalid daily reset: {}", error),
            Message::InvalidDateTime(value) => {
                format!("Invalid date and time '{}': expected YYYY-MM-DD HH:MM:SS", value)
            }
            Message::NoDailyReset => "No daily reset configured".to_string(),
            Message::NextDailyReset { spec, at } => format!("Next reset for '{}': {}", spec, at),

            // === CONFIG MESSAGES ===
            Message::ConfigLocation(path) => format!("Settings file: {}", path),
            Message::ConfigLoadFailed(error) => format!("Failed to load settings: {}", error),
            Message::ConfigUnknownKey(key) => format!("Unknown setting '{}'", key),
            Message::ConfigTypeMismatch { key, expected, found } => {
                format!("Setting '{}' expects a {} value, got {}", key, expected, found)
            }
            Message::ConfigValueSet { key, value } => format!("{} = {}", key, value),
            Message::ConfigSaveError(key) => format!("Failed to save setting '{}'", key),
            Message::ConfigDefaultsRestored => "Default settings restored".to_string(),
        };

        write!(f, "{}", text)
    }
}
