#[derive(Debug, Clone)]
pub enum Message {
    // === ENGINE MESSAGES ===
    EngineStarted(String), // backend
    EngineDegraded,
    EngineStopped,
    EngineShuttingDown,
    EngineTaskPanicked(String),
    BreakNotice {
        time: String,
        kind: String,
        event: String,
    },

    // === WATCHER SIGNAL MESSAGES ===
    WatcherReceivedSigterm,
    WatcherReceivedSigint,
    WatcherReceivedCtrlC,
    WatcherCtrlCListenFailed(String), // error
    WatcherSignalHandlerFailed(String),
    WatcherSignalHandlingNotSupported,

    // === SIMULATION MESSAGES ===
    EmptyPattern,
    InvalidPatternSegment(String),
    InvalidOverride(String),
    SimulationRequiresSimulatedClock,
    SimulationSummary {
        active: u64,
        idle: u64,
    },
    SimulationEventsHeader,
    SimulationNoEvents,
    SimulationTimersHeader,

    // === DAILY RESET MESSAGES ===
    InvalidResetPredicate(String),
    InvalidDateTime(String),
    NoDailyReset,
    NextDailyReset {
        spec: String,
        at: String,
    },

    // === CONFIG MESSAGES ===
    ConfigLocation(String),
    ConfigLoadFailed(String),
    ConfigUnknownKey(String),
    ConfigTypeMismatch {
        key: String,
        expected: String,
        found: String,
    },
    ConfigValueSet {
        key: String,
        value: String,
    },
    ConfigSaveError(String),
    ConfigDefaultsRestored,
}
