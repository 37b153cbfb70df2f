//! Deterministic replay of an activity pattern.
//!
//! A pattern is a comma separated list of segments, each a number of seconds
//! followed by `a` (active) or `i` (idle), e.g. `170a,15i,35i`. Active
//! seconds feed one key press per second into the engine; idle seconds feed
//! nothing, so the monitor's own idle debounce applies.

use crate::libs::activity::{InputEvent, ManualListener};
use crate::libs::break_kind::BreakKind;
use crate::libs::breaks::{BreakEvent, BreakSnapshot};
use crate::libs::clock::{Clock, SimulatedClock};
use crate::libs::config::{ConfigProvider, ConfigValue, JsonConfig, MemoryConfig};
use crate::libs::engine::Engine;
use crate::libs::formatter::{format_datetime, format_duration, parse_datetime};
use crate::libs::messages::Message;
use crate::libs::view::View;
use crate::{msg_bail_anyhow, msg_error_anyhow, msg_info, msg_print};
use anyhow::Result;
use chrono::{DateTime, Local};
use clap::Args;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Activity pattern such as `170a,15i,35i`
    #[arg(help = "Seconds of activity (a) and idleness (i), e.g. 170a,15i,35i")]
    pattern: String,

    #[arg(long, help = "Print the result as JSON")]
    json: bool,

    #[arg(long, help = "Start from the stored settings instead of the defaults")]
    stored: bool,

    #[arg(long = "set", value_name = "KEY=VALUE", help = "Override a setting, may be repeated")]
    overrides: Vec<String>,

    #[arg(long, help = "Simulated start time (YYYY-MM-DD HH:MM:SS), defaults to now")]
    start: Option<String>,

    #[arg(long, default_value_t = 0, help = "Real milliseconds to wait per simulated step")]
    step_delay: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentActivity {
    Active,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub activity: SegmentActivity,
    pub seconds: u64,
}

/// A break event and the simulated second it happened at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedEvent {
    pub at: u64,
    pub kind: BreakKind,
    pub event: BreakEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub start: DateTime<Local>,
    pub active: u64,
    pub idle: u64,
    pub events: Vec<SimulatedEvent>,
    pub timers: Vec<BreakSnapshot>,
}

/// Parses a pattern like `170a,15i,35i`.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    let segments = pattern
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(parse_segment)
        .collect::<Result<Vec<_>>>()?;

    if segments.is_empty() {
        msg_bail_anyhow!(Message::EmptyPattern);
    }
    Ok(segments)
}

fn parse_segment(segment: &str) -> Result<Segment> {
    let invalid = || msg_error_anyhow!(Message::InvalidPatternSegment(segment.to_string()));

    let split = segment.len() - segment.chars().last().map_or(0, char::len_utf8);
    let (digits, unit) = segment.split_at(split);
    let activity = match unit.to_ascii_lowercase().as_str() {
        "a" => SegmentActivity::Active,
        "i" => SegmentActivity::Idle,
        _ => return Err(invalid()),
    };
    let seconds = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    Ok(Segment { activity, seconds })
}

/// Parses `key=value` overrides.
pub fn parse_override(text: &str) -> Option<(String, ConfigValue)> {
    let (key, value) = text.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), ConfigValue::parse_loose(value)))
}

/// Replays `segments` on an engine built from `config`, starting at `start`.
pub fn run(segments: &[Segment], config: Arc<dyn ConfigProvider>, start: DateTime<Local>, step_delay: Duration) -> Result<SimulationReport> {
    let clock = Arc::new(SimulatedClock::starting_at(start));
    let origin = clock.monotonic();
    let engine = Engine::with_simulated_clock(config, clock.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        let clock = clock.clone();
        engine.add_observer(move |kind: BreakKind, event: BreakEvent| {
            let at = clock.monotonic().saturating_sub(origin).as_secs();
            events.lock().push(SimulatedEvent { at, kind, event });
        });
    }
    engine.monitor().start(vec![Box::new(ManualListener::raw())]);

    let (mut active, mut idle) = (0, 0);
    for segment in segments {
        match segment.activity {
            SegmentActivity::Active => {
                for _ in 0..segment.seconds {
                    engine.monitor().report(InputEvent::KeyPress);
                    if !engine.simulate(Duration::from_secs(1), step_delay) {
                        msg_bail_anyhow!(Message::SimulationRequiresSimulatedClock);
                    }
                }
                active += segment.seconds;
            }
            SegmentActivity::Idle => {
                if !engine.simulate(Duration::from_secs(segment.seconds), step_delay) {
                    msg_bail_anyhow!(Message::SimulationRequiresSimulatedClock);
                }
                idle += segment.seconds;
            }
        }
    }

    let timers = engine.snapshots();
    engine.shutdown();
    let events = std::mem::take(&mut *events.lock());
    Ok(SimulationReport {
        start,
        active,
        idle,
        events,
        timers,
    })
}

pub fn cmd(args: SimulateArgs) -> Result<()> {
    let segments = parse_pattern(&args.pattern)?;

    let config = Arc::new(MemoryConfig::new());
    if args.stored {
        let stored = JsonConfig::open_default().map_err(|e| msg_error_anyhow!(Message::ConfigLoadFailed(e.to_string())))?;
        for key in stored.keys() {
            if let Some(value) = stored.get(&key) {
                config.set(&key, value);
            }
        }
    }
    for text in &args.overrides {
        let Some((key, value)) = parse_override(text) else {
            msg_bail_anyhow!(Message::InvalidOverride(text.clone()));
        };
        config.set(&key, value);
    }

    let start = match &args.start {
        Some(text) => parse_datetime(text).ok_or_else(|| msg_error_anyhow!(Message::InvalidDateTime(text.clone())))?,
        None => Local::now(),
    };

    let report = run(&segments, config, start, Duration::from_millis(args.step_delay))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    msg_info!(Message::SimulationSummary {
        active: report.active,
        idle: report.idle,
    });
    msg_print!(Message::SimulationEventsHeader, true);
    if report.events.is_empty() {
        msg_print!(Message::SimulationNoEvents);
    }
    for event in &report.events {
        let at = report.start + chrono::Duration::seconds(event.at as i64);
        msg_print!(Message::BreakNotice {
            time: format!("+{} {}", format_duration(&Duration::from_secs(event.at)), format_datetime(&at)),
            kind: event.kind.to_string(),
            event: event.event.to_string(),
        });
    }
    msg_print!(Message::SimulationTimersHeader, true);
    View::breaks(&report.timers);
    Ok(())
}
