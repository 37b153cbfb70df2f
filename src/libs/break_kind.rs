//! Break kinds known to the engine.
//!
//! The ordinal order of [`BreakKind`] matters: timers are processed in this
//! order on every heartbeat, default configuration is looked up by ordinal,
//! and a break never starts while a break of equal or higher ordinal is
//! active. Do not reorder the variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named timer with its own limit, reset and snooze policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    MicroBreak,
    RestBreak,
    DailyLimit,
}

impl BreakKind {
    /// All break kinds in ordinal order.
    pub const ALL: [BreakKind; 3] = [BreakKind::MicroBreak, BreakKind::RestBreak, BreakKind::DailyLimit];

    /// Number of break kinds.
    pub const COUNT: usize = 3;

    /// Position of this kind in [`BreakKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in configuration keys (`timers/<name>/limit`).
    pub fn config_name(self) -> &'static str {
        match self {
            BreakKind::MicroBreak => "micro_pause",
            BreakKind::RestBreak => "rest_break",
            BreakKind::DailyLimit => "daily_limit",
        }
    }

    /// Looks a kind up by its configuration name.
    pub fn from_config_name(name: &str) -> Option<BreakKind> {
        BreakKind::ALL.into_iter().find(|kind| kind.config_name() == name)
    }
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BreakKind::MicroBreak => "micro-break",
            BreakKind::RestBreak => "rest break",
            BreakKind::DailyLimit => "daily limit",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for BreakKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "micro" | "micro_break" | "micro_pause" | "microbreak" => Ok(BreakKind::MicroBreak),
            "rest" | "rest_break" | "restbreak" => Ok(BreakKind::RestBreak),
            "daily" | "daily_limit" | "dailylimit" => Ok(BreakKind::DailyLimit),
            other => Err(format!("unknown break kind '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_order_is_stable() {
        assert_eq!(BreakKind::ALL.map(BreakKind::index), [0, 1, 2]);
        assert!(BreakKind::MicroBreak < BreakKind::RestBreak);
        assert!(BreakKind::RestBreak < BreakKind::DailyLimit);
    }

    #[test]
    fn test_config_name_lookup() {
        for kind in BreakKind::ALL {
            assert_eq!(BreakKind::from_config_name(kind.config_name()), Some(kind));
        }
        assert_eq!(BreakKind::from_config_name("lunch"), None);
        assert_eq!("daily-limit".parse::<BreakKind>(), Ok(BreakKind::DailyLimit));
    }
}
