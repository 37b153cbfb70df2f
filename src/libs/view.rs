use super::breaks::BreakSnapshot;
use super::config::ConfigValue;
use super::formatter::{format_datetime, format_duration};
use prettytable::{row, Table};
use std::time::Duration;

pub struct View {}

impl View {
    pub fn breaks(snapshots: &[BreakSnapshot]) {
        let mut table = Table::new();

        table.add_row(row!["BREAK", "STATE", "STAGE", "ACTIVE", "IDLE", "OVERDUE", "LIMIT", "NEXT RESET"]);
        for snapshot in snapshots {
            let timer = &snapshot.timer;
            table.add_row(row![
                timer.kind,
                timer.state,
                snapshot.stage,
                format_duration(&Duration::from_secs(timer.elapsed_active)),
                format_duration(&Duration::from_secs(timer.elapsed_idle)),
                format_duration(&Duration::from_secs(timer.total_overdue)),
                format_duration(&Duration::from_secs(timer.limit)),
                timer.next_daily_reset.as_ref().map(format_datetime).unwrap_or_else(|| "-".to_string())
            ]);
        }
        table.printstd();
    }

    pub fn settings(settings: &[(String, ConfigValue)]) {
        let mut table = Table::new();

        table.add_row(row!["KEY", "VALUE", "TYPE"]);
        for (key, value) in settings {
            table.add_row(row![key, value, value.type_name()]);
        }
        table.printstd();
    }
}
