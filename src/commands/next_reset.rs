use crate::libs::daily::DailyPredicate;
use crate::libs::formatter::{format_datetime, parse_datetime};
use crate::libs::messages::Message;
use crate::{msg_error_anyhow, msg_info, msg_print};
use anyhow::Result;
use chrono::Local;
use clap::Args;

#[derive(Debug, Args)]
pub struct NextResetArgs {
    /// Daily reset in the form `day/HH:MM`
    #[arg(help = "Daily reset, e.g. day/4:00")]
    spec: String,

    #[arg(long, short, help = "Reference time (YYYY-MM-DD HH:MM:SS), defaults to now")]
    after: Option<String>,

    #[arg(long, short, default_value_t = 1, help = "Number of upcoming resets to show")]
    count: usize,
}

pub fn cmd(args: NextResetArgs) -> Result<()> {
    let predicate = DailyPredicate::parse_optional(&args.spec)
        .map_err(|e| msg_error_anyhow!(Message::InvalidResetPredicate(e.to_string())))?;
    let Some(predicate) = predicate else {
        msg_info!(Message::NoDailyReset);
        return Ok(());
    };

    let mut at = match &args.after {
        Some(text) => parse_datetime(text).ok_or_else(|| msg_error_anyhow!(Message::InvalidDateTime(text.clone())))?,
        None => Local::now(),
    };

    for _ in 0..args.count.max(1) {
        at = predicate.next_after(&at);
        msg_print!(Message::NextDailyReset {
            spec: predicate.to_string(),
            at: format_datetime(&at),
        });
    }
    Ok(())
}
