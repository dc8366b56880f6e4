use chrono::Local;
use clap::Subcommand;
use pomosync_core::{DailyStats, LocalStore};

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's completed countdowns, solo and in sessions
    Today,
}

pub fn run(action: StatsAction) -> CliResult {
    let ctx = Context::open()?;

    match action {
        StatsAction::Today => {
            let today = Local::now().date_naive();
            let stats = ctx
                .db
                .load_stats()?
                .map(|s| s.for_day(today))
                .unwrap_or_else(|| DailyStats::new(today));
            print_json(&stats)?;
        }
    }
    Ok(())
}
