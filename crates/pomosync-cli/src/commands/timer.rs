use clap::Subcommand;
use pomosync_core::{ModeMap, RuntimeHandle, TimerView};

use super::{apply_overrides, print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Print current timer state as JSON
    Status,
    /// Start or pause the countdown
    Toggle,
    /// Switch mode and reset to its full duration
    Mode {
        /// Mode id (e.g. "pomodoro", "short", "long")
        id: String,
    },
    /// Show or change mode durations
    Settings {
        /// Override a duration, e.g. `--set short=7` (minutes). Repeatable.
        #[arg(long = "set", value_name = "ID=MINUTES")]
        set: Vec<String>,
        /// Start from the default modes
        #[arg(long)]
        reset: bool,
        /// Replace the whole mapping, e.g. `{"work":{"label":"Work","time":3000}}`
        #[arg(long, conflicts_with_all = ["set", "reset"])]
        json: Option<String>,
    },
}

pub async fn run(action: TimerAction) -> CliResult {
    let ctx = Context::open()?;
    let handle = ctx.spawn_runtime(ctx.bell_hook())?;
    let result = execute(&handle, action).await;
    handle.shutdown().await?;
    print_json(&result?)
}

async fn execute(handle: &RuntimeHandle, action: TimerAction) -> CliResult<TimerView> {
    // Catch up first so an expiry while no process was running still completes.
    let view = handle.tick().await?;
    let view = match action {
        TimerAction::Status => view,
        TimerAction::Toggle => handle.toggle().await?,
        TimerAction::Mode { id } => handle.change_mode(id).await?,
        TimerAction::Settings {
            json: Some(raw), ..
        } => {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            handle.set_settings(ModeMap::from_json(&value)?).await?
        }
        TimerAction::Settings { set, reset, .. } => {
            if set.is_empty() && !reset {
                view
            } else {
                let base = if reset {
                    ModeMap::default_modes()
                } else {
                    view.modes.clone()
                };
                handle.set_settings(apply_overrides(&base, &set)?).await?
            }
        }
    };
    Ok(view)
}
