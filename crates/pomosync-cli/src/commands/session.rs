use clap::Subcommand;
use serde_json::json;

use pomosync_core::session::normalize_code;
use pomosync_core::timer::{format_clock, resolve_record};
use pomosync_core::{CoreError, RuntimeHandle, SessionStore, TimerView};

use super::{apply_overrides, print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a shared session hosted by this client
    Create {
        /// Mode to start the session in (defaults to the current local mode)
        #[arg(long)]
        mode: Option<String>,
    },
    /// Print a session record as JSON
    Show {
        /// Six-character session code
        code: String,
    },
    /// Start or pause a session's countdown
    Toggle { code: String },
    /// Switch a session's mode
    Mode { code: String, id: String },
    /// Change a session's mode durations (host only)
    Settings {
        code: String,
        /// Override a duration, e.g. `--set short=7` (minutes). Repeatable.
        #[arg(long = "set", value_name = "ID=MINUTES", required = true)]
        set: Vec<String>,
    },
}

pub async fn run(action: SessionAction) -> CliResult {
    let ctx = Context::open()?;

    if let SessionAction::Show { code } = &action {
        let code = normalize_code(code);
        let store = ctx.session_store()?;
        let record = store
            .fetch(&code)?
            .ok_or_else(|| CoreError::SessionNotFound(code.clone()))?;
        let remaining = resolve_record(&record, chrono::Utc::now());
        return print_json(&json!({
            "record": record,
            "remaining_secs": remaining,
            "clock": format_clock(remaining),
        }));
    }

    let handle = ctx.spawn_runtime(ctx.bell_hook())?;
    let result = execute(&handle, action).await;
    handle.shutdown().await?;
    print_json(&result?)
}

async fn join(handle: &RuntimeHandle, code: &str) -> CliResult<TimerView> {
    if !handle.join_session(code).await? {
        return Err(CoreError::SessionNotFound(normalize_code(code)).into());
    }
    Ok(handle.tick().await?)
}

async fn execute(handle: &RuntimeHandle, action: SessionAction) -> CliResult<serde_json::Value> {
    let view = match action {
        SessionAction::Create { mode } => {
            handle.tick().await?;
            if let Some(mode) = mode {
                handle.change_mode(mode).await?;
            }
            let code = handle.create_session().await?;
            return Ok(json!({ "code": code, "view": handle.view() }));
        }
        SessionAction::Toggle { code } => {
            join(handle, &code).await?;
            handle.toggle().await?
        }
        SessionAction::Mode { code, id } => {
            join(handle, &code).await?;
            handle.change_mode(id).await?
        }
        SessionAction::Settings { code, set } => {
            let view = join(handle, &code).await?;
            if !view.is_host {
                return Err("only the session host can change settings".into());
            }
            handle.set_settings(apply_overrides(&view.modes, &set)?).await?
        }
        SessionAction::Show { .. } => handle.view(),
    };
    Ok(serde_json::to_value(view)?)
}
