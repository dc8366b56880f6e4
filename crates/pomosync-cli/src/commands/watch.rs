//! Live countdown in the terminal.
//!
//! Reads single-letter commands from stdin while the runtime ticks:
//! `t` toggle, `m <id>` change mode, `n` next mode, `c` create a session, `j <code>` join,
//! `l` leave, `q` quit.

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use pomosync_core::{Event, LocalStore, RuntimeHandle, TimerView};

use super::{CliResult, Context};

#[derive(Args)]
pub struct WatchArgs {
    /// Join an existing session by code
    #[arg(long, conflicts_with = "create")]
    join: Option<String>,
    /// Host a new session
    #[arg(long)]
    create: bool,
}

pub async fn run(args: WatchArgs) -> CliResult {
    let ctx = Context::open()?;
    let handle = ctx.spawn_runtime(ctx.bell_hook())?;

    let rejoin = match (&args.join, args.create) {
        (Some(code), _) => Some(code.clone()),
        (None, false) => ctx.db.load_last_session()?,
        (None, true) => None,
    };
    if args.create {
        let code = handle.create_session().await?;
        println!("session {code} created; share this code");
    } else if let Some(code) = rejoin {
        if handle.join_session(&code).await? {
            println!("joined session {code}");
        } else {
            println!("session {code} not found, running solo");
        }
    }

    let result = watch_loop(&handle).await;
    handle.shutdown().await?;
    result
}

async fn watch_loop(handle: &RuntimeHandle) -> CliResult {
    let mut views = handle.subscribe_view();
    let mut events = handle.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    render(&views.borrow_and_update());
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&views.borrow_and_update());
            }
            event = events.recv() => match event {
                Ok(event) => announce(&event),
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !dispatch(handle, line.trim()).await {
                        break;
                    }
                }
                None => stdin_open = false,
            },
        }
    }
    Ok(())
}

/// Run one stdin command. Returns `false` on quit.
async fn dispatch(handle: &RuntimeHandle, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let outcome = match (parts.next(), parts.next()) {
        (Some("q"), _) => return false,
        (Some("t"), _) => handle.toggle().await.map(|_| ()),
        (Some("m"), Some(id)) => handle.change_mode(id).await.map(|_| ()),
        (Some("n"), _) => {
            let view = handle.view();
            match view.modes.next_after(&view.mode) {
                Some(next) => handle.change_mode(next).await.map(|_| ()),
                None => Ok(()),
            }
        }
        (Some("c"), _) => handle.create_session().await.map(|code| {
            println!("session {code} created; share this code");
        }),
        (Some("j"), Some(code)) => handle.join_session(code).await.map(|found| {
            if !found {
                println!("session {code} not found");
            }
        }),
        (Some("l"), _) => handle.leave_session().await.map(|_| ()),
        (None, _) => Ok(()),
        _ => {
            println!("commands: t | m <id> | n | c | j <code> | l | q");
            Ok(())
        }
    };
    if let Err(e) = outcome {
        println!("error: {e}");
    }
    true
}

fn render(view: &TimerView) {
    let scope = match &view.session_id {
        Some(code) if view.is_host => format!("{code} host"),
        Some(code) => code.clone(),
        None => "solo".to_string(),
    };
    let state = if view.running { "running" } else { "paused" };
    println!("[{scope}] {} {} {state}", view.mode_label, view.clock);
}

fn announce(event: &Event) {
    match event {
        Event::TimerCompleted { mode, .. } => println!("*** {mode} complete ***"),
        Event::SessionBound { session_id, .. } => println!("bound to session {session_id}"),
        Event::SessionUnbound { session_id, .. } => println!("left session {session_id}"),
        Event::SettingsChanged { synced: true, .. } => println!("session settings changed"),
        _ => {}
    }
}
