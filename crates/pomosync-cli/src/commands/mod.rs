pub mod config;
pub mod session;
pub mod stats;
pub mod timer;
pub mod watch;

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use pomosync_core::runtime::HookError;
use pomosync_core::storage::{
    data_dir, get_or_create_client_id_at, DATABASE_FILE, DEFAULT_CONFIG_FILE,
};
use pomosync_core::timer::{parse_minutes_override, Mode};
use pomosync_core::{
    load_engine, Completion, CompletionHook, Config, Database, ModeMap, RuntimeHandle,
    RuntimeOptions, SettingsError, SqliteSessionStore, SyncRuntime,
};

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Everything a command needs, opened from the data directory.
pub struct Context {
    pub config: Config,
    pub data_dir: PathBuf,
    pub db: Arc<Database>,
    pub client_id: String,
}

impl Context {
    pub fn open() -> CliResult<Self> {
        let data_dir = data_dir()?;
        let config = Config::load_from(&data_dir.join(DEFAULT_CONFIG_FILE))?;
        let db = Arc::new(Database::open_at(&data_dir.join(DATABASE_FILE))?);
        let client_id = get_or_create_client_id_at(&data_dir)?;
        Ok(Self {
            config,
            data_dir,
            db,
            client_id,
        })
    }

    pub fn session_store(&self) -> CliResult<Arc<SqliteSessionStore>> {
        let path = self.config.session_store_path(&self.data_dir);
        Ok(Arc::new(SqliteSessionStore::open(
            &path,
            self.config.poll_interval(),
        )?))
    }

    /// Start a runtime over the local database and the shared session file.
    pub fn spawn_runtime(&self, hook: Arc<dyn CompletionHook>) -> CliResult<RuntimeHandle> {
        let engine = load_engine(
            self.db.as_ref(),
            self.config.engine_settings(),
            &self.client_id,
            Utc::now(),
        );
        let runtime = SyncRuntime::new(engine, self.session_store()?, self.db.clone())
            .with_hook(hook)
            .with_options(RuntimeOptions::from(&self.config));
        Ok(runtime.spawn())
    }

    pub fn bell_hook(&self) -> Arc<dyn CompletionHook> {
        Arc::new(BellHook {
            enabled: self.config.notifications.enabled,
            bell: self.config.notifications.bell,
        })
    }
}

/// Terminal notification on completion.
pub struct BellHook {
    enabled: bool,
    bell: bool,
}

impl CompletionHook for BellHook {
    fn on_complete(&self, completion: &Completion) -> Result<(), HookError> {
        if !self.enabled {
            return Ok(());
        }
        let mut err = std::io::stderr().lock();
        if self.bell {
            write!(err, "\x07")?;
        }
        let scope = if completion.synced { "session" } else { "solo" };
        writeln!(err, "{} finished ({scope})", completion.mode)?;
        Ok(())
    }
}

/// Apply `id=minutes` overrides on top of `base`. Unknown ids add a mode.
pub fn apply_overrides(base: &ModeMap, overrides: &[String]) -> Result<ModeMap, SettingsError> {
    let mut modes = base.clone();
    for raw in overrides {
        let (id, secs) = parse_minutes_override(raw)?;
        modes = if modes.contains(&id) {
            modes.with_duration(&id, secs)?
        } else {
            let mut extended = modes;
            extended.insert(id.clone(), Mode::new(id, secs));
            extended
        };
    }
    Ok(modes)
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_and_extend() {
        let modes = apply_overrides(
            &ModeMap::default_modes(),
            &["short=7".to_string(), "deep=90".to_string()],
        )
        .unwrap();
        assert_eq!(modes.duration_of("short"), Some(420));
        assert_eq!(modes.duration_of("deep"), Some(5400));
        assert_eq!(modes.len(), 4);
    }

    #[test]
    fn overrides_reject_bad_values() {
        assert!(apply_overrides(&ModeMap::default_modes(), &["short=0".to_string()]).is_err());
        assert!(apply_overrides(&ModeMap::default_modes(), &["short".to_string()]).is_err());
    }
}
