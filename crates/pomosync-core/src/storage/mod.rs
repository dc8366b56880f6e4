mod client_id;
mod config;
pub mod database;
mod local;

pub use client_id::{
    get_or_create_client_id, get_or_create_client_id_at, ClientIdError, CLIENT_ID_PREFIX,
};
pub use config::{
    Config, EngineConfig, NotificationsConfig, SessionStoreConfig, DEFAULT_CONFIG_FILE,
};
pub use database::{Database, DATABASE_FILE};
pub use local::{LocalStore, MemoryLocalStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/pomosync[-dev]/` based on POMOSYNC_ENV.
///
/// Set POMOSYNC_ENV=dev to use the development data directory, or
/// POMOSYNC_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("POMOSYNC_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("POMOSYNC_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("pomosync-dev")
            } else {
                base_dir.join("pomosync")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::DataDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}
