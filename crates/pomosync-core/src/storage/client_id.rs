//! Identity of this installation inside shared sessions.
//!
//! The id is written as the `host_id` of every session this client creates,
//! and the engine compares it against a bound record to decide whether this
//! client may edit the session's modes. It is generated once per data
//! directory, so every `pomosync-cli` process pointed at the same directory
//! acts as the same participant.

use std::fs;
use std::path::Path;
use uuid::Uuid;

use super::data_dir;

const CLIENT_ID_FILE: &str = "client_id.txt";
pub const CLIENT_ID_PREFIX: &str = "client-";

#[derive(Debug, thiserror::Error)]
pub enum ClientIdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid client ID in client_id.txt: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    DataDir(#[from] crate::error::ConfigError),
}

/// Accepts `client-<uuid>` only; anything else means the file was edited
/// or belongs to another program.
fn parse_client_id(raw: &str) -> Result<String, ClientIdError> {
    let raw = raw.trim();
    raw.strip_prefix(CLIENT_ID_PREFIX)
        .and_then(|uuid| Uuid::parse_str(uuid).ok())
        .map(|uuid| format!("{CLIENT_ID_PREFIX}{uuid}"))
        .ok_or_else(|| ClientIdError::InvalidFormat(raw.to_string()))
}

/// Read the id kept in `dir`, creating the directory and a fresh id on
/// first use.
pub fn get_or_create_client_id_at(dir: &Path) -> Result<String, ClientIdError> {
    let id_path = dir.join(CLIENT_ID_FILE);
    if id_path.exists() {
        return parse_client_id(&fs::read_to_string(&id_path)?);
    }

    fs::create_dir_all(dir)?;
    let client_id = format!("{CLIENT_ID_PREFIX}{}", Uuid::new_v4());
    fs::write(&id_path, format!("{client_id}\n"))?;
    tracing::info!(%client_id, "generated client id");
    Ok(client_id)
}

/// [`get_or_create_client_id_at`] in the default data directory.
pub fn get_or_create_client_id() -> Result<String, ClientIdError> {
    get_or_create_client_id_at(&data_dir()?)
}
