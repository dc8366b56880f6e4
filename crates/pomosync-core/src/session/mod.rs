//! Shared session records and the stores that hold them.

mod memory;
mod record;
mod sqlite;
mod store;

pub use memory::InMemorySessionStore;
pub use record::{
    generate_code, normalize_code, NewSession, SessionId, SessionPatch, SessionRecord,
    SessionStatus, CODE_LEN,
};
pub use sqlite::SqliteSessionStore;
pub use store::{SessionStore, Subscription};
