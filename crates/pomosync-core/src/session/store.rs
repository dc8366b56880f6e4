//! Contract the engine requires from the session store.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::record::{NewSession, SessionId, SessionPatch, SessionRecord};
use crate::error::StoreError;

/// Remote object store holding one [`SessionRecord`] per session id.
///
/// Writes are fire-and-forget merge-patches; the store is the only arbiter
/// between concurrent writers. Subscribers receive the full record after
/// every mutation, including the echo of their own writes.
pub trait SessionStore: Send + Sync {
    /// Create a paused session and return its code.
    fn create(&self, new: NewSession) -> Result<SessionId, StoreError>;

    /// `Ok(None)` when no session has this id.
    fn fetch(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;

    fn subscribe(&self, id: &str) -> Result<Subscription, StoreError>;

    fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError>;
}

/// Live feed of one session's records.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// stops delivery and cancels any background poller feeding it.
#[derive(Debug)]
pub struct Subscription {
    session_id: SessionId,
    rx: mpsc::UnboundedReceiver<SessionRecord>,
    poller: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(session_id: SessionId, rx: mpsc::UnboundedReceiver<SessionRecord>) -> Self {
        Self {
            session_id,
            rx,
            poller: None,
        }
    }

    /// A subscription fed by a background task that is aborted on drop.
    pub fn with_poller(
        session_id: SessionId,
        rx: mpsc::UnboundedReceiver<SessionRecord>,
        poller: JoinHandle<()>,
    ) -> Self {
        Self {
            session_id,
            rx,
            poller: Some(poller),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next record, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<SessionRecord> {
        self.rx.recv().await
    }

    /// Next already-delivered record, without waiting.
    pub fn try_recv(&mut self) -> Option<SessionRecord> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}
