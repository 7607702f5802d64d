use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::HubEvent;
use super::actor::HubHandle;
use crate::error::ServiceResult;
use crate::models::{ChatMessage, DialogKey, UserId};

/// One participant's live connection to a hub.
///
/// The transport task drives it: it pulls events with [`Attachment::next_event`]
/// and writes them out, and forwards client frames through `send`/`ack`.
/// Dropping the attachment detaches it from the hub.
pub struct Attachment {
    hub: HubHandle,
    user: UserId,
    conn_id: u64,
    events: mpsc::Receiver<HubEvent>,
    lagging: Arc<AtomicBool>,
}

impl Attachment {
    pub(crate) fn new(
        hub: HubHandle,
        user: UserId,
        conn_id: u64,
        events: mpsc::Receiver<HubEvent>,
        lagging: Arc<AtomicBool>,
    ) -> Self {
        Self {
            hub,
            user,
            conn_id,
            events,
            lagging,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn dialog(&self) -> DialogKey {
        self.hub.key()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Next event for this connection, in sequence order. `None` once the hub
    /// dropped the connection (replaced, unresponsive, closed or retired).
    pub async fn next_event(&mut self) -> Option<HubEvent> {
        // The hub paused relay because our queue filled up; now that it is
        // drained, ask for the backlog.
        if self.events.is_empty() && self.lagging.swap(false, Ordering::SeqCst) {
            self.hub.resume(self.user, self.conn_id);
        }
        self.events.recv().await
    }

    /// Non-blocking variant of [`Attachment::next_event`].
    pub fn try_next_event(&mut self) -> Option<HubEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(_) => {
                if self.lagging.swap(false, Ordering::SeqCst) {
                    self.hub.resume(self.user, self.conn_id);
                }
                None
            }
        }
    }

    pub async fn send(&self, payload: impl Into<String>) -> ServiceResult<ChatMessage> {
        self.hub.send(self.user, payload).await
    }

    /// Records that the client has processed everything up to `sequence`.
    pub fn ack(&self, sequence: u64) {
        self.hub.ack(self.user, self.conn_id, sequence);
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.hub.detach(self.user, self.conn_id);
    }
}
