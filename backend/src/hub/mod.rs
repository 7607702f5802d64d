//! Real-time dialog hubs.
//!
//! Every matched pair gets at most one [`HubHandle`] at a time. The hub itself
//! is a single tokio task that owns the dialog state (sequence counter,
//! connections, acknowledgements) and is driven by commands, so all
//! operations on one dialog are applied in one order while different dialogs
//! run in parallel.

pub mod actor;
pub mod connection;
pub mod registry;

use serde::Serialize;
use std::time::Duration;

use crate::constants::{
    DEFAULT_HUB_IDLE_GRACE_SECS, DEFAULT_HUB_OUTBOUND_QUEUE, DEFAULT_HUB_SWEEP_INTERVAL_SECS,
    DEFAULT_HUB_UNRESPONSIVE_SECS, HUB_REPLAY_BATCH, HUB_TICK_INTERVAL_MS,
};
use crate::db::RetryPolicy;
use crate::models::ChatMessage;

pub use actor::{HubHandle, HubStatus};
pub use connection::Attachment;
pub use registry::HubRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    /// Accepting connections and messages.
    Open,
    /// Match dissolved: history stays readable, new messages are rejected.
    Closing,
    /// Terminal; removed from the registry.
    Retired,
}

/// What a hub pushes to an attached connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Message(ChatMessage),
    Closed,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a hub without connections is kept for reconnects.
    pub idle_grace: Duration,
    /// Outbound events buffered per connection before relay is paused.
    pub outbound_queue: usize,
    /// How long a paused connection may stay paused before it is dropped.
    pub unresponsive_after: Duration,
    /// Registry sweep interval.
    pub sweep_interval: Duration,
    /// Hub housekeeping interval.
    pub tick: Duration,
    /// Messages fetched per replay round.
    pub replay_batch: i64,
    pub retry: RetryPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            idle_grace: Duration::from_secs(DEFAULT_HUB_IDLE_GRACE_SECS),
            outbound_queue: DEFAULT_HUB_OUTBOUND_QUEUE,
            unresponsive_after: Duration::from_secs(DEFAULT_HUB_UNRESPONSIVE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_HUB_SWEEP_INTERVAL_SECS),
            tick: Duration::from_millis(HUB_TICK_INTERVAL_MS),
            replay_batch: HUB_REPLAY_BATCH,
            retry: RetryPolicy::default(),
        }
    }
}
