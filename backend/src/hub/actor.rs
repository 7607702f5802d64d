use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::connection::Attachment;
use super::{HubConfig, HubEvent, HubState};
use crate::db::Store;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{ChatMessage, DialogKey, UserId};

/// Snapshot of a hub published after every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    pub state: HubState,
    pub attached: usize,
    pub idle_since: Option<Instant>,
    pub last_sequence: u64,
}

struct AttachGrant {
    conn_id: u64,
    events: mpsc::Receiver<HubEvent>,
    lagging: Arc<AtomicBool>,
}

enum Command {
    Attach {
        user: UserId,
        last_acked: Option<u64>,
        reply: oneshot::Sender<ServiceResult<AttachGrant>>,
    },
    Send {
        from: UserId,
        payload: String,
        reply: oneshot::Sender<ServiceResult<ChatMessage>>,
    },
    Ack {
        user: UserId,
        conn_id: u64,
        sequence: u64,
    },
    Resume {
        user: UserId,
        conn_id: u64,
    },
    Detach {
        user: UserId,
        conn_id: u64,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    RetireIfIdle {
        grace: Duration,
        reply: oneshot::Sender<bool>,
    },
    Retire,
}

/// Cloneable handle to a running hub task.
#[derive(Clone)]
pub struct HubHandle {
    id: u64,
    key: DialogKey,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<HubStatus>,
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl HubHandle {
    /// Starts the hub task for `key`. The sequence counter is loaded from the
    /// store before the first message is numbered.
    pub fn spawn(id: u64, key: DialogKey, store: Arc<dyn Store>, config: HubConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let initial = HubStatus {
            state: HubState::Open,
            attached: 0,
            idle_since: Some(Instant::now()),
            last_sequence: 0,
        };
        let (status_tx, status) = watch::channel(initial.clone());

        let actor = HubActor {
            key,
            store,
            config,
            state: HubState::Open,
            last_sequence: 0,
            sequence_loaded: false,
            sinks: [None, None],
            acked: [0, 0],
            next_conn_id: 1,
            idle_since: initial.idle_since,
            status: status_tx,
        };
        tokio::spawn(actor.run(receiver));
        tracing::debug!(hub = id, dialog = %key, "Hub started");

        Self {
            id,
            key,
            commands,
            status,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> DialogKey {
        self.key
    }

    pub fn status(&self) -> HubStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> HubState {
        self.status.borrow().state
    }

    /// Attaches a connection for `user`. Messages after `last_acked` (or after
    /// the last ack the hub remembers for this user) are queued first.
    pub async fn attach(&self, user: UserId, last_acked: Option<u64>) -> ServiceResult<Attachment> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Attach { user, last_acked, reply })?;
        let grant = rx.await.map_err(|_| ServiceError::DialogClosed)??;
        Ok(Attachment::new(
            self.clone(),
            user,
            grant.conn_id,
            grant.events,
            grant.lagging,
        ))
    }

    /// Numbers, persists and relays one message. Returns once it is durable.
    pub async fn send(
        &self,
        from: UserId,
        payload: impl Into<String>,
    ) -> ServiceResult<ChatMessage> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            from,
            payload: payload.into(),
            reply,
        })?;
        rx.await.map_err(|_| ServiceError::DialogClosed)?
    }

    /// Moves the hub to Closing and drops its connections.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Retires the hub if it has no connections and has been idle for at least
    /// `grace` (immediately when Closing). Returns whether it is retired.
    pub async fn retire_if_idle(&self, grace: Duration) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::RetireIfIdle { grace, reply }).is_err() {
            return true;
        }
        rx.await.unwrap_or(true)
    }

    /// Retires the hub unconditionally.
    pub(crate) fn retire(&self) {
        let _ = self.commands.send(Command::Retire);
    }

    pub(crate) fn ack(&self, user: UserId, conn_id: u64, sequence: u64) {
        let _ = self.commands.send(Command::Ack {
            user,
            conn_id,
            sequence,
        });
    }

    pub(crate) fn resume(&self, user: UserId, conn_id: u64) {
        let _ = self.commands.send(Command::Resume { user, conn_id });
    }

    pub(crate) fn detach(&self, user: UserId, conn_id: u64) {
        let _ = self.commands.send(Command::Detach { user, conn_id });
    }

    fn request(&self, command: Command) -> ServiceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ServiceError::DialogClosed)
    }
}

struct ConnectionSink {
    conn_id: u64,
    tx: mpsc::Sender<HubEvent>,
    lagging: Arc<AtomicBool>,
    /// Highest sequence pushed into `tx`.
    delivered_upto: u64,
    paused_since: Option<Instant>,
}

impl ConnectionSink {
    fn pause(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
        self.lagging.store(true, Ordering::SeqCst);
    }

    fn unpause(&mut self) {
        self.paused_since = None;
        self.lagging.store(false, Ordering::SeqCst);
    }

    fn is_drained(&self) -> bool {
        self.tx.capacity() == self.tx.max_capacity()
    }
}

enum Push {
    Sent,
    Full,
    Gone,
}

struct HubActor {
    key: DialogKey,
    store: Arc<dyn Store>,
    config: HubConfig,
    state: HubState,
    last_sequence: u64,
    sequence_loaded: bool,
    sinks: [Option<ConnectionSink>; 2],
    acked: [u64; 2],
    next_conn_id: u64,
    idle_since: Option<Instant>,
    status: watch::Sender<HubStatus>,
}

impl HubActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Err(e) = self.ensure_sequence().await {
            tracing::warn!(dialog = %self.key, "Could not load last sequence yet: {}", e);
        }
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = tick.tick() => self.housekeeping().await,
            }
            self.publish();
        }

        tracing::debug!(dialog = %self.key, "Hub task finished");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Attach {
                user,
                last_acked,
                reply,
            } => {
                let result = self.attach(user, last_acked).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Send {
                from,
                payload,
                reply,
            } => {
                let result = self.send(from, payload).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Ack {
                user,
                conn_id,
                sequence,
            } => self.ack(user, conn_id, sequence),
            Command::Resume { user, conn_id } => {
                if let Some(side) = self.live_side(user, conn_id) {
                    if let Some(sink) = self.sinks[side].as_mut() {
                        sink.unpause();
                    }
                    self.pump(side).await;
                }
            }
            Command::Detach { user, conn_id } => {
                if let Some(side) = self.live_side(user, conn_id) {
                    self.drop_sink(side);
                    tracing::info!(dialog = %self.key, %user, conn_id, "Connection detached");
                }
            }
            Command::Close { reply } => {
                self.close();
                self.publish();
                let _ = reply.send(());
            }
            Command::RetireIfIdle { grace, reply } => {
                let retired = self.retire_if_idle(grace);
                self.publish();
                let _ = reply.send(retired);
            }
            Command::Retire => self.retire(),
        }
    }

    async fn attach(
        &mut self,
        user: UserId,
        last_acked: Option<u64>,
    ) -> ServiceResult<AttachGrant> {
        if self.state != HubState::Open {
            return Err(ServiceError::DialogClosed);
        }
        let side = self.key.side_of(user).ok_or(ServiceError::NotParticipant)?;
        self.ensure_sequence().await?;

        let start = last_acked
            .unwrap_or(self.acked[side])
            .min(self.last_sequence);
        self.acked[side] = self.acked[side].max(start);

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        let (tx, events) = mpsc::channel(self.config.outbound_queue.max(1));
        let lagging = Arc::new(AtomicBool::new(false));

        let previous = self.sinks[side].replace(ConnectionSink {
            conn_id,
            tx,
            lagging: lagging.clone(),
            delivered_upto: start,
            paused_since: None,
        });
        if let Some(previous) = previous {
            tracing::info!(
                dialog = %self.key,
                %user,
                old = previous.conn_id,
                new = conn_id,
                "Connection replaced by reconnect"
            );
        }
        self.idle_since = None;

        tracing::info!(
            dialog = %self.key,
            %user,
            conn_id,
            replay_from = start,
            last_sequence = self.last_sequence,
            "Connection attached"
        );
        self.pump(side).await;

        Ok(AttachGrant {
            conn_id,
            events,
            lagging,
        })
    }

    async fn send(&mut self, from: UserId, payload: String) -> ServiceResult<ChatMessage> {
        if self.state != HubState::Open {
            return Err(ServiceError::DialogClosed);
        }
        if !self.key.contains(from) {
            return Err(ServiceError::NotParticipant);
        }
        self.ensure_sequence().await?;

        let message = ChatMessage {
            dialog: self.key,
            sequence: self.last_sequence + 1,
            sender: from,
            payload,
            sent_at: Utc::now().trunc_subsecs(6),
        };

        // The number is only taken once the message is durable.
        let appended = self
            .config
            .retry
            .run("append_message", || self.store.append_message(&message))
            .await;
        if let Err(e) = appended {
            if !self.committed_anyway(&message).await {
                return Err(e.into());
            }
        }
        self.last_sequence = self.last_sequence.max(message.sequence);
        tracing::debug!(
            dialog = %self.key,
            sender = %from,
            seq = message.sequence,
            "Message persisted"
        );

        for side in 0..2 {
            self.relay(side, &message).await;
        }

        Ok(message)
    }

    /// Reloads the counter after a failed append and reports whether
    /// `message` was stored regardless. Rows found past the old counter that
    /// are not `message` are replayed to both sides.
    async fn committed_anyway(&mut self, message: &ChatMessage) -> bool {
        self.sequence_loaded = false;
        if let Err(e) = self.ensure_sequence().await {
            tracing::warn!(dialog = %self.key, "Sequence reload failed: {}", e);
            return false;
        }
        if self.last_sequence < message.sequence {
            return false;
        }

        let stored = self
            .config
            .retry
            .run("messages_after", || {
                self.store.messages_after(self.key, message.sequence - 1, 1)
            })
            .await;
        if matches!(stored.as_deref(), Ok([row]) if row == message) {
            tracing::warn!(
                dialog = %self.key,
                seq = message.sequence,
                "Append reported failure after committing"
            );
            return true;
        }

        for side in 0..2 {
            self.pump(side).await;
        }
        false
    }

    fn ack(&mut self, user: UserId, conn_id: u64, sequence: u64) {
        if let Some(side) = self.live_side(user, conn_id) {
            self.acked[side] = self.acked[side].max(sequence.min(self.last_sequence));
        }
    }

    /// Live path: push `message` straight to the connection when it is caught
    /// up, otherwise fall back to replaying from the store.
    async fn relay(&mut self, side: usize, message: &ChatMessage) {
        let Some(sink) = self.sinks[side].as_mut() else {
            return;
        };
        if sink.paused_since.is_some() {
            return;
        }
        if sink.delivered_upto + 1 != message.sequence {
            self.pump(side).await;
            return;
        }

        match Self::push(sink, message.clone()) {
            Push::Sent => {}
            Push::Full => {
                if sink.is_drained() {
                    sink.unpause();
                    self.pump(side).await;
                }
            }
            Push::Gone => self.drop_sink(side),
        }
    }

    /// Replays persisted messages after the connection's delivery point until
    /// it is caught up or its queue is full.
    async fn pump(&mut self, side: usize) {
        loop {
            let from = match &self.sinks[side] {
                Some(sink) if sink.paused_since.is_none() => sink.delivered_upto,
                _ => return,
            };
            if from >= self.last_sequence {
                return;
            }

            let batch = match self
                .config
                .retry
                .run("messages_after", || {
                    self.store
                        .messages_after(self.key, from, self.config.replay_batch)
                })
                .await
            {
                Ok(batch) if !batch.is_empty() => batch,
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!(dialog = %self.key, side, "Replay read failed: {}", e);
                    return;
                }
            };

            let Some(sink) = self.sinks[side].as_mut() else {
                return;
            };
            let mut gone = false;
            for message in batch {
                if message.sequence <= sink.delivered_upto {
                    continue;
                }
                match Self::push(sink, message) {
                    Push::Sent => {}
                    Push::Full => {
                        if !sink.is_drained() {
                            return;
                        }
                        // Drained between the failed push and the pause.
                        sink.unpause();
                        break;
                    }
                    Push::Gone => {
                        gone = true;
                        break;
                    }
                }
            }
            if gone {
                self.drop_sink(side);
                return;
            }
        }
    }

    fn push(sink: &mut ConnectionSink, message: ChatMessage) -> Push {
        let sequence = message.sequence;
        match sink.tx.try_send(HubEvent::Message(message)) {
            Ok(()) => {
                sink.delivered_upto = sequence;
                Push::Sent
            }
            Err(TrySendError::Full(_)) => {
                sink.pause();
                Push::Full
            }
            Err(TrySendError::Closed(_)) => Push::Gone,
        }
    }

    fn close(&mut self) {
        if self.state != HubState::Open {
            return;
        }
        self.state = HubState::Closing;
        for side in 0..2 {
            if let Some(sink) = self.sinks[side].take() {
                let _ = sink.tx.try_send(HubEvent::Closed);
            }
        }
        self.mark_idle_if_empty();
        tracing::info!(dialog = %self.key, "Hub closing");
    }

    fn retire_if_idle(&mut self, grace: Duration) -> bool {
        let empty = self.sinks.iter().all(Option::is_none);
        let expired = match self.state {
            HubState::Retired => true,
            HubState::Closing => empty,
            HubState::Open => {
                empty && self.idle_since.is_some_and(|since| since.elapsed() >= grace)
            }
        };
        if expired {
            self.retire();
        }
        expired
    }

    fn retire(&mut self) {
        if self.state == HubState::Retired {
            return;
        }
        for side in 0..2 {
            if let Some(sink) = self.sinks[side].take() {
                let _ = sink.tx.try_send(HubEvent::Closed);
            }
        }
        self.state = HubState::Retired;
        tracing::info!(dialog = %self.key, last_sequence = self.last_sequence, "Hub retired");
    }

    async fn housekeeping(&mut self) {
        for side in 0..2 {
            let Some(sink) = self.sinks[side].as_mut() else {
                continue;
            };
            if sink.tx.is_closed() {
                self.drop_sink(side);
                continue;
            }
            let Some(paused_since) = sink.paused_since else {
                continue;
            };
            if paused_since.elapsed() >= self.config.unresponsive_after {
                tracing::warn!(
                    dialog = %self.key,
                    conn_id = sink.conn_id,
                    delivered_upto = sink.delivered_upto,
                    "Dropping unresponsive connection"
                );
                self.drop_sink(side);
            } else if sink.is_drained() {
                sink.unpause();
                self.pump(side).await;
            }
        }
    }

    async fn ensure_sequence(&mut self) -> ServiceResult<()> {
        if self.sequence_loaded {
            return Ok(());
        }
        let last = self
            .config
            .retry
            .run("last_sequence", || self.store.last_sequence(self.key))
            .await?;
        self.last_sequence = last;
        self.sequence_loaded = true;
        Ok(())
    }

    fn live_side(&self, user: UserId, conn_id: u64) -> Option<usize> {
        let side = self.key.side_of(user)?;
        match &self.sinks[side] {
            Some(sink) if sink.conn_id == conn_id => Some(side),
            _ => None,
        }
    }

    fn drop_sink(&mut self, side: usize) {
        self.sinks[side] = None;
        self.mark_idle_if_empty();
    }

    fn mark_idle_if_empty(&mut self) {
        if self.sinks.iter().all(Option::is_none) && self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }

    fn publish(&self) {
        self.status.send_replace(HubStatus {
            state: self.state,
            attached: self.sinks.iter().filter(|s| s.is_some()).count(),
            idle_since: self.idle_since,
            last_sequence: self.last_sequence,
        });
    }
}
