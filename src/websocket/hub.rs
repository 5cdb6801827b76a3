//! WebSocket Connection Hub
//!
//! Owns the set of live sessions. Every mutation of that set, and every
//! broadcast fan-out, happens inside one coordination task that drains a
//! command channel, so the membership map is never shared across tasks.
//!
//! Fan-out pushes into each session's [`OutboundQueue`] without waiting; a
//! full queue is handled by the session's [`OverflowPolicy`], so one slow
//! viewer can never stall delivery to the others.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::queue::{OutboundQueue, OverflowPolicy, Payload, PushOutcome};

/// Unique identifier for a WebSocket session
pub type SessionId = Uuid;

/// Configuration for the connection hub
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of the hub's command channel
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// Capacity of each session's outbound queue
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// What happens when a session's outbound queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_command_capacity() -> usize {
    256
}

fn default_outbound_capacity() -> usize {
    1 << 4
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            outbound_capacity: default_outbound_capacity(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Lifecycle of the coordination loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Running,
    Draining,
    Stopped,
}

impl HubState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HubState::Running,
            1 => HubState::Draining,
            _ => HubState::Stopped,
        }
    }
}

enum Command {
    Register {
        id: SessionId,
        queue: Arc<OutboundQueue>,
        ack: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        id: SessionId,
    },
    Broadcast {
        payload: Payload,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the hub's coordination loop. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionHub {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    state: Arc<AtomicU8>,
    config: Arc<HubConfig>,
}

impl ConnectionHub {
    /// Spawn the coordination loop and return a handle to it
    pub fn spawn(config: HubConfig) -> Self {
        let (commands, receiver) = mpsc::channel(config.command_capacity.max(1));
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(HubState::Running as u8));

        let coordinator = Coordinator {
            members: HashMap::new(),
            commands: receiver,
            shutdown: shutdown.clone(),
            state: Arc::clone(&state),
        };
        let done = stopped.clone();
        tokio::spawn(async move {
            coordinator.run().await;
            done.cancel();
        });

        Self {
            commands,
            shutdown,
            stopped,
            state,
            config: Arc::new(config),
        }
    }

    /// Create an outbound queue sized and configured for this hub
    pub fn new_queue(&self) -> Arc<OutboundQueue> {
        Arc::new(OutboundQueue::new(
            self.config.outbound_capacity,
            self.config.overflow_policy,
        ))
    }

    /// Admit a session.
    ///
    /// Returns once the coordination loop has inserted the session, so any
    /// broadcast issued after this call reaches it.
    pub async fn register(&self, id: SessionId, queue: Arc<OutboundQueue>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        let command = Command::Register {
            id,
            queue: Arc::clone(&queue),
            ack,
        };

        let result = match self.commands.send(command).await {
            // A dropped ack means the loop exited with the request still queued
            Ok(()) => done.await.unwrap_or(Err(HubError::Closed)),
            Err(_) => Err(HubError::Closed),
        };

        // Never admitted, so the queue must not stay open
        if result.is_err() {
            queue.close();
        }
        result
    }

    /// Remove a session and close its outbound queue. No-op if absent.
    pub async fn unregister(&self, id: SessionId) {
        if self.commands.send(Command::Unregister { id }).await.is_err() {
            tracing::trace!(session_id = %id, "Unregister after hub stopped");
        }
    }

    /// Fan a payload out to every current session
    pub async fn broadcast(&self, payload: Payload) -> Result<(), HubError> {
        self.commands
            .send(Command::Broadcast { payload })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Number of sessions currently admitted.
    ///
    /// Answered by the coordination loop, so it also reflects every command
    /// sent before it.
    pub async fn connection_count(&self) -> usize {
        let (reply, count) = oneshot::channel();
        if self.commands.send(Command::Count { reply }).await.is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }

    /// Unregister every session and stop the coordination loop.
    ///
    /// Safe to call more than once; every caller waits for the loop to stop.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.stopped.cancelled().await;
    }

    pub fn state(&self) -> HubState {
        HubState::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// The coordination loop. Sole owner of the membership map.
struct Coordinator {
    members: HashMap<SessionId, Arc<OutboundQueue>>,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    state: Arc<AtomicU8>,
}

impl Coordinator {
    async fn run(mut self) {
        tracing::debug!("Hub coordination loop started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    // Every handle dropped
                    None => break,
                },
            }
        }

        self.drain();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { id, queue, ack } => {
                self.members.insert(id, queue);
                tracing::info!(session_id = %id, sessions = self.members.len(), "Session registered");
                if ack.send(Ok(())).is_err() {
                    // Caller gave up waiting; it will never start its loops
                    self.remove(id);
                }
            }
            Command::Unregister { id } => self.remove(id),
            Command::Broadcast { payload } => self.fan_out(payload),
            Command::Count { reply } => {
                let _ = reply.send(self.members.len());
            }
        }
    }

    fn remove(&mut self, id: SessionId) {
        if let Some(queue) = self.members.remove(&id) {
            queue.close();
            tracing::info!(
                session_id = %id,
                sessions = self.members.len(),
                dropped = queue.dropped(),
                "Session unregistered"
            );
        }
    }

    fn fan_out(&mut self, payload: Payload) {
        let mut overflowed = Vec::new();
        let mut delivered = 0usize;

        for (id, queue) in &self.members {
            match queue.push(payload.clone()) {
                PushOutcome::Queued => delivered += 1,
                PushOutcome::Evicted => {
                    delivered += 1;
                    tracing::debug!(session_id = %id, "Slow session, evicted oldest payload");
                }
                PushOutcome::Dropped => {
                    tracing::debug!(session_id = %id, "Slow session, dropped payload");
                }
                PushOutcome::Overflowed => {
                    tracing::warn!(session_id = %id, "Slow session, disconnecting");
                    overflowed.push(*id);
                }
                PushOutcome::Closed => overflowed.push(*id),
            }
        }

        for id in overflowed {
            self.remove(id);
        }

        tracing::trace!(recipients = delivered, bytes = payload.len(), "Broadcast");
    }

    fn drain(&mut self) {
        self.state.store(HubState::Draining as u8, Ordering::Release);
        tracing::info!(sessions = self.members.len(), "Closing hub");

        let ids: Vec<SessionId> = self.members.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }

        // Reject whatever is still queued; later senders see a closed channel
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Register { queue, ack, .. } => {
                    queue.close();
                    let _ = ack.send(Err(HubError::Closed));
                }
                Command::Count { reply } => {
                    let _ = reply.send(0);
                }
                Command::Unregister { .. } | Command::Broadcast { .. } => {}
            }
        }

        self.state.store(HubState::Stopped as u8, Ordering::Release);
        tracing::info!("Hub stopped");
    }
}

/// Errors that can occur in the connection hub
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Hub is closed")]
    Closed,
}
