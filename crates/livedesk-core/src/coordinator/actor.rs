//! Single-owner task around the session coordinator.
//!
//! Every transport task talks to the coordinator through a cloneable
//! [`CoordinatorHandle`]. Commands are processed one at a time in arrival
//! order, which is what makes assignment races resolve to exactly one winner.

use std::time::Duration;

use chrono::Utc;
use livedesk_types::chat::SessionSnapshot;
use livedesk_types::error::CoordinatorError;
use livedesk_types::event::{ClientEvent, ServerEvent};
use livedesk_types::identity::{ConnectionId, ConnectionRole, UserRef};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::chat::repository::ChatRepository;
use crate::directory::UserDirectory;

use super::service::SessionCoordinator;

/// Messages accepted by the coordinator task.
#[derive(Debug)]
pub enum CoordinatorCommand {
    Connect {
        connection_id: ConnectionId,
        role: ConnectionRole,
        identity: UserRef,
        reply: oneshot::Sender<mpsc::Receiver<ServerEvent>>,
    },
    Event {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    ListWaiting {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
    ExpireWaiting {
        reply: oneshot::Sender<Vec<Uuid>>,
    },
}

/// Handle for talking to the coordinator task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    /// Register a connection and receive its outbound event queue.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        role: ConnectionRole,
        identity: UserRef,
    ) -> Result<mpsc::Receiver<ServerEvent>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::Connect {
            connection_id,
            role,
            identity,
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoordinatorError::Shutdown)
    }

    /// Queue an inbound event. Replies arrive on the connection's queue.
    pub async fn send_event(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorCommand::Event {
            connection_id,
            event,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), CoordinatorError> {
        self.send(CoordinatorCommand::Disconnect { connection_id })
            .await
    }

    pub async fn list_waiting(&self) -> Result<Vec<SessionSnapshot>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::ListWaiting { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::Shutdown)
    }

    /// Run an expiry sweep now instead of waiting for the next tick.
    pub async fn expire_now(&self) -> Result<Vec<Uuid>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::ExpireWaiting { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::Shutdown)
    }

    async fn send(&self, command: CoordinatorCommand) -> Result<(), CoordinatorError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CoordinatorError::Shutdown)
    }
}

/// Move the coordinator onto its own task.
///
/// The task runs until `cancel` fires or every handle is dropped. Waiting
/// sessions are swept for expiry every `sweep_interval`.
pub fn spawn_coordinator<C, U>(
    coordinator: SessionCoordinator<C, U>,
    sweep_interval: Duration,
    buffer: usize,
    cancel: CancellationToken,
) -> (CoordinatorHandle, JoinHandle<()>)
where
    C: ChatRepository + 'static,
    U: UserDirectory + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::spawn(run(coordinator, rx, sweep_interval, cancel));
    (CoordinatorHandle { tx }, handle)
}

async fn run<C: ChatRepository, U: UserDirectory>(
    mut coordinator: SessionCoordinator<C, U>,
    mut rx: mpsc::Receiver<CoordinatorCommand>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    let mut sweep = interval_at(Instant::now() + sweep_interval, sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("session coordinator started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("session coordinator received shutdown signal");
                break;
            }

            command = rx.recv() => {
                match command {
                    Some(command) => handle_command(&mut coordinator, command).await,
                    None => {
                        debug!("all coordinator handles dropped");
                        break;
                    }
                }
            }

            _ = sweep.tick() => {
                coordinator.expire_waiting(Utc::now()).await;
            }
        }
    }
    info!("session coordinator stopped");
}

async fn handle_command<C: ChatRepository, U: UserDirectory>(
    coordinator: &mut SessionCoordinator<C, U>,
    command: CoordinatorCommand,
) {
    match command {
        CoordinatorCommand::Connect {
            connection_id,
            role,
            identity,
            reply,
        } => {
            let rx = coordinator.connect(connection_id, role, identity);
            if reply.send(rx).is_err() {
                // Caller went away before the queue was handed over.
                coordinator.handle_disconnect(connection_id).await;
            }
        }
        CoordinatorCommand::Event {
            connection_id,
            event,
        } => coordinator.dispatch(connection_id, event).await,
        CoordinatorCommand::Disconnect { connection_id } => {
            coordinator.handle_disconnect(connection_id).await
        }
        CoordinatorCommand::ListWaiting { reply } => {
            let _ = reply.send(coordinator.list_waiting());
        }
        CoordinatorCommand::ExpireWaiting { reply } => {
            let expired = coordinator.expire_waiting(Utc::now()).await;
            let _ = reply.send(expired);
        }
    }
}
