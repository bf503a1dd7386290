//! Session coordinator: the live chat state machine across all sessions.
//!
//! `SessionCoordinator` owns the live (non-closed) sessions, the presence
//! registry, and a handle to the fan-out router. Every operation takes
//! `&mut self`, so one owner processes events one at a time (see
//! [`super::actor`]). Within an operation, every decision about who wins a
//! session is committed to memory before the store is awaited.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use livedesk_types::chat::{
    AgentRef, ChatEntry, ChatSession, EndReason, PriorEntry, SessionSnapshot, SessionStatus,
};
use livedesk_types::error::CoordinatorError;
use livedesk_types::event::{ClientEvent, ServerEvent, UnavailableReason};
use livedesk_types::identity::{ConnectionId, ConnectionRole, UserRef};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::repository::ChatRepository;
use crate::chat::session::{
    disconnect_notice, LiveSession, TransitionError, EXPIRED_NOTICE, RESTART_NOTICE,
};
use crate::directory::UserDirectory;
use crate::event::router::{EventRouter, Target};
use crate::presence::registry::PresenceRegistry;

/// Outcome of [`SessionCoordinator::recover`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Waiting sessions loaded back into memory.
    pub resumed: usize,
    /// Sessions left active by a previous process and closed now.
    pub interrupted: usize,
}

/// Coordinates live chat sessions between visitors and agents.
///
/// Generic over `ChatRepository` and `UserDirectory` so livedesk-core never
/// depends on livedesk-infra.
pub struct SessionCoordinator<C: ChatRepository, U: UserDirectory> {
    repo: C,
    users: U,
    router: Arc<EventRouter>,
    presence: PresenceRegistry,
    live: HashMap<Uuid, LiveSession>,
    /// Sessions closed in memory whose `closed` status has not reached the
    /// store yet. Retried on every sweep and before any store lookup.
    unsynced_closes: HashMap<Uuid, (EndReason, DateTime<Utc>)>,
    waiting_ttl: Option<Duration>,
}

impl<C: ChatRepository, U: UserDirectory> SessionCoordinator<C, U> {
    pub fn new(repo: C, users: U, router: Arc<EventRouter>) -> Self {
        Self {
            repo,
            users,
            router,
            presence: PresenceRegistry::new(),
            live: HashMap::new(),
            unsynced_closes: HashMap::new(),
            waiting_ttl: None,
        }
    }

    /// Close waiting sessions idle for longer than `ttl` on each sweep.
    pub fn with_waiting_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.waiting_ttl = ttl;
        self
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// A live session by id. Closed sessions are not retained here.
    pub fn live_session(&self, session_id: &Uuid) -> Option<&ChatSession> {
        self.live.get(session_id).map(LiveSession::session)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    // --- Connection lifecycle ---

    /// Register a new connection and return its outbound event queue.
    ///
    /// Agent connections join the agent broadcast group immediately.
    pub fn connect(
        &mut self,
        connection_id: ConnectionId,
        role: ConnectionRole,
        identity: UserRef,
    ) -> mpsc::Receiver<ServerEvent> {
        let rx = self.router.register(connection_id);
        if role == ConnectionRole::Agent {
            self.router.join_agents(connection_id);
        }
        self.presence.register(connection_id, role, identity.clone());
        info!(
            %connection_id,
            %role,
            user = %identity,
            online = self.presence.count(role),
            "connection opened"
        );
        rx
    }

    /// Tear down everything a vanished connection was part of.
    ///
    /// An active session the connection belonged to is closed and the other
    /// party is told who left. A waiting session stays resumable.
    pub async fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let entry = self.presence.remove(connection_id);
        self.router.unregister(connection_id);

        let Some(entry) = entry else {
            debug!(%connection_id, "disconnect for unknown connection");
            return;
        };
        let connected_secs = (Utc::now() - entry.connected_at).num_seconds();
        info!(%connection_id, role = %entry.role, connected_secs, "connection closed");

        let Some(session_id) = entry.session_id else {
            return;
        };
        let Some(live) = self.live.get(&session_id) else {
            return;
        };
        // A stale connection (replaced by a resume) no longer speaks for the session.
        let Some(role) = live.session().role_of(connection_id) else {
            return;
        };

        match live.status() {
            SessionStatus::Active => {
                self.close_session(
                    session_id,
                    EndReason::disconnected(role),
                    Some(disconnect_notice(role)),
                    Some(connection_id),
                )
                .await;
            }
            SessionStatus::Waiting => {
                debug!(%session_id, "visitor left while waiting, session stays resumable");
            }
            SessionStatus::Closed => {}
        }
    }

    // --- Inbound events ---

    /// Validate and process one inbound event, replying on the sender's connection.
    ///
    /// Failures are reported only to the sender; nothing here panics or stops
    /// the caller's event loop.
    pub async fn dispatch(&mut self, connection_id: ConnectionId, event: ClientEvent) {
        if self.presence.get(connection_id).is_none() {
            warn!(%connection_id, event = event.name(), "event from unregistered connection");
            return;
        }

        if let Err(err) = event.validate() {
            debug!(%connection_id, event = event.name(), error = %err, "rejecting invalid event");
            let err = CoordinatorError::from(err);
            self.router
                .send(connection_id, ServerEvent::error(err.code(), err.to_string()));
            return;
        }

        let name = event.name();
        let result = match event {
            ClientEvent::RequestChat {
                visitor_identity,
                prior_history,
            } => self
                .request_chat(connection_id, visitor_identity, prior_history)
                .await
                .map(|session| Some(ServerEvent::ChatRequested { session })),

            ClientEvent::AgentJoinSession {
                session_id,
                agent_identity,
            } => match self
                .assign_agent(connection_id, session_id, agent_identity)
                .await
            {
                Ok(session) => Ok(Some(ServerEvent::SessionAssigned { session })),
                Err(CoordinatorError::NotFound(session_id)) => {
                    Ok(Some(ServerEvent::SessionUnavailable {
                        session_id,
                        reason: UnavailableReason::SessionNoLongerAvailable,
                    }))
                }
                Err(CoordinatorError::AlreadyAssigned(session_id)) => {
                    Ok(Some(ServerEvent::SessionUnavailable {
                        session_id,
                        reason: UnavailableReason::AlreadyAssigned,
                    }))
                }
                Err(err) => Err(err),
            },

            ClientEvent::PostMessage { session_id, text } => self
                .post_message(connection_id, session_id, &text)
                .await
                .map(|_| None),

            ClientEvent::TypingStart { session_id } => self
                .set_typing(connection_id, session_id, true)
                .map(|()| None),

            ClientEvent::TypingStop { session_id } => self
                .set_typing(connection_id, session_id, false)
                .map(|()| None),

            ClientEvent::EndChat { session_id } => {
                self.end_chat(connection_id, session_id).await.map(|()| None)
            }

            ClientEvent::ListWaiting => self
                .require_role(connection_id, ConnectionRole::Agent)
                .map(|()| Some(ServerEvent::WaitingSessions {
                    sessions: self.list_waiting(),
                })),

            ClientEvent::Ping => Ok(Some(ServerEvent::Pong)),
        };

        match result {
            Ok(Some(reply)) => {
                self.router.send(connection_id, reply);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%connection_id, event = name, error = %err, "event rejected");
                self.router
                    .send(connection_id, ServerEvent::error(err.code(), err.to_string()));
            }
        }
    }

    // --- Operations ---

    /// Start a chat for a visitor, or resume the visitor's waiting one.
    ///
    /// The connection is subscribed to the session topic and the agent group
    /// is told about the (new or updated) waiting request.
    pub async fn request_chat(
        &mut self,
        connection_id: ConnectionId,
        visitor: UserRef,
        prior_history: Vec<PriorEntry>,
    ) -> Result<SessionSnapshot, CoordinatorError> {
        self.require_identity(connection_id, ConnectionRole::Visitor, &visitor)?;

        let cached = self
            .live
            .values()
            .find(|l| l.status() == SessionStatus::Waiting && l.session().visitor.identity == visitor)
            .map(|l| l.session().id);

        let session_id = match cached {
            Some(session_id) => {
                self.ensure_not_busy(connection_id, Some(session_id))?;
                let live = self
                    .live
                    .get(&session_id)
                    .cloned()
                    .ok_or(CoordinatorError::NotFound(session_id))?;
                self.resume_waiting(live, connection_id).await?
            }
            None => {
                self.sync_unsynced_closes().await;
                let stored = self
                    .repo
                    .find_by_visitor_and_status(&visitor, SessionStatus::Waiting)
                    .await
                    .map_err(|e| {
                        error!(visitor = %visitor, error = %e, "waiting session lookup failed");
                        CoordinatorError::persistence("find_waiting_session", e)
                    })?;

                // A row closed here whose close never reached the store must
                // not be resumed.
                let stored =
                    stored.filter(|s| !self.unsynced_closes.contains_key(&s.id));

                match stored {
                    Some(stored) => {
                        self.ensure_not_busy(connection_id, Some(stored.id))?;
                        self.resume_waiting(LiveSession::new(stored), connection_id)
                            .await?
                    }
                    None => {
                        self.ensure_not_busy(connection_id, None)?;
                        self.create_waiting(connection_id, visitor, prior_history)
                            .await?
                    }
                }
            }
        };

        self.router.subscribe(session_id, connection_id);
        self.presence.bind_session(connection_id, session_id);

        let snapshot = self.snapshot(&session_id)?;
        self.router.publish(
            Target::AgentGroup { except: None },
            ServerEvent::NewWaitingRequest {
                session: snapshot.clone(),
            },
        );
        Ok(snapshot)
    }

    /// Try to give a waiting session to the requesting agent.
    ///
    /// Exactly one agent wins a session. The check and the in-memory commit
    /// are one synchronous step; the store write that follows is conditional
    /// and rolls the commit back if the row was already taken.
    pub async fn assign_agent(
        &mut self,
        connection_id: ConnectionId,
        session_id: Uuid,
        agent_identity: UserRef,
    ) -> Result<SessionSnapshot, CoordinatorError> {
        self.require_identity(connection_id, ConnectionRole::Agent, &agent_identity)?;
        self.ensure_not_busy(connection_id, None)?;

        // Name lookup may suspend, so it happens before any state is read.
        let display_name = self.resolve_name(&agent_identity).await;

        let Some(live) = self.live.get_mut(&session_id) else {
            return Err(CoordinatorError::NotFound(session_id));
        };
        let previous = live.clone();
        let agent = AgentRef {
            identity: agent_identity,
            connection_id,
            display_name: display_name.clone(),
        };
        let join_entry = match live.assign(agent.clone()) {
            Ok(entry) => entry,
            Err(TransitionError::AlreadyAssigned) => {
                debug!(%session_id, %connection_id, "assignment lost to another agent");
                return Err(CoordinatorError::AlreadyAssigned(session_id));
            }
            Err(_) => return Err(CoordinatorError::NotFound(session_id)),
        };
        let visitor_conn = live.session().visitor.connection_id;

        match self.repo.assign_agent(&session_id, &agent, &join_entry).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%session_id, "store reports session already assigned, rolling back");
                self.live.insert(session_id, previous);
                return Err(CoordinatorError::AlreadyAssigned(session_id));
            }
            Err(e) => {
                error!(%session_id, operation = "assign_agent", error = %e, "persisting assignment failed");
                self.live.insert(session_id, previous);
                return Err(CoordinatorError::persistence("assign_agent", e));
            }
        }

        self.router.subscribe(session_id, connection_id);
        self.presence.bind_session(connection_id, session_id);

        self.router.send(
            visitor_conn,
            ServerEvent::AgentJoinedNotice {
                session_id,
                entry: join_entry,
            },
        );
        self.router.publish(
            Target::AgentGroup {
                except: Some(connection_id),
            },
            ServerEvent::SessionTaken {
                session_id,
                agent_name: display_name.clone(),
            },
        );

        info!(%session_id, agent = %display_name, "agent assigned");
        self.snapshot(&session_id)
    }

    /// Append a participant message and relay it to the other party.
    ///
    /// Messages for sessions that are not active are dropped. A failed store
    /// write is logged and the relay still happens from memory, so the live
    /// view can run ahead of the stored transcript.
    pub async fn post_message(
        &mut self,
        connection_id: ConnectionId,
        session_id: Uuid,
        text: &str,
    ) -> Result<Option<ChatEntry>, CoordinatorError> {
        let Some(live) = self.live.get_mut(&session_id) else {
            debug!(%session_id, "dropping message for unknown or closed session");
            return Ok(None);
        };
        let Some(role) = live.session().role_of(connection_id) else {
            return Err(CoordinatorError::NotParticipant(session_id));
        };
        let entry = match live.post(role.into(), text) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%session_id, error = %err, "dropping message");
                return Ok(None);
            }
        };
        if let Err(e) = self.repo.append_entry(&session_id, &entry).await {
            error!(
                %session_id,
                operation = "append_entry",
                error = %e,
                "transcript write failed, relaying from memory"
            );
        }

        self.router.publish(
            Target::Topic {
                session_id,
                except: Some(connection_id),
            },
            ServerEvent::MessageReceived {
                session_id,
                entry: entry.clone(),
            },
        );
        Ok(Some(entry))
    }

    /// Relay a typing indicator to the other party. Nothing is stored.
    pub fn set_typing(
        &self,
        connection_id: ConnectionId,
        session_id: Uuid,
        is_typing: bool,
    ) -> Result<(), CoordinatorError> {
        let Some(live) = self.live.get(&session_id) else {
            return Ok(());
        };
        if live.session().role_of(connection_id).is_none() {
            return Err(CoordinatorError::NotParticipant(session_id));
        }
        let event = if is_typing {
            ServerEvent::TypingStart { session_id }
        } else {
            ServerEvent::TypingStop { session_id }
        };
        self.router.publish(
            Target::Topic {
                session_id,
                except: Some(connection_id),
            },
            event,
        );
        Ok(())
    }

    /// Close a live session on request of a participant.
    ///
    /// Agents that are not part of the session may dismiss it as well, which
    /// is how a waiting request is declined.
    pub async fn end_chat(
        &mut self,
        connection_id: ConnectionId,
        session_id: Uuid,
    ) -> Result<(), CoordinatorError> {
        let Some(live) = self.live.get(&session_id) else {
            return Err(CoordinatorError::NotFound(session_id));
        };
        let role = match live.session().role_of(connection_id) {
            Some(role) => role,
            None if self.presence.role_of(connection_id) == Some(ConnectionRole::Agent) => {
                ConnectionRole::Agent
            }
            None => return Err(CoordinatorError::NotParticipant(session_id)),
        };

        self.close_session(session_id, EndReason::ended_by(role), None, None)
            .await;
        Ok(())
    }

    /// Reconciliation view: every waiting session, oldest first.
    pub fn list_waiting(&self) -> Vec<SessionSnapshot> {
        let mut waiting: Vec<&ChatSession> = self
            .live
            .values()
            .map(LiveSession::session)
            .filter(|s| s.status == SessionStatus::Waiting)
            .collect();
        waiting.sort_by_key(|s| (s.created_at, s.id));
        waiting.into_iter().map(ChatSession::snapshot).collect()
    }

    /// Close waiting sessions idle since before `now - ttl`.
    ///
    /// Returns the ids of the sessions that were closed.
    pub async fn expire_waiting(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.sync_unsynced_closes().await;

        let Some(ttl) = self.waiting_ttl else {
            return Vec::new();
        };
        let Ok(ttl) = TimeDelta::from_std(ttl) else {
            return Vec::new();
        };
        let cutoff = now - ttl;

        let expired: Vec<Uuid> = self
            .live
            .values()
            .map(LiveSession::session)
            .filter(|s| s.status == SessionStatus::Waiting && s.updated_at < cutoff)
            .map(|s| s.id)
            .collect();

        for session_id in &expired {
            self.close_session(
                *session_id,
                EndReason::Expired,
                Some(EXPIRED_NOTICE.to_string()),
                None,
            )
            .await;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired waiting sessions");
        }
        expired
    }

    /// Load state left behind by a previous process.
    ///
    /// Waiting sessions become resumable again. Active sessions lost both
    /// connections with the old process, so they are closed.
    pub async fn recover(&mut self) -> Result<RecoveryReport, CoordinatorError> {
        let mut report = RecoveryReport::default();

        let waiting = self
            .repo
            .list_sessions(Some(SessionStatus::Waiting), None, None)
            .await
            .map_err(|e| CoordinatorError::persistence("recover_waiting", e))?;
        for session in waiting {
            self.live.insert(session.id, LiveSession::new(session));
            report.resumed += 1;
        }

        let active = self
            .repo
            .list_sessions(Some(SessionStatus::Active), None, None)
            .await
            .map_err(|e| CoordinatorError::persistence("recover_active", e))?;
        for session in active {
            let session_id = session.id;
            let mut live = LiveSession::new(session);
            let Ok(entry) = live.note(RESTART_NOTICE) else {
                continue;
            };
            if live.close(EndReason::ServerRestart).is_err() {
                continue;
            }
            if let Err(e) = self.repo.append_entry(&session_id, &entry).await {
                error!(%session_id, error = %e, "failed to record restart notice");
            }
            if let Err(e) = self
                .repo
                .update_status(
                    &session_id,
                    SessionStatus::Closed,
                    Some(EndReason::ServerRestart),
                    live.session().updated_at,
                )
                .await
            {
                error!(%session_id, error = %e, "failed to close interrupted session");
            }
            report.interrupted += 1;
        }

        info!(
            resumed = report.resumed,
            interrupted = report.interrupted,
            "session recovery complete"
        );
        Ok(report)
    }

    // --- Internals ---

    async fn create_waiting(
        &mut self,
        connection_id: ConnectionId,
        visitor: UserRef,
        prior_history: Vec<PriorEntry>,
    ) -> Result<Uuid, CoordinatorError> {
        let history = prior_history.into_iter().map(PriorEntry::into_entry).collect();
        let session = ChatSession::new_waiting(visitor, connection_id, history);

        let stored = self.repo.create_session(&session).await.map_err(|e| {
            error!(session_id = %session.id, operation = "create_session", error = %e, "creating session failed");
            CoordinatorError::persistence("create_session", e)
        })?;

        let session_id = stored.id;
        info!(%session_id, visitor = %stored.visitor.identity, "chat requested");
        self.live.insert(session_id, LiveSession::new(stored));
        Ok(session_id)
    }

    /// Move a waiting session onto `connection_id`.
    ///
    /// `live` is a working copy. It replaces the live entry only once the
    /// store has the new connection.
    async fn resume_waiting(
        &mut self,
        mut updated: LiveSession,
        connection_id: ConnectionId,
    ) -> Result<Uuid, CoordinatorError> {
        let session_id = updated.session().id;
        let previous_conn = updated.session().visitor.connection_id;
        updated
            .resume(connection_id)
            .map_err(|_| CoordinatorError::NotFound(session_id))?;

        self.repo
            .update_visitor_connection(&session_id, &connection_id, updated.session().updated_at)
            .await
            .map_err(|e| {
                error!(%session_id, operation = "resume_session", error = %e, "resuming session failed");
                CoordinatorError::persistence("resume_session", e)
            })?;

        if previous_conn != connection_id {
            self.router.unsubscribe(session_id, previous_conn);
            self.presence.clear_session(previous_conn, session_id);
        }
        self.live.insert(session_id, updated);
        info!(%session_id, %connection_id, "waiting session resumed");
        Ok(session_id)
    }

    /// Close a live session, notify parties, and drop it from memory.
    ///
    /// `gone` is a connection that must not be notified because it already
    /// disconnected. Store failures are logged; teardown always completes.
    async fn close_session(
        &mut self,
        session_id: Uuid,
        reason: EndReason,
        notice: Option<String>,
        gone: Option<ConnectionId>,
    ) -> Option<ChatSession> {
        let mut live = self.live.remove(&session_id)?;
        let notice_entry = notice.and_then(|text| live.note(text).ok());
        if live.close(reason).is_err() {
            return None;
        }
        let session = live.into_session();

        if let Some(entry) = &notice_entry {
            if let Err(e) = self.repo.append_entry(&session_id, entry).await {
                error!(%session_id, operation = "append_entry", error = %e, "failed to store closing notice");
            }
        }
        if let Err(e) = self
            .repo
            .update_status(&session_id, SessionStatus::Closed, Some(reason), session.updated_at)
            .await
        {
            error!(%session_id, operation = "update_status", error = %e, "failed to store session close, will retry");
            self.unsynced_closes
                .insert(session_id, (reason, session.updated_at));
        }

        self.router.publish(
            Target::Topic {
                session_id,
                except: gone,
            },
            ServerEvent::SessionEnded { session_id, reason },
        );
        for conn in session.participant_connections() {
            self.presence.clear_session(conn, session_id);
        }
        self.router.close_topic(session_id);
        self.router.publish(
            Target::AgentGroup { except: None },
            ServerEvent::SessionClosed { session_id },
        );

        info!(%session_id, %reason, "session closed");
        Some(session)
    }

    /// Retry store writes for sessions already closed in memory.
    async fn sync_unsynced_closes(&mut self) {
        if self.unsynced_closes.is_empty() {
            return;
        }
        let pending: Vec<(Uuid, (EndReason, DateTime<Utc>))> =
            self.unsynced_closes.iter().map(|(id, v)| (*id, *v)).collect();
        for (session_id, (reason, closed_at)) in pending {
            match self
                .repo
                .update_status(&session_id, SessionStatus::Closed, Some(reason), closed_at)
                .await
            {
                Ok(()) => {
                    self.unsynced_closes.remove(&session_id);
                    info!(%session_id, "stored deferred session close");
                }
                Err(e) => {
                    warn!(%session_id, operation = "update_status", error = %e, "session close still not stored");
                }
            }
        }
    }

    fn snapshot(&self, session_id: &Uuid) -> Result<SessionSnapshot, CoordinatorError> {
        self.live
            .get(session_id)
            .map(|l| l.session().snapshot())
            .ok_or(CoordinatorError::NotFound(*session_id))
    }

    async fn resolve_name(&self, identity: &UserRef) -> String {
        match self.users.display_name(identity).await {
            Ok(Some(name)) => name,
            Ok(None) => identity.to_string(),
            Err(e) => {
                warn!(user = %identity, error = %e, "display name lookup failed");
                identity.to_string()
            }
        }
    }

    fn require_role(
        &self,
        connection_id: ConnectionId,
        role: ConnectionRole,
    ) -> Result<(), CoordinatorError> {
        match self.presence.role_of(connection_id) {
            Some(actual) if actual == role => Ok(()),
            _ => Err(CoordinatorError::Forbidden(format!("{role} connections only"))),
        }
    }

    /// The connection must have `role` and speak for `identity`.
    fn require_identity(
        &self,
        connection_id: ConnectionId,
        role: ConnectionRole,
        identity: &UserRef,
    ) -> Result<(), CoordinatorError> {
        let Some(entry) = self.presence.get(connection_id) else {
            return Err(CoordinatorError::Forbidden("unknown connection".to_string()));
        };
        if entry.role != role {
            return Err(CoordinatorError::Forbidden(format!("{role} connections only")));
        }
        if entry.identity != *identity {
            return Err(CoordinatorError::Forbidden(
                "identity does not match connection".to_string(),
            ));
        }
        Ok(())
    }

    /// A connection belongs to at most one live session at a time.
    fn ensure_not_busy(
        &self,
        connection_id: ConnectionId,
        allowed: Option<Uuid>,
    ) -> Result<(), CoordinatorError> {
        let bound = self
            .presence
            .get(connection_id)
            .and_then(|entry| entry.session_id);
        match bound {
            Some(current) if Some(current) != allowed && self.live.contains_key(&current) => {
                Err(CoordinatorError::ConnectionBusy(current))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use livedesk_types::chat::SenderKind;

    use super::*;
    use crate::chat::memory::InMemoryChatRepository;
    use crate::directory::StaticUserDirectory;

    type TestCoordinator = SessionCoordinator<InMemoryChatRepository, StaticUserDirectory>;

    fn setup() -> (TestCoordinator, InMemoryChatRepository) {
        let repo = InMemoryChatRepository::new();
        let users = StaticUserDirectory::new([("a-bob", "Bob"), ("a-carol", "Carol")]);
        let coordinator = SessionCoordinator::new(repo.clone(), users, Arc::new(EventRouter::new(64)));
        (coordinator, repo)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    struct Conn {
        id: ConnectionId,
        rx: mpsc::Receiver<ServerEvent>,
    }

    fn connect(c: &mut TestCoordinator, role: ConnectionRole, user: &str) -> Conn {
        let id = ConnectionId::new();
        let rx = c.connect(id, role, UserRef::new(user));
        Conn { id, rx }
    }

    /// Alice requests a chat and Bob takes it; queues are drained afterwards.
    async fn active_session(c: &mut TestCoordinator) -> (Uuid, Conn, Conn, Conn) {
        let mut alice = connect(c, ConnectionRole::Visitor, "u1");
        let mut bob = connect(c, ConnectionRole::Agent, "a-bob");
        let mut carol = connect(c, ConnectionRole::Agent, "a-carol");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        c.assign_agent(bob.id, snapshot.id, UserRef::new("a-bob"))
            .await
            .unwrap();
        drain(&mut alice.rx);
        drain(&mut bob.rx);
        drain(&mut carol.rx);
        (snapshot.id, alice, bob, carol)
    }

    #[tokio::test]
    async fn scenario_a_request_creates_waiting_session() {
        let (mut c, repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let mut bob = connect(&mut c, ConnectionRole::Agent, "a-bob");

        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        assert_eq!(snapshot.status, SessionStatus::Waiting);
        assert!(snapshot.transcript.is_empty());
        assert!(snapshot.agent.is_none());
        assert_eq!(repo.count_with_status(SessionStatus::Waiting), 1);

        let events = drain(&mut bob.rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::NewWaitingRequest { session }] if session.id == snapshot.id
        ));
    }

    #[tokio::test]
    async fn prior_history_seeds_transcript() {
        let (mut c, _repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let prior = vec![
            PriorEntry {
                sender_kind: SenderKind::Visitor,
                text: "my invoice is wrong".to_string(),
                timestamp: None,
            },
            PriorEntry {
                sender_kind: SenderKind::System,
                text: "Let me find a human for you.".to_string(),
                timestamp: None,
            },
        ];

        let snapshot = c.request_chat(alice.id, UserRef::new("u1"), prior).await.unwrap();
        assert_eq!(snapshot.transcript.len(), 2);
        assert_eq!(snapshot.transcript[0].text, "my invoice is wrong");
    }

    #[tokio::test]
    async fn p1_repeated_request_resumes_waiting_session() {
        let (mut c, repo) = setup();
        let first_tab = connect(&mut c, ConnectionRole::Visitor, "u1");
        let first = c
            .request_chat(first_tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        let second_tab = connect(&mut c, ConnectionRole::Visitor, "u1");
        let second = c
            .request_chat(second_tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.count_with_status(SessionStatus::Waiting), 1);
        let live = c.live_session(&first.id).unwrap();
        assert_eq!(live.visitor.connection_id, second_tab.id);
        assert_eq!(c.router().topic_members(first.id), vec![second_tab.id]);
    }

    #[tokio::test]
    async fn p1_resume_after_restart_uses_store() {
        let (mut c, repo) = setup();
        let tab = connect(&mut c, ConnectionRole::Visitor, "u1");
        let first = c
            .request_chat(tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        // Fresh coordinator over the same store, without recovery.
        let mut restarted = SessionCoordinator::new(
            repo.clone(),
            StaticUserDirectory::default(),
            Arc::new(EventRouter::new(8)),
        );
        let tab = connect(&mut restarted, ConnectionRole::Visitor, "u1");
        let second = restarted
            .request_chat(tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.count_with_status(SessionStatus::Waiting), 1);
    }

    #[tokio::test]
    async fn scenario_b_agent_join_greets_both_sides() {
        let (mut c, repo) = setup();
        let mut alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let mut bob = connect(&mut c, ConnectionRole::Agent, "a-bob");
        let mut carol = connect(&mut c, ConnectionRole::Agent, "a-carol");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        drain(&mut alice.rx);
        drain(&mut bob.rx);
        drain(&mut carol.rx);

        let assigned = c
            .assign_agent(bob.id, snapshot.id, UserRef::new("a-bob"))
            .await
            .unwrap();

        assert_eq!(assigned.status, SessionStatus::Active);
        assert_eq!(assigned.agent_name.as_deref(), Some("Bob"));
        assert_eq!(assigned.transcript.len(), 1);
        assert_eq!(assigned.transcript[0].sender_kind, SenderKind::System);
        assert_eq!(assigned.transcript[0].text, "Hi! You are now connected with Bob.");

        match drain(&mut alice.rx).as_slice() {
            [ServerEvent::AgentJoinedNotice { entry, .. }] => {
                assert_eq!(entry, &assigned.transcript[0]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(matches!(
            drain(&mut carol.rx).as_slice(),
            [ServerEvent::SessionTaken { agent_name, .. }] if agent_name == "Bob"
        ));
        assert!(drain(&mut bob.rx).is_empty());

        let stored = repo.get_session(&snapshot.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.agent_connection_id(), Some(bob.id));
        assert_eq!(stored.transcript.len(), 1);
    }

    #[tokio::test]
    async fn unknown_agent_name_falls_back_to_identity() {
        let (mut c, _repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let dave = connect(&mut c, ConnectionRole::Agent, "a-dave");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        let assigned = c
            .assign_agent(dave.id, snapshot.id, UserRef::new("a-dave"))
            .await
            .unwrap();
        assert_eq!(assigned.agent_name.as_deref(), Some("a-dave"));
    }

    #[tokio::test]
    async fn scenario_c_message_relayed_to_agent() {
        let (mut c, repo) = setup();
        let (session_id, alice, mut bob, _carol) = active_session(&mut c).await;

        let entry = c
            .post_message(alice.id, session_id, "Hello")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.sender_kind, SenderKind::Visitor);

        match drain(&mut bob.rx).as_slice() {
            [ServerEvent::MessageReceived { entry, .. }] => {
                assert_eq!(entry.sender_kind, SenderKind::Visitor);
                assert_eq!(entry.text, "Hello");
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(c.live_session(&session_id).unwrap().transcript.len(), 2);
        let stored = repo.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.transcript.len(), 2);
    }

    #[tokio::test]
    async fn message_from_non_participant_is_rejected() {
        let (mut c, _repo) = setup();
        let (session_id, _alice, _bob, carol) = active_session(&mut c).await;

        let err = c
            .post_message(carol.id, session_id, "let me in")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotParticipant(id) if id == session_id));
        assert_eq!(c.live_session(&session_id).unwrap().transcript.len(), 1);
    }

    #[tokio::test]
    async fn message_while_waiting_is_dropped() {
        let (mut c, _repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        let posted = c.post_message(alice.id, snapshot.id, "anyone?").await.unwrap();
        assert!(posted.is_none());
        assert!(c.live_session(&snapshot.id).unwrap().transcript.is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_still_relays_message() {
        let (mut c, repo) = setup();
        let (session_id, alice, mut bob, _carol) = active_session(&mut c).await;

        repo.set_fail_writes(true);
        let entry = c.post_message(alice.id, session_id, "Hello").await.unwrap();
        assert!(entry.is_some());
        assert!(matches!(
            drain(&mut bob.rx).as_slice(),
            [ServerEvent::MessageReceived { .. }]
        ));

        repo.set_fail_writes(false);
        let stored = repo.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.transcript.len(), 1);
        assert_eq!(c.live_session(&session_id).unwrap().transcript.len(), 2);
    }

    #[tokio::test]
    async fn typing_relayed_to_counterpart_only() {
        let (mut c, _repo) = setup();
        let (session_id, mut alice, mut bob, mut carol) = active_session(&mut c).await;

        c.set_typing(bob.id, session_id, true).unwrap();
        c.set_typing(bob.id, session_id, false).unwrap();

        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::TypingStart { .. }, ServerEvent::TypingStop { .. }]
        ));
        assert!(drain(&mut bob.rx).is_empty());
        assert!(drain(&mut carol.rx).is_empty());
        assert!(c.set_typing(carol.id, session_id, true).is_err());
    }

    #[tokio::test]
    async fn scenario_d_agent_disconnect_ends_session() {
        let (mut c, repo) = setup();
        let (session_id, mut alice, bob, mut carol) = active_session(&mut c).await;

        c.handle_disconnect(bob.id).await;

        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::SessionEnded { reason: EndReason::AgentDisconnected, .. }]
        ));
        assert!(matches!(
            drain(&mut carol.rx).as_slice(),
            [ServerEvent::SessionClosed { .. }]
        ));
        assert!(c.live_session(&session_id).is_none());

        // P5: the final entry names the agent as the side that left.
        let stored = repo.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Closed);
        assert_eq!(stored.closed_reason, Some(EndReason::AgentDisconnected));
        let last = stored.transcript.last().unwrap();
        assert_eq!(last.sender_kind, SenderKind::System);
        assert_eq!(last.text, "The agent has disconnected. This chat has ended.");
        assert!(c.router().topic_members(session_id).is_empty());
    }

    #[tokio::test]
    async fn visitor_disconnect_is_attributed_to_visitor() {
        let (mut c, repo) = setup();
        let (session_id, alice, mut bob, _carol) = active_session(&mut c).await;

        c.handle_disconnect(alice.id).await;

        assert!(matches!(
            drain(&mut bob.rx).as_slice(),
            [ServerEvent::SessionEnded { reason: EndReason::VisitorDisconnected, .. }, ServerEvent::SessionClosed { .. }]
        ));
        let stored = repo.get_session(&session_id).await.unwrap().unwrap();
        assert!(stored.transcript.last().unwrap().text.starts_with("The visitor"));
    }

    #[tokio::test]
    async fn waiting_visitor_disconnect_keeps_session_resumable() {
        let (mut c, repo) = setup();
        let tab = connect(&mut c, ConnectionRole::Visitor, "u1");
        let snapshot = c
            .request_chat(tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        c.handle_disconnect(tab.id).await;
        assert_eq!(
            c.live_session(&snapshot.id).map(|s| s.status),
            Some(SessionStatus::Waiting)
        );
        assert_eq!(repo.count_with_status(SessionStatus::Waiting), 1);

        let reload = connect(&mut c, ConnectionRole::Visitor, "u1");
        let resumed = c
            .request_chat(reload.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        assert_eq!(resumed.id, snapshot.id);
    }

    #[tokio::test]
    async fn scenario_e_late_join_is_rejected() {
        let (mut c, _repo) = setup();
        let (session_id, _alice, bob, carol) = active_session(&mut c).await;

        let err = c
            .assign_agent(carol.id, session_id, UserRef::new("a-carol"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyAssigned(_)));
        assert_eq!(
            c.live_session(&session_id).unwrap().agent_connection_id(),
            Some(bob.id)
        );
    }

    #[tokio::test]
    async fn p2_store_conflict_rolls_back_assignment() {
        let (mut c, repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let bob = connect(&mut c, ConnectionRole::Agent, "a-bob");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        // Another process took the row behind our back.
        let intruder = AgentRef {
            identity: UserRef::new("a-zed"),
            connection_id: ConnectionId::new(),
            display_name: "Zed".to_string(),
        };
        assert!(repo
            .assign_agent(&snapshot.id, &intruder, &ChatEntry::system("hi"))
            .await
            .unwrap());

        let err = c
            .assign_agent(bob.id, snapshot.id, UserRef::new("a-bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyAssigned(_)));
        let live = c.live_session(&snapshot.id).unwrap();
        assert_eq!(live.status, SessionStatus::Waiting);
        assert!(live.agent.is_none());
    }

    #[tokio::test]
    async fn assignment_store_failure_is_reported_and_rolled_back() {
        let (mut c, repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let mut bob = connect(&mut c, ConnectionRole::Agent, "a-bob");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        drain(&mut bob.rx);

        repo.set_fail_writes(true);
        c.dispatch(
            bob.id,
            ClientEvent::AgentJoinSession {
                session_id: snapshot.id,
                agent_identity: UserRef::new("a-bob"),
            },
        )
        .await;

        assert!(matches!(
            drain(&mut bob.rx).as_slice(),
            [ServerEvent::Error { code, .. }] if code == "PERSISTENCE_ERROR"
        ));
        assert_eq!(
            c.live_session(&snapshot.id).map(|s| s.status),
            Some(SessionStatus::Waiting)
        );
    }

    #[tokio::test]
    async fn p4_no_message_after_close() {
        let (mut c, repo) = setup();
        let (session_id, alice, mut bob, _carol) = active_session(&mut c).await;

        c.end_chat(alice.id, session_id).await.unwrap();
        drain(&mut bob.rx);
        let before = repo.get_session(&session_id).await.unwrap().unwrap();

        let posted = c.post_message(alice.id, session_id, "one more thing").await.unwrap();
        assert!(posted.is_none());
        assert!(drain(&mut bob.rx).is_empty());
        let after = repo.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(before.transcript, after.transcript);
        assert_eq!(after.closed_reason, Some(EndReason::EndedByVisitor));
    }

    #[tokio::test]
    async fn end_chat_notifies_other_side() {
        let (mut c, _repo) = setup();
        let (session_id, mut alice, bob, mut carol) = active_session(&mut c).await;

        c.end_chat(bob.id, session_id).await.unwrap();

        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::SessionEnded { reason: EndReason::EndedByAgent, .. }]
        ));
        assert!(matches!(
            drain(&mut carol.rx).as_slice(),
            [ServerEvent::SessionClosed { .. }]
        ));
        assert!(c.end_chat(bob.id, session_id).await.is_err());
    }

    #[tokio::test]
    async fn agent_may_dismiss_waiting_request() {
        let (mut c, repo) = setup();
        let mut alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let bob = connect(&mut c, ConnectionRole::Agent, "a-bob");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        drain(&mut alice.rx);

        c.end_chat(bob.id, snapshot.id).await.unwrap();

        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::SessionEnded { .. }]
        ));
        assert_eq!(repo.count_with_status(SessionStatus::Closed), 1);
    }

    #[tokio::test]
    async fn p3_transcript_observations_are_prefixes() {
        let (mut c, repo) = setup();
        let (session_id, alice, bob, _carol) = active_session(&mut c).await;
        let mut observed = vec![c.live_session(&session_id).unwrap().transcript.clone()];

        for (conn, text) in [(alice.id, "Hello"), (bob.id, "Hi there"), (alice.id, "Thanks")] {
            c.post_message(conn, session_id, text).await.unwrap();
            observed.push(c.live_session(&session_id).unwrap().transcript.clone());
        }
        c.handle_disconnect(bob.id).await;
        observed.push(repo.get_session(&session_id).await.unwrap().unwrap().transcript);

        for pair in observed.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test]
    async fn list_waiting_is_oldest_first() {
        let (mut c, _repo) = setup();
        let first = connect(&mut c, ConnectionRole::Visitor, "u1");
        let second = connect(&mut c, ConnectionRole::Visitor, "u2");
        let a = c.request_chat(first.id, UserRef::new("u1"), Vec::new()).await.unwrap();
        let b = c.request_chat(second.id, UserRef::new("u2"), Vec::new()).await.unwrap();

        let waiting: Vec<Uuid> = c.list_waiting().into_iter().map(|s| s.id).collect();
        assert_eq!(waiting, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn expiry_closes_stale_waiting_sessions() {
        let (c, repo) = setup();
        let mut c = c.with_waiting_ttl(Some(Duration::from_secs(60)));
        let mut alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        drain(&mut alice.rx);

        assert!(c.expire_waiting(Utc::now()).await.is_empty());

        let later = Utc::now() + TimeDelta::seconds(120);
        assert_eq!(c.expire_waiting(later).await, vec![snapshot.id]);
        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::SessionEnded { reason: EndReason::Expired, .. }]
        ));
        let stored = repo.get_session(&snapshot.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Closed);
        assert_eq!(stored.transcript.last().unwrap().text, EXPIRED_NOTICE);
    }

    #[tokio::test]
    async fn expiry_disabled_without_ttl() {
        let (mut c, _repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        c.request_chat(alice.id, UserRef::new("u1"), Vec::new()).await.unwrap();

        let far_future = Utc::now() + TimeDelta::days(30);
        assert!(c.expire_waiting(far_future).await.is_empty());
        assert_eq!(c.list_waiting().len(), 1);
    }

    #[tokio::test]
    async fn recover_resumes_waiting_and_closes_active() {
        let (mut c, repo) = setup();
        let (active_id, _alice, _bob, _carol) = active_session(&mut c).await;
        let waiting_tab = connect(&mut c, ConnectionRole::Visitor, "u2");
        let waiting = c
            .request_chat(waiting_tab.id, UserRef::new("u2"), Vec::new())
            .await
            .unwrap();

        let mut restarted = SessionCoordinator::new(
            repo.clone(),
            StaticUserDirectory::default(),
            Arc::new(EventRouter::new(8)),
        );
        let report = restarted.recover().await.unwrap();

        assert_eq!(report, RecoveryReport { resumed: 1, interrupted: 1 });
        assert_eq!(restarted.list_waiting()[0].id, waiting.id);
        let closed = repo.get_session(&active_id).await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert_eq!(closed.closed_reason, Some(EndReason::ServerRestart));
        assert_eq!(closed.transcript.last().unwrap().text, RESTART_NOTICE);
    }

    #[tokio::test]
    async fn dispatch_rejects_invalid_events() {
        let (mut c, _repo) = setup();
        let mut alice = connect(&mut c, ConnectionRole::Visitor, "u1");

        c.dispatch(
            alice.id,
            ClientEvent::PostMessage {
                session_id: Uuid::now_v7(),
                text: "   ".to_string(),
            },
        )
        .await;
        c.dispatch(
            alice.id,
            ClientEvent::RequestChat {
                visitor_identity: UserRef::new(""),
                prior_history: Vec::new(),
            },
        )
        .await;

        let events = drain(&mut alice.rx);
        assert_eq!(events.len(), 2);
        for event in events {
            assert!(matches!(event, ServerEvent::Error { code, .. } if code == "VALIDATION_ERROR"));
        }
        assert_eq!(c.live_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_enforces_roles_and_identity() {
        let (mut c, _repo) = setup();
        let mut alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let mut bob = connect(&mut c, ConnectionRole::Agent, "a-bob");

        c.dispatch(
            alice.id,
            ClientEvent::RequestChat {
                visitor_identity: UserRef::new("u-mallory"),
                prior_history: Vec::new(),
            },
        )
        .await;
        c.dispatch(bob.id, ClientEvent::RequestChat {
            visitor_identity: UserRef::new("a-bob"),
            prior_history: Vec::new(),
        })
        .await;
        c.dispatch(alice.id, ClientEvent::ListWaiting).await;

        for event in drain(&mut alice.rx).into_iter().chain(drain(&mut bob.rx)) {
            assert!(matches!(event, ServerEvent::Error { code, .. } if code == "FORBIDDEN"));
        }
        assert_eq!(c.live_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_join_on_missing_session_is_unavailable() {
        let (mut c, _repo) = setup();
        let mut bob = connect(&mut c, ConnectionRole::Agent, "a-bob");
        let missing = Uuid::now_v7();

        c.dispatch(
            bob.id,
            ClientEvent::AgentJoinSession {
                session_id: missing,
                agent_identity: UserRef::new("a-bob"),
            },
        )
        .await;

        assert!(matches!(
            drain(&mut bob.rx).as_slice(),
            [ServerEvent::SessionUnavailable {
                session_id,
                reason: UnavailableReason::SessionNoLongerAvailable,
            }] if *session_id == missing
        ));
    }

    #[tokio::test]
    async fn dispatch_ping_and_unknown_connection() {
        let (mut c, _repo) = setup();
        let mut alice = connect(&mut c, ConnectionRole::Visitor, "u1");

        c.dispatch(alice.id, ClientEvent::Ping).await;
        assert!(matches!(drain(&mut alice.rx).as_slice(), [ServerEvent::Pong]));

        // Events from connections that never registered are ignored.
        c.dispatch(ConnectionId::new(), ClientEvent::Ping).await;
        assert!(drain(&mut alice.rx).is_empty());
    }

    #[tokio::test]
    async fn busy_agent_cannot_take_second_session() {
        let (mut c, _repo) = setup();
        let (_session_id, _alice, bob, _carol) = active_session(&mut c).await;
        let other = connect(&mut c, ConnectionRole::Visitor, "u2");
        let second = c
            .request_chat(other.id, UserRef::new("u2"), Vec::new())
            .await
            .unwrap();

        let err = c
            .assign_agent(bob.id, second.id, UserRef::new("a-bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ConnectionBusy(_)));
    }

    #[tokio::test]
    async fn dismissed_session_with_failed_close_write_is_not_resumed() {
        let (mut c, repo) = setup();
        let mut alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let bob = connect(&mut c, ConnectionRole::Agent, "a-bob");
        let first = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        drain(&mut alice.rx);

        repo.set_fail_writes(true);
        c.end_chat(bob.id, first.id).await.unwrap();
        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::SessionEnded { reason: EndReason::EndedByAgent, .. }]
        ));
        let stale = repo.get_session(&first.id).await.unwrap().unwrap();
        assert_eq!(stale.status, SessionStatus::Waiting);

        repo.set_fail_writes(false);
        let tab = connect(&mut c, ConnectionRole::Visitor, "u1");
        let second = c
            .request_chat(tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        assert_ne!(second.id, first.id);
        assert_eq!(second.status, SessionStatus::Waiting);
        let closed = repo.get_session(&first.id).await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert_eq!(closed.closed_reason, Some(EndReason::EndedByAgent));
        assert!(c.live_session(&first.id).is_none());
    }

    #[tokio::test]
    async fn sweep_retries_close_writes_until_stored() {
        let (mut c, repo) = setup();
        let alice = connect(&mut c, ConnectionRole::Visitor, "u1");
        let bob = connect(&mut c, ConnectionRole::Agent, "a-bob");
        let snapshot = c
            .request_chat(alice.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        repo.set_fail_writes(true);
        c.end_chat(bob.id, snapshot.id).await.unwrap();
        c.expire_waiting(Utc::now()).await;
        assert_eq!(repo.count_with_status(SessionStatus::Closed), 0);

        repo.set_fail_writes(false);
        c.expire_waiting(Utc::now()).await;
        assert_eq!(repo.count_with_status(SessionStatus::Closed), 1);
        assert_eq!(repo.count_with_status(SessionStatus::Waiting), 0);
    }

    #[tokio::test]
    async fn failed_resume_from_store_commits_nothing() {
        let (mut c, repo) = setup();
        let tab = connect(&mut c, ConnectionRole::Visitor, "u1");
        let first = c
            .request_chat(tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();

        let mut restarted = SessionCoordinator::new(
            repo.clone(),
            StaticUserDirectory::default(),
            Arc::new(EventRouter::new(8)),
        );
        let tab = connect(&mut restarted, ConnectionRole::Visitor, "u1");

        repo.set_fail_writes(true);
        let err = restarted
            .request_chat(tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_ERROR");
        assert_eq!(restarted.live_count(), 0);
        assert!(restarted.list_waiting().is_empty());
        assert!(restarted.router().topic_members(first.id).is_empty());

        repo.set_fail_writes(false);
        let resumed = restarted
            .request_chat(tab.id, UserRef::new("u1"), Vec::new())
            .await
            .unwrap();
        assert_eq!(resumed.id, first.id);
        assert_eq!(restarted.live_count(), 1);
    }

    #[tokio::test]
    async fn relay_goes_to_session_topic_members() {
        let (mut c, _repo) = setup();
        let (session_id, mut alice, mut bob, _carol) = active_session(&mut c).await;
        let mut members = c.router().topic_members(session_id);
        members.sort();
        let mut expected = vec![alice.id, bob.id];
        expected.sort();
        assert_eq!(members, expected);

        c.router().unsubscribe(session_id, bob.id);
        c.post_message(alice.id, session_id, "anyone there?").await.unwrap();
        c.set_typing(alice.id, session_id, true).unwrap();
        assert!(drain(&mut bob.rx).is_empty());

        c.end_chat(alice.id, session_id).await.unwrap();
        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::SessionEnded { .. }]
        ));
        assert!(drain(&mut bob.rx).iter().all(|e| matches!(e, ServerEvent::SessionClosed { .. })));
        assert!(c.router().topic_members(session_id).is_empty());
    }

    #[tokio::test]
    async fn disconnect_of_unknown_connection_is_noop() {
        let (mut c, _repo) = setup();
        c.handle_disconnect(ConnectionId::new()).await;
        assert!(c.presence().is_empty());
    }
}
