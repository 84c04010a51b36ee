//! Signaling state machine.
//!
//! All registry state lives behind one lock. Each operation validates the
//! sender's role, mutates the registries and queues its outbound messages
//! through the [`Outbox`] before the lock is released, so every recipient
//! sees relays in the order the router processed them. Recipients whose
//! queue rejected a message are disconnected once the lock is free.

use crate::error::{Result, SignalingError};
use crate::signaling::connection_registry::{ConnectionRegistry, Role};
use crate::signaling::ice_buffer::{Direction, IceCandidateBuffer, PairKey, PendingCandidate};
use crate::signaling::outbox::{DeliveryError, Outbox};
use crate::signaling::session_code::{MAX_CODE_ATTEMPTS, SessionCodeSource};
use crate::signaling::session_registry::{Session, SessionRegistry};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use zlremote_protocol::{ClientMessage, ConnectionId, ServerMessage, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryCounts {
    pub connections: usize,
    pub sessions: usize,
    pub pending_candidates: usize,
}

/// Outbound messages produced while the registry lock is held
struct Deliveries<'a> {
    outbox: &'a dyn Outbox,
    failed: Vec<ConnectionId>,
}

impl<'a> Deliveries<'a> {
    fn new(outbox: &'a dyn Outbox) -> Self {
        Self {
            outbox,
            failed: Vec::new(),
        }
    }

    fn send(&mut self, to: ConnectionId, message: &ServerMessage) {
        match self.outbox.try_deliver(to, message) {
            Ok(()) => {}
            Err(DeliveryError::Unknown) => {
                tracing::debug!(
                    connection_id = %to,
                    error = %SignalingError::RecipientUnavailable(to),
                    "Dropping message"
                );
            }
            Err(e) => {
                tracing::warn!(connection_id = %to, error = %e, "Delivery failed");
                if !self.failed.contains(&to) {
                    self.failed.push(to);
                }
            }
        }
    }

    fn flush(&mut self, pending: Vec<PendingCandidate>) {
        let now = Instant::now();
        for queued in pending {
            tracing::trace!(
                recipient = %queued.recipient,
                waited_ms = queued.waited(now).as_millis() as u64,
                "Releasing buffered candidate"
            );
            self.send(
                queued.recipient,
                &ServerMessage::IceCandidate {
                    candidate: queued.candidate,
                    sender_id: queued.sender,
                },
            );
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: ConnectionRegistry,
    sessions: SessionRegistry,
    candidates: IceCandidateBuffer,
}

impl RegistryState {
    fn role(&self, conn: ConnectionId) -> Result<Role> {
        self.connections
            .get(&conn)
            .map(|c| c.role)
            .ok_or(SignalingError::UnknownConnection(conn))
    }

    fn hosting(&self, conn: ConnectionId) -> Result<SessionId> {
        self.connections
            .get(&conn)
            .ok_or(SignalingError::UnknownConnection(conn))?
            .hosted_session()
            .cloned()
            .ok_or(SignalingError::UnauthorizedRelay("only a host may send this"))
    }

    /// Session and host of a viewer
    fn viewing(&self, conn: ConnectionId) -> Result<(SessionId, ConnectionId)> {
        let session_id = self
            .connections
            .get(&conn)
            .ok_or(SignalingError::UnknownConnection(conn))?
            .viewed_session()
            .ok_or(SignalingError::UnauthorizedRelay("only a viewer may send this"))?;
        let session = self
            .sessions
            .get(session_id)
            .ok_or(SignalingError::SessionNotFound)?;
        Ok((session.id.clone(), session.host))
    }

    /// Viewers a host message should reach: all of them, or one named viewer
    fn host_targets(
        &self,
        session_id: &SessionId,
        target: Option<ConnectionId>,
    ) -> Result<Vec<ConnectionId>> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(SignalingError::SessionNotFound)?;
        match target {
            Some(viewer) if session.viewers.contains(&viewer) => Ok(vec![viewer]),
            Some(_) => Err(SignalingError::UnauthorizedRelay(
                "target viewer is not in this session",
            )),
            None => Ok(session.viewers.iter().copied().collect()),
        }
    }

    fn allocate_session_id(&self, codes: &dyn SessionCodeSource) -> Result<SessionId> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = codes.next_code();
            if !self.sessions.contains(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!(session_id = %candidate, "Session code collision, retrying");
        }
        Err(SignalingError::SessionIdExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    fn register_host(
        &mut self,
        conn: ConnectionId,
        password: Option<String>,
        device_info: Option<Value>,
        codes: &dyn SessionCodeSource,
        out: &mut Deliveries<'_>,
    ) -> Result<SessionId> {
        self.role(conn)?;
        let session_id = self.allocate_session_id(codes)?;

        self.detach(conn, out);

        let password = password.filter(|p| !p.is_empty());
        let protected = password.is_some();
        self.sessions.insert(Session::new(
            session_id.clone(),
            conn,
            password,
            device_info,
        ));
        self.connections.assign(&conn, Role::Host, session_id.clone());

        out.send(
            conn,
            &ServerMessage::HostRegistered {
                session_id: session_id.clone(),
            },
        );
        tracing::info!(
            session_id = %session_id,
            host = %conn,
            protected,
            "Session registered"
        );
        Ok(session_id)
    }

    fn connect_to_host(
        &mut self,
        conn: ConnectionId,
        session_id: SessionId,
        password: Option<String>,
        out: &mut Deliveries<'_>,
    ) -> Result<SessionId> {
        let already_viewing = self
            .connections
            .get(&conn)
            .ok_or(SignalingError::UnknownConnection(conn))?
            .viewed_session()
            == Some(&session_id);

        let session = self
            .sessions
            .get(&session_id)
            .ok_or(SignalingError::SessionNotFound)?;
        if !session.accepts(password.as_deref()) {
            return Err(SignalingError::InvalidPassword);
        }
        if session.host == conn {
            return Err(SignalingError::UnauthorizedRelay(
                "a host cannot join its own session",
            ));
        }
        let host = session.host;

        if already_viewing {
            out.send(
                conn,
                &ServerMessage::ConnectedToHost {
                    session_id: session_id.clone(),
                },
            );
            return Ok(session_id);
        }

        self.detach(conn, out);
        self.sessions.add_viewer(&session_id, conn);
        self.connections.assign(&conn, Role::Viewer, session_id.clone());

        out.send(host, &ServerMessage::ViewerJoined { viewer_id: conn });
        out.send(
            conn,
            &ServerMessage::ConnectedToHost {
                session_id: session_id.clone(),
            },
        );
        tracing::info!(session_id = %session_id, viewer = %conn, "Viewer joined");
        Ok(session_id)
    }

    fn relay_offer(
        &mut self,
        conn: ConnectionId,
        offer: Value,
        target: Option<ConnectionId>,
        out: &mut Deliveries<'_>,
    ) -> Result<usize> {
        let session_id = self.hosting(conn)?;
        let viewers = self.host_targets(&session_id, target)?;

        let message = ServerMessage::WebrtcOffer {
            offer,
            host_id: conn,
        };
        for viewer in &viewers {
            out.send(*viewer, &message);
            let pending = self
                .candidates
                .mark_ready(PairKey::new(session_id.clone(), *viewer), Direction::ToViewer);
            out.flush(pending);
        }

        tracing::debug!(session_id = %session_id, recipients = viewers.len(), "Relayed offer");
        Ok(viewers.len())
    }

    fn relay_answer(
        &mut self,
        conn: ConnectionId,
        answer: Value,
        out: &mut Deliveries<'_>,
    ) -> Result<()> {
        let (session_id, host) = self.viewing(conn)?;

        out.send(
            host,
            &ServerMessage::WebrtcAnswer {
                answer,
                viewer_id: conn,
            },
        );
        let pending = self
            .candidates
            .mark_ready(PairKey::new(session_id.clone(), conn), Direction::ToHost);
        let flushed = pending.len();
        out.flush(pending);

        tracing::debug!(session_id = %session_id, viewer = %conn, flushed, "Relayed answer");
        Ok(())
    }

    fn relay_ice_candidate(
        &mut self,
        conn: ConnectionId,
        candidate: Value,
        target: Option<ConnectionId>,
        out: &mut Deliveries<'_>,
    ) -> Result<()> {
        match self.role(conn)? {
            Role::Host => {
                let session_id = self.hosting(conn)?;
                for viewer in self.host_targets(&session_id, target)? {
                    self.route_candidate(
                        PairKey::new(session_id.clone(), viewer),
                        Direction::ToViewer,
                        viewer,
                        conn,
                        candidate.clone(),
                        out,
                    );
                }
            }
            Role::Viewer => {
                let (session_id, host) = self.viewing(conn)?;
                self.route_candidate(
                    PairKey::new(session_id, conn),
                    Direction::ToHost,
                    host,
                    conn,
                    candidate,
                    out,
                );
            }
            Role::Unassigned => {
                return Err(SignalingError::UnauthorizedRelay(
                    "candidates require a session",
                ));
            }
        }
        Ok(())
    }

    fn route_candidate(
        &mut self,
        key: PairKey,
        direction: Direction,
        recipient: ConnectionId,
        sender: ConnectionId,
        candidate: Value,
        out: &mut Deliveries<'_>,
    ) {
        if self.candidates.is_ready(&key, direction) {
            out.send(
                recipient,
                &ServerMessage::IceCandidate {
                    candidate,
                    sender_id: sender,
                },
            );
            return;
        }

        let session_id = key.session_id.clone();
        let queued = self.candidates.push(
            key,
            direction,
            PendingCandidate {
                recipient,
                sender,
                candidate,
                queued_at: Instant::now(),
            },
        );
        if queued {
            tracing::debug!(session_id = %session_id, sender = %sender, "Buffered ICE candidate");
        } else {
            tracing::warn!(
                session_id = %session_id,
                sender = %sender,
                "Candidate buffer full, dropping candidate"
            );
        }
    }

    fn relay_input_event(
        &mut self,
        conn: ConnectionId,
        data: Value,
        out: &mut Deliveries<'_>,
    ) -> Result<()> {
        let (_, host) = self.viewing(conn)?;
        out.send(
            host,
            &ServerMessage::InputEvent {
                data,
                viewer_id: conn,
            },
        );
        Ok(())
    }

    /// Leave whatever session the connection belongs to; the connection stays registered
    fn detach(&mut self, conn: ConnectionId, out: &mut Deliveries<'_>) {
        let Some(connection) = self.connections.get(&conn) else {
            return;
        };
        let role = connection.role;
        let Some(session_id) = connection.session.clone() else {
            return;
        };
        self.connections.clear_role(&conn);

        match role {
            Role::Host => self.close_session(&session_id, out),
            Role::Viewer => self.leave_session(&session_id, conn, out),
            Role::Unassigned => {}
        }
    }

    fn close_session(&mut self, session_id: &SessionId, out: &mut Deliveries<'_>) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        let discarded = self.candidates.remove_session(session_id);

        for viewer in &session.viewers {
            out.send(*viewer, &ServerMessage::HostDisconnected);
        }
        for viewer in &session.viewers {
            self.connections.clear_role(viewer);
        }

        tracing::info!(
            session_id = %session_id,
            host = %session.host,
            viewers = session.viewers.len(),
            discarded_candidates = discarded,
            "Session closed"
        );
    }

    fn leave_session(&mut self, session_id: &SessionId, viewer: ConnectionId, out: &mut Deliveries<'_>) {
        if !self.sessions.remove_viewer(session_id, &viewer) {
            return;
        }
        self.candidates
            .remove_pair(&PairKey::new(session_id.clone(), viewer));

        if let Some(session) = self.sessions.get(session_id) {
            out.send(session.host, &ServerMessage::ViewerLeft { viewer_id: viewer });
        }
        tracing::info!(session_id = %session_id, viewer = %viewer, "Viewer left");
    }

    fn disconnect(&mut self, conn: ConnectionId, out: &mut Deliveries<'_>) -> bool {
        if !self.connections.contains(&conn) {
            return false;
        }
        self.detach(conn, out);
        self.connections.remove(&conn);
        true
    }

    fn counts(&self) -> RegistryCounts {
        RegistryCounts {
            connections: self.connections.len(),
            sessions: self.sessions.len(),
            pending_candidates: self.candidates.len(),
        }
    }
}

pub struct SignalingRouter {
    state: Mutex<RegistryState>,
    outbox: Arc<dyn Outbox>,
    codes: Box<dyn SessionCodeSource>,
}

impl SignalingRouter {
    pub fn new(outbox: Arc<dyn Outbox>, codes: Box<dyn SessionCodeSource>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            outbox,
            codes,
        }
    }

    async fn with_state<R>(
        &self,
        f: impl FnOnce(&mut RegistryState, &mut Deliveries<'_>) -> R,
    ) -> R {
        let (result, failed) = {
            let mut state = self.state.lock().await;
            let mut out = Deliveries::new(self.outbox.as_ref());
            let result = f(&mut *state, &mut out);
            (result, out.failed)
        };
        self.drop_failed(failed).await;
        result
    }

    /// Disconnect recipients whose delivery failed, plus any that fail while
    /// their departure is being announced.
    async fn drop_failed(&self, mut failed: Vec<ConnectionId>) {
        while let Some(id) = failed.pop() {
            self.outbox.evict(id);

            let mut state = self.state.lock().await;
            let mut out = Deliveries::new(self.outbox.as_ref());
            if state.disconnect(id, &mut out) {
                tracing::info!(connection_id = %id, "Dropped unreachable connection");
            }
            failed.extend(out.failed);
        }
    }

    /// Register a new transport connection and tell it its id
    pub async fn connect(&self, conn: ConnectionId) {
        self.with_state(|state, out| {
            if state.connections.insert(conn, Instant::now()) {
                out.send(conn, &ServerMessage::ClientId { client_id: conn });
                tracing::info!(connection_id = %conn, "Client connected");
            }
        })
        .await
    }

    pub async fn register_host(
        &self,
        conn: ConnectionId,
        password: Option<String>,
        device_info: Option<Value>,
    ) -> Result<SessionId> {
        let codes = self.codes.as_ref();
        self.with_state(|state, out| state.register_host(conn, password, device_info, codes, out))
            .await
    }

    /// Join a session as a viewer. Repeating a successful join only repeats the reply.
    pub async fn connect_to_host(
        &self,
        conn: ConnectionId,
        session_id: SessionId,
        password: Option<String>,
    ) -> Result<SessionId> {
        self.with_state(|state, out| state.connect_to_host(conn, session_id, password, out))
            .await
    }

    pub async fn viewer_ready(&self, conn: ConnectionId) -> Result<()> {
        self.with_state(|state, out| -> Result<()> {
            let (_, host) = state.viewing(conn)?;
            out.send(host, &ServerMessage::ViewerReady { viewer_id: conn });
            Ok(())
        })
        .await
    }

    /// Returns the number of viewers the offer was sent to
    pub async fn relay_offer(
        &self,
        conn: ConnectionId,
        offer: Value,
        target: Option<ConnectionId>,
    ) -> Result<usize> {
        self.with_state(|state, out| state.relay_offer(conn, offer, target, out))
            .await
    }

    pub async fn relay_answer(&self, conn: ConnectionId, answer: Value) -> Result<()> {
        self.with_state(|state, out| state.relay_answer(conn, answer, out))
            .await
    }

    pub async fn relay_ice_candidate(
        &self,
        conn: ConnectionId,
        candidate: Value,
        target: Option<ConnectionId>,
    ) -> Result<()> {
        self.with_state(|state, out| state.relay_ice_candidate(conn, candidate, target, out))
            .await
    }

    pub async fn relay_input_event(&self, conn: ConnectionId, data: Value) -> Result<()> {
        self.with_state(|state, out| state.relay_input_event(conn, data, out))
            .await
    }

    /// End the host's session; the connection stays open and unassigned
    pub async fn stop_hosting(&self, conn: ConnectionId) -> Result<()> {
        self.with_state(|state, out| -> Result<()> {
            state.hosting(conn)?;
            state.detach(conn, out);
            Ok(())
        })
        .await
    }

    /// Forget a connection. Returns false if it was already gone.
    pub async fn disconnect(&self, conn: ConnectionId) -> bool {
        let removed = self
            .with_state(|state, out| state.disconnect(conn, out))
            .await;
        if removed {
            tracing::info!(connection_id = %conn, "Client disconnected");
        }
        removed
    }

    /// Record a liveness signal
    pub async fn touch(&self, conn: ConnectionId) -> bool {
        self.state
            .lock()
            .await
            .connections
            .touch(&conn, Instant::now())
    }

    /// Disconnect and evict every connection silent for longer than `timeout`
    pub async fn expire_stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        let expired = self
            .with_state(|state, out| {
                let stale = state.connections.stale(Instant::now(), timeout);
                for id in &stale {
                    state.disconnect(*id, out);
                }
                stale
            })
            .await;

        for id in &expired {
            tracing::warn!(connection_id = %id, "Connection expired");
            self.outbox.evict(*id);
        }
        expired
    }

    pub async fn counts(&self) -> RegistryCounts {
        self.state.lock().await.counts()
    }

    /// Route one decoded client message.
    ///
    /// Failures of the register and join flows are answered with an `error`
    /// frame; every other failure is logged and dropped.
    pub async fn dispatch(&self, conn: ConnectionId, message: ClientMessage) {
        let kind = message.kind();
        let answers_errors = matches!(
            message,
            ClientMessage::RegisterHost { .. } | ClientMessage::ConnectToHost { .. }
        );

        let result = match message {
            ClientMessage::RegisterHost {
                password,
                device_info,
            } => self
                .register_host(conn, password, device_info)
                .await
                .map(|_| ()),
            ClientMessage::ConnectToHost {
                session_id,
                password,
            } => self
                .connect_to_host(conn, session_id, password)
                .await
                .map(|_| ()),
            ClientMessage::ViewerReady => self.viewer_ready(conn).await,
            ClientMessage::WebrtcOffer { offer, viewer_id } => {
                self.relay_offer(conn, offer, viewer_id).await.map(|_| ())
            }
            ClientMessage::WebrtcAnswer { answer } => self.relay_answer(conn, answer).await,
            ClientMessage::IceCandidate {
                candidate,
                viewer_id,
            } => self.relay_ice_candidate(conn, candidate, viewer_id).await,
            ClientMessage::InputEvent { data } => self.relay_input_event(conn, data).await,
            ClientMessage::StopHosting => self.stop_hosting(conn).await,
            ClientMessage::Ping => {
                self.with_state(|_, out| out.send(conn, &ServerMessage::Pong))
                    .await;
                Ok(())
            }
            ClientMessage::NetworkFeedback { .. } => {
                tracing::debug!(connection_id = %conn, "Link feedback is handled by the transport");
                Ok(())
            }
        };

        let Err(error) = result else {
            return;
        };

        match error.code() {
            Some(code) if answers_errors => {
                tracing::warn!(connection_id = %conn, kind, error = %error, "Request rejected");
                let reply = ServerMessage::Error {
                    code,
                    message: error.to_string(),
                };
                self.with_state(|_, out| out.send(conn, &reply)).await;
            }
            None => {
                tracing::debug!(connection_id = %conn, kind, error = %error, "Dropping message");
            }
            Some(_) => {
                tracing::warn!(connection_id = %conn, kind, error = %error, "Dropping message");
            }
        }
    }
}
