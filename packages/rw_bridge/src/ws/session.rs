//! Per-connection request dispatch
//!
//! A [`FrontEndSession`] turns each inbound envelope into backend I/O and
//! registry/broadcast updates, and produces the single reply for it.

use backend_link::{Role, TRANSPORT_ERROR_PREFIX, is_success};
use tracing::{debug, info, warn};

use super::protocol::{CommitNotice, Request, ServerMessage, parse_request};
use super::registry::SessionId;
use crate::AppState;
use crate::error::BridgeError;

/// Lifecycle of one front-end connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Closed,
}

pub struct FrontEndSession {
    id: SessionId,
    app: AppState,
    state: SessionState,
}

impl FrontEndSession {
    pub fn new(id: SessionId, app: AppState) -> Self {
        Self {
            id,
            app,
            state: SessionState::Connected,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn holds_lease(&self) -> bool {
        self.app.registry.lookup(self.id).await.is_some()
    }

    /// Decode and run one inbound text frame, returning its reply.
    pub async fn handle_text(&mut self, text: &str) -> ServerMessage {
        self.app.metrics.frame_received();

        let result = match parse_request(text) {
            Ok(request) => {
                debug!(session = %self.id, role = %request.role(), "request: {:?}", request);
                self.dispatch(request).await
            }
            Err(e) => Err(e),
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                debug!(session = %self.id, code = e.error_code(), "request failed: {}", e);
                ServerMessage::from(e)
            }
        };
        self.app.metrics.reply_sent(reply.is_error());
        reply
    }

    /// Binary frames are accepted when they hold UTF-8 text.
    pub async fn handle_binary(&mut self, bytes: &[u8]) -> ServerMessage {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.handle_text(text).await,
            Err(_) => {
                self.app.metrics.frame_received();
                self.app.metrics.reply_sent(true);
                ServerMessage::from(BridgeError::InvalidJson)
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<ServerMessage, BridgeError> {
        match request {
            Request::Read => Ok(self.read().await),
            Request::StartLease => self.start_lease().await,
            Request::StopLease => self.stop_lease().await,
            Request::Write { message } => self.write(message).await,
        }
    }

    async fn read(&self) -> ServerMessage {
        let dump = self.app.pool.one_shot(Role::Reader, None).await;
        self.note_transport_failure(&dump);
        ServerMessage::data(dump)
    }

    async fn start_lease(&self) -> Result<ServerMessage, BridgeError> {
        self.app.registry.try_acquire(self.id).await?;

        let link = self.app.pool.connect().await.inspect_err(|e| {
            self.app.metrics.backend_error();
            warn!(session = %self.id, "backend connect failed: {}", e);
        })?;

        // The backend sends nothing for the role tag; this just drains.
        let _ = link.exchange(Role::Writer.tag()).await;
        let reply = link.exchange("start").await;

        if !is_success(&reply) {
            self.note_transport_failure(&reply);
            link.close().await;
            return Err(BridgeError::Backend(reply));
        }

        if let Err(link) = self.app.registry.bind(self.id, link).await {
            link.close().await;
            return Err(BridgeError::LeaseAlreadyActive);
        }

        self.app.metrics.lease_granted();
        info!(session = %self.id, "writer lease granted");
        Ok(ServerMessage::reply(reply))
    }

    async fn stop_lease(&self) -> Result<ServerMessage, BridgeError> {
        let link = self
            .app
            .registry
            .lookup(self.id)
            .await
            .ok_or(BridgeError::NoActiveLease)?;

        let reply = link.exchange("stop").await;
        self.note_transport_failure(&reply);
        link.close().await;
        self.app.registry.release(self.id).await;

        self.app.metrics.lease_released();
        info!(session = %self.id, link = %link.id(), "writer lease released");
        // The lease is gone whatever the backend said.
        Ok(ServerMessage::reply(reply))
    }

    async fn write(&self, message: String) -> Result<ServerMessage, BridgeError> {
        let link = self
            .app
            .registry
            .lookup(self.id)
            .await
            .ok_or(BridgeError::LeaseRequired)?;

        let reply = link.exchange(message.as_bytes()).await;
        if !is_success(&reply) {
            self.note_transport_failure(&reply);
            return Err(BridgeError::Backend(reply));
        }

        let outcome = self.app.broadcaster.publish(CommitNotice::now(message)).await;
        self.app
            .metrics
            .write_committed(outcome.attempted, outcome.delivered);
        debug!(
            session = %self.id,
            delivered = outcome.delivered,
            skipped = outcome.skipped(),
            "write committed"
        );
        Ok(ServerMessage::reply(reply))
    }

    /// Drop the lease without telling the backend. Returns whether a lease
    /// was held. The connection itself stays usable.
    pub async fn expire_lease(&mut self) -> bool {
        match self.app.registry.release(self.id).await {
            Some(link) => {
                link.close().await;
                self.app.metrics.lease_abandoned();
                info!(session = %self.id, link = %link.id(), "writer lease dropped without stop");
                true
            }
            None => false,
        }
    }

    /// Tear down on disconnect. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.expire_lease().await;
        self.state = SessionState::Closed;
    }

    fn note_transport_failure(&self, reply: &str) {
        if reply.starts_with(TRANSPORT_ERROR_PREFIX) {
            self.app.metrics.backend_error();
            warn!(session = %self.id, "backend transport failure: {}", reply.trim_end());
        }
    }
}
