use crate::{
    logging,
    registry::{LoginError, Registry, SessionId},
};
use chatline_protocol::commands::{relay_line, Command, Reply};
use std::{fmt, time::Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerDisconnect,
    IdleTimeout,
    FramingError,
    TransportError,
    SlowConsumer,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerDisconnect => "peer_disconnect",
            Self::IdleTimeout => "idle_timeout",
            Self::FramingError => "framing_error",
            Self::TransportError => "transport_error",
            Self::SlowConsumer => "slow_consumer",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side state of one connection. Owned by the connection task; other sessions
/// only affect it through the registry.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    username: Option<String>,
    last_activity: Instant,
    max_line_bytes: usize,
}

impl Session {
    pub fn new(id: SessionId, max_line_bytes: usize) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            username: None,
            last_activity: Instant::now(),
            max_line_bytes,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Runs one parsed line through the state machine. Returns the direct reply, if any.
    pub async fn handle_command(
        &mut self,
        command: Command<'_>,
        registry: &Registry,
    ) -> Option<Reply> {
        match (self.state, command) {
            (SessionState::Closed, _) => None,
            (_, Command::Login(name)) => self.login(name, registry).await,
            (_, Command::LoginMissingName) => {
                logging::log_protocol_violation(self.id, "login", "missing_name");
                None
            }
            (SessionState::Ready, Command::Ping) => {
                if registry.take_roster_changed(self.id).await {
                    Some(Reply::PingChanged)
                } else {
                    Some(Reply::PingOk)
                }
            }
            (SessionState::Ready, Command::AskClients) => {
                Some(Reply::Clients(registry.snapshot().await))
            }
            (SessionState::Ready, Command::Text(text)) => {
                self.relay(text, registry).await;
                None
            }
            (SessionState::Connected, command) => {
                logging::log_protocol_violation(self.id, command.kind(), "not_logged_in");
                None
            }
        }
    }

    async fn login(&mut self, name: &str, registry: &Registry) -> Option<Reply> {
        match registry.set_username(self.id, name).await {
            Ok(()) => {
                let relogin = self.username.is_some();
                self.username = Some(name.to_string());
                self.state = SessionState::Ready;
                registry.mark_all_changed().await;
                info!(session_id = %self.id, relogin, "session.logged_in");
                Some(Reply::LoginOk)
            }
            Err(LoginError::NameTaken) => {
                info!(session_id = %self.id, "session.login_name_taken");
                Some(Reply::LoginTaken)
            }
            Err(LoginError::UnknownSession) => {
                debug!(session_id = %self.id, "session.login_after_unregister");
                None
            }
        }
    }

    async fn relay(&self, text: &str, registry: &Registry) {
        if text.is_empty() {
            return;
        }

        let Some(username) = self.username.as_deref() else {
            return;
        };

        let line = relay_line(username, text);
        if line.len() > self.max_line_bytes {
            warn!(
                session_id = %self.id,
                relay_bytes = line.len(),
                max_line_bytes = self.max_line_bytes,
                "connection.relay_too_long"
            );
            return;
        }

        let report = registry.broadcast(self.id, &line).await;
        debug!(
            session_id = %self.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "session.relayed"
        );
    }
}
