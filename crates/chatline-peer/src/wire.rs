use chatline_protocol::commands::{login_line, names, Reply};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Connecting,
    LoggingIn,
    AwaitingRosterReply,
    /// Logged in with no ping timer armed; a `PING` may be in flight.
    Idle,
    PingScheduled,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerCloseReason {
    ServerClosed,
    NameTaken,
    UserQuit,
    FrontEndGone,
    ConnectionFailed,
}

impl fmt::Display for PeerCloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ServerClosed => "server_closed",
            Self::NameTaken => "name_taken",
            Self::UserQuit => "user_quit",
            Self::FrontEndGone => "front_end_gone",
            Self::ConnectionFailed => "connection_failed",
        })
    }
}

/// What the engine hands to the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    LoggedIn { name: String },
    NameTaken { name: String },
    Roster(Vec<String>),
    Chat(String),
    Notice(String),
    Closed { reason: PeerCloseReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAction {
    Send(String),
    SchedulePing,
    Display(PeerEvent),
    Close(PeerCloseReason),
}

#[derive(Debug)]
pub struct PeerState {
    name: String,
    phase: PeerPhase,
    logged_in: bool,
    roster: Vec<String>,
}

impl PeerState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: PeerPhase::Connecting,
            logged_in: false,
            roster: Vec::new(),
        }
    }

    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn on_connected(&mut self) -> Vec<PeerAction> {
        self.phase = PeerPhase::LoggingIn;
        vec![PeerAction::Send(login_line(&self.name))]
    }

    pub fn on_server_line(&mut self, line: &str) -> Vec<PeerAction> {
        if self.phase == PeerPhase::Closed {
            return Vec::new();
        }

        let reply = Reply::parse(line);
        if !self.logged_in && !matches!(reply, Reply::LoginOk | Reply::LoginTaken) {
            debug!(phase = ?self.phase, "peer.line_before_login");
            return Vec::new();
        }

        match reply {
            Reply::LoginOk => {
                self.logged_in = true;
                self.phase = PeerPhase::AwaitingRosterReply;
                vec![
                    PeerAction::Display(PeerEvent::LoggedIn {
                        name: self.name.clone(),
                    }),
                    PeerAction::Send(names::ASK_CLIENTS.to_string()),
                ]
            }
            Reply::LoginTaken => {
                self.phase = PeerPhase::Closed;
                vec![
                    PeerAction::Display(PeerEvent::NameTaken {
                        name: self.name.clone(),
                    }),
                    PeerAction::Close(PeerCloseReason::NameTaken),
                ]
            }
            Reply::PingOk => {
                if self.phase != PeerPhase::Idle {
                    return Vec::new();
                }
                self.phase = PeerPhase::PingScheduled;
                vec![PeerAction::SchedulePing]
            }
            Reply::PingChanged => {
                self.phase = PeerPhase::AwaitingRosterReply;
                vec![PeerAction::Send(names::ASK_CLIENTS.to_string())]
            }
            Reply::Clients(roster) => {
                self.roster = roster.clone();
                self.phase = PeerPhase::PingScheduled;
                vec![
                    PeerAction::Display(PeerEvent::Roster(roster)),
                    PeerAction::SchedulePing,
                ]
            }
            Reply::Relay(line) => vec![PeerAction::Display(PeerEvent::Chat(line))],
        }
    }

    pub fn on_ping_due(&mut self) -> Vec<PeerAction> {
        if self.phase != PeerPhase::PingScheduled {
            return Vec::new();
        }
        self.phase = PeerPhase::Idle;
        vec![PeerAction::Send(names::PING.to_string())]
    }

    pub fn request_roster(&mut self) -> Vec<PeerAction> {
        if !self.logged_in || self.phase == PeerPhase::Closed {
            return vec![not_logged_in_notice()];
        }
        self.phase = PeerPhase::AwaitingRosterReply;
        vec![PeerAction::Send(names::ASK_CLIENTS.to_string())]
    }

    pub fn on_user_text(&mut self, text: &str) -> Vec<PeerAction> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if !self.logged_in || self.phase == PeerPhase::Closed {
            return vec![not_logged_in_notice()];
        }
        vec![PeerAction::Send(text.to_string())]
    }

    pub fn on_closed(&mut self) {
        self.phase = PeerPhase::Closed;
    }
}

fn not_logged_in_notice() -> PeerAction {
    PeerAction::Display(PeerEvent::Notice(
        "not logged in yet; message not sent".to_string(),
    ))
}

pub fn display_line(event: &PeerEvent) -> String {
    match event {
        PeerEvent::LoggedIn { name } => format!("[login] logged in as {name}"),
        PeerEvent::NameTaken { name } => format!("[login] name {name} is already taken"),
        PeerEvent::Roster(roster) if roster.is_empty() => "[clients] nobody here".to_string(),
        PeerEvent::Roster(roster) => format!("[clients] {}", roster.join(", ")),
        PeerEvent::Chat(line) => line.clone(),
        PeerEvent::Notice(text) => format!("[info] {text}"),
        PeerEvent::Closed { reason } => format!("[closed] {reason}"),
    }
}
