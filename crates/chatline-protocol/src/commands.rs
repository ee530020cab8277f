use std::fmt;

pub mod names {
    pub const LOGIN: &str = "LOGIN";
    pub const PING: &str = "PING";
    pub const ASK_CLIENTS: &str = "ASK_CLIENTS";

    pub const LOGIN_OK: &str = "LOGIN OK";
    pub const LOGIN_TAKEN: &str = "LOGIN TAKEN";
    pub const PING_OK: &str = "PING OK";
    pub const PING_CHANGED: &str = "PING CHANGED";
    pub const CLIENTS: &str = "CLIENTS";
}

/// A line sent by a peer, as the relay interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Login(&'a str),
    /// `LOGIN` with no name after it.
    LoginMissingName,
    Ping,
    AskClients,
    Text(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim_end();

        if trimmed == names::PING {
            return Self::Ping;
        }

        if trimmed == names::ASK_CLIENTS {
            return Self::AskClients;
        }

        let mut parts = trimmed.split_whitespace();
        if parts.next() == Some(names::LOGIN) && starts_with_word(trimmed, names::LOGIN) {
            return match parts.next() {
                Some(name) => Self::Login(name),
                None => Self::LoginMissingName,
            };
        }

        Self::Text(line)
    }

    /// Metadata-only label, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login(_) | Self::LoginMissingName => "login",
            Self::Ping => "ping",
            Self::AskClients => "ask_clients",
            Self::Text(_) => "text",
        }
    }
}

fn starts_with_word(line: &str, word: &str) -> bool {
    line.strip_prefix(word)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

pub fn login_line(name: &str) -> String {
    format!("{} {name}", names::LOGIN)
}

pub fn relay_line(username: &str, text: &str) -> String {
    format!("{username}: {text}")
}

/// A line sent by the relay, as a peer interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    LoginOk,
    LoginTaken,
    PingOk,
    PingChanged,
    Clients(Vec<String>),
    Relay(String),
}

impl Reply {
    pub fn parse(line: &str) -> Self {
        match line.trim_end() {
            names::LOGIN_OK => return Self::LoginOk,
            names::LOGIN_TAKEN => return Self::LoginTaken,
            names::PING_OK => return Self::PingOk,
            names::PING_CHANGED => return Self::PingChanged,
            _ => {}
        }

        if starts_with_word(line, names::CLIENTS) {
            let roster = line[names::CLIENTS.len()..]
                .split_whitespace()
                .map(str::to_string)
                .collect();
            return Self::Clients(roster);
        }

        Self::Relay(line.to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginOk => f.write_str(names::LOGIN_OK),
            Self::LoginTaken => f.write_str(names::LOGIN_TAKEN),
            Self::PingOk => f.write_str(names::PING_OK),
            Self::PingChanged => f.write_str(names::PING_CHANGED),
            Self::Clients(roster) => {
                write!(f, "{} ", names::CLIENTS)?;
                for name in roster {
                    write!(f, "{name} ")?;
                }
                Ok(())
            }
            Self::Relay(line) => f.write_str(line),
        }
    }
}
