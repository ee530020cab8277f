use chatline_protocol::config::NamePolicy;
use std::{net::IpAddr, time::Instant};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

pub type SessionId = Uuid;
pub type OutboundSender = mpsc::Sender<String>;

/// What a connection hands to the registry: a way to reach it and a way to stop it.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub ip: IpAddr,
    pub outbound_tx: OutboundSender,
    pub closer: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub ip: IpAddr,
    pub connected_at: Instant,
    pub username: Option<String>,
}

#[derive(Debug)]
struct SessionEntry {
    record: SessionRecord,
    roster_changed: bool,
    outbound_tx: OutboundSender,
    closer: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("session {0} is already registered")]
    AlreadyRegistered(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("name is held by another session")]
    NameTaken,
    #[error("session is not registered")]
    UnknownSession,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Live sessions in registration order. Every method is one critical section.
#[derive(Debug)]
pub struct Registry {
    name_policy: NamePolicy,
    sessions: RwLock<Vec<SessionEntry>>,
}

impl Registry {
    pub fn new(name_policy: NamePolicy) -> Self {
        Self {
            name_policy,
            sessions: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, handle: SessionHandle) -> Result<(), RegisterError> {
        let mut sessions = self.sessions.write().await;
        if sessions.iter().any(|entry| entry.record.id == handle.id) {
            return Err(RegisterError::AlreadyRegistered(handle.id));
        }

        sessions.push(SessionEntry {
            record: SessionRecord {
                id: handle.id,
                ip: handle.ip,
                connected_at: Instant::now(),
                username: None,
            },
            roster_changed: false,
            outbound_tx: handle.outbound_tx,
            closer: handle.closer,
        });
        Ok(())
    }

    /// Removes the session if present and flags the roster change for everyone left.
    pub async fn unregister(&self, id: SessionId) -> Option<SessionRecord> {
        let mut sessions = self.sessions.write().await;
        let index = sessions.iter().position(|entry| entry.record.id == id)?;
        let removed = sessions.remove(index);
        mark_all(&mut sessions);
        Some(removed.record)
    }

    pub async fn set_username(&self, id: SessionId, name: &str) -> Result<(), LoginError> {
        let mut sessions = self.sessions.write().await;

        if self.name_policy == NamePolicy::RejectDuplicates
            && sessions
                .iter()
                .any(|entry| entry.record.id != id && entry.record.username.as_deref() == Some(name))
        {
            return Err(LoginError::NameTaken);
        }

        let entry = sessions
            .iter_mut()
            .find(|entry| entry.record.id == id)
            .ok_or(LoginError::UnknownSession)?;
        entry.record.username = Some(name.to_string());
        Ok(())
    }

    /// Returns the session's roster-changed flag and clears it.
    pub async fn take_roster_changed(&self, id: SessionId) -> bool {
        self.sessions
            .write()
            .await
            .iter_mut()
            .find(|entry| entry.record.id == id)
            .is_some_and(|entry| std::mem::take(&mut entry.roster_changed))
    }

    /// Called after every membership or username change.
    pub async fn mark_all_changed(&self) {
        mark_all(&mut self.sessions.write().await);
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter_map(|entry| entry.record.username.clone())
            .collect()
    }

    /// Queues `line` for every session, the sender included. A recipient whose queue
    /// is full or gone is cancelled so its own task closes it.
    pub async fn broadcast(&self, sender: SessionId, line: &str) -> BroadcastReport {
        let recipients: Vec<(SessionId, OutboundSender, CancellationToken)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|entry| {
                (
                    entry.record.id,
                    entry.outbound_tx.clone(),
                    entry.closer.clone(),
                )
            })
            .collect();

        let mut report = BroadcastReport::default();
        for (recipient, outbound_tx, closer) in recipients {
            match outbound_tx.try_send(line.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.dropped += 1;
                    let reason = match err {
                        mpsc::error::TrySendError::Full(_) => "queue_full",
                        mpsc::error::TrySendError::Closed(_) => "queue_closed",
                    };
                    warn!(%sender, %recipient, reason, "registry.broadcast_dropped");
                    closer.cancel();
                }
            }
        }

        report
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn mark_all(sessions: &mut [SessionEntry]) {
    for entry in sessions {
        entry.roster_changed = true;
    }
}
