use crate::{
    heartbeat,
    wire::{PeerAction, PeerCloseReason, PeerEvent, PeerState},
};
use chatline_protocol::{
    config::LimitsConfig,
    framing::{FrameError, LineCodec},
};
use futures_util::{SinkExt, StreamExt};
use std::io;
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, error::TrySendError},
    time::{self, Instant},
};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

type PeerLines = Framed<TcpStream, LineCodec>;

/// Requests from the front-end to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerInput {
    Say(String),
    Who,
    Quit,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Owns the relay connection and the ping timer. The front-end only talks to it
/// through bounded queues: `PeerInput` in, `PeerEvent` out.
pub struct PeerEngine {
    state: PeerState,
    limits: LimitsConfig,
    events: mpsc::Sender<PeerEvent>,
    ping_at: Option<Instant>,
}

impl PeerEngine {
    pub fn new(
        name: impl Into<String>,
        limits: LimitsConfig,
        events: mpsc::Sender<PeerEvent>,
    ) -> Self {
        Self {
            state: PeerState::new(name),
            limits,
            events,
            ping_at: None,
        }
    }

    pub async fn run(
        mut self,
        server: &str,
        mut input: mpsc::Receiver<PeerInput>,
    ) -> Result<PeerCloseReason, PeerError> {
        let stream = match TcpStream::connect(server).await {
            Ok(stream) => stream,
            Err(source) => {
                warn!(server, err = %source, "peer.connect_failed");
                self.finish(PeerCloseReason::ConnectionFailed);
                return Err(PeerError::Connect {
                    addr: server.to_string(),
                    source,
                });
            }
        };
        info!(server, "peer.connected");

        let mut lines = Framed::new(stream, LineCodec::new(self.limits.max_line_bytes));
        let mut actions = self.state.on_connected();

        let outcome = loop {
            match self.apply(&mut lines, std::mem::take(&mut actions)).await {
                Ok(Some(reason)) => break Ok(reason),
                Ok(None) => {}
                Err(err) => break Err(err),
            }

            tokio::select! {
                frame = lines.next() => match frame {
                    Some(Ok(line)) => actions = self.state.on_server_line(&line),
                    Some(Err(err)) => break Err(PeerError::Frame(err)),
                    None => break Ok(PeerCloseReason::ServerClosed),
                },
                _ = ping_timer(self.ping_at) => {
                    self.ping_at = None;
                    actions = self.state.on_ping_due();
                }
                command = input.recv() => match command {
                    Some(PeerInput::Say(text)) => actions = self.state.on_user_text(&text),
                    Some(PeerInput::Who) => actions = self.state.request_roster(),
                    Some(PeerInput::Quit) => break Ok(PeerCloseReason::UserQuit),
                    None => break Ok(PeerCloseReason::FrontEndGone),
                },
            }
        };

        let reason = match &outcome {
            Ok(reason) => *reason,
            Err(err) => {
                warn!(server, err = %err, "peer.connection_failed");
                PeerCloseReason::ConnectionFailed
            }
        };
        self.finish(reason);
        outcome
    }

    async fn apply(
        &mut self,
        lines: &mut PeerLines,
        actions: Vec<PeerAction>,
    ) -> Result<Option<PeerCloseReason>, PeerError> {
        for action in actions {
            match action {
                PeerAction::Send(line) => {
                    let max_bytes = self.limits.max_line_bytes;
                    if line.len() > max_bytes {
                        warn!(line_bytes = line.len(), max_bytes, "peer.line_too_long");
                        self.display(PeerEvent::Notice(format!(
                            "message longer than {max_bytes} bytes was not sent"
                        )));
                        continue;
                    }
                    lines.send(line).await?;
                }
                PeerAction::SchedulePing => {
                    let delay = heartbeat::next_ping_delay(self.limits.ping_delay_max());
                    debug!(delay = ?delay, "peer.ping_scheduled");
                    self.ping_at = Some(Instant::now() + delay);
                }
                PeerAction::Display(event) => self.display(event),
                PeerAction::Close(reason) => return Ok(Some(reason)),
            }
        }
        Ok(None)
    }

    fn display(&self, event: PeerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("peer.display_dropped"),
            Err(TrySendError::Closed(_)) => debug!("peer.display_closed"),
        }
    }

    fn finish(&mut self, reason: PeerCloseReason) {
        info!(
            reason = %reason,
            phase = ?self.state.phase(),
            logged_in = self.state.is_logged_in(),
            known_clients = self.state.roster().len(),
            "peer.closed"
        );
        self.state.on_closed();
        self.ping_at = None;
        self.display(PeerEvent::Closed { reason });
    }
}

async fn ping_timer(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
