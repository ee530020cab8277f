use crate::{
    app_state::SharedState,
    liveness::IdleMonitor,
    logging,
    registry::SessionHandle,
    session::{CloseReason, Session},
};
use chatline_protocol::{
    commands::Command,
    framing::{FrameError, LineCodec},
};
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, time::Instant};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

type LineStream = Framed<TcpStream, LineCodec>;

pub async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: SharedState) {
    let ip = peer_addr.ip();
    let limits = state.limits().clone();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(limits.outbound_buffer.max(1));
    let closer = state.shutdown_token().child_token();
    let session_id = Uuid::new_v4();

    let handle = SessionHandle {
        id: session_id,
        ip,
        outbound_tx,
        closer: closer.clone(),
    };
    if let Err(err) = state.registry().register(handle).await {
        warn!(%session_id, %ip, err = %err, "connection.register_failed");
        return;
    }
    info!(%session_id, %ip, "connection.opened");

    let mut lines = Framed::new(stream, LineCodec::new(limits.max_line_bytes));
    let mut session = Session::new(session_id, limits.max_line_bytes);
    let mut idle = IdleMonitor::new(&limits);

    let reason = loop {
        tokio::select! {
            _ = closer.cancelled() => {
                if state.shutdown_token().is_cancelled() {
                    break CloseReason::Shutdown;
                }
                break CloseReason::SlowConsumer;
            }
            _ = idle.tick() => {
                if idle.is_expired(session.last_activity(), Instant::now()) {
                    info!(
                        %session_id,
                        %ip,
                        idle_timeout = ?idle.threshold(),
                        "connection.idle_timeout"
                    );
                    break CloseReason::IdleTimeout;
                }
            }
            outbound = outbound_rx.recv() => {
                let Some(line) = outbound else {
                    break CloseReason::PeerDisconnect;
                };
                if let Err(err) = lines.send(line).await {
                    warn!(%session_id, err = %err, "connection.outbound_send_failed");
                    break CloseReason::TransportError;
                }
            }
            frame = lines.next() => {
                match frame {
                    Some(Ok(line)) => {
                        if let Err(reason) = handle_line(&mut lines, &mut session, &state, &line).await {
                            break reason;
                        }
                    }
                    Some(Err(FrameError::LineTooLong { max_bytes })) => {
                        warn!(%session_id, max_bytes, "connection.line_too_long");
                        break CloseReason::FramingError;
                    }
                    Some(Err(FrameError::Io(err))) => {
                        warn!(%session_id, err = %err, "connection.read_failed");
                        break CloseReason::TransportError;
                    }
                    None => break CloseReason::PeerDisconnect,
                }
            }
        }
    };

    session.close();
    let removed = state.registry().unregister(session_id).await;
    let total = state.registry().len().await;

    if let Some(removed) = removed {
        info!(
            %session_id,
            ip = %removed.ip,
            logged_in = session.username().is_some(),
            connected_for = ?removed.connected_at.elapsed(),
            reason = %reason,
            active_sessions = total,
            "connection.closed"
        );
    } else {
        debug!(%session_id, state = ?session.state(), "connection.already_removed");
    }
}

async fn handle_line(
    lines: &mut LineStream,
    session: &mut Session,
    state: &SharedState,
    line: &str,
) -> Result<(), CloseReason> {
    session.touch(Instant::now());

    let command = Command::parse(line);
    logging::log_inbound_line(session.id(), command.kind(), line.len());

    let Some(reply) = session.handle_command(command, state.registry()).await else {
        return Ok(());
    };

    lines.send(reply.to_string()).await.map_err(|err| {
        warn!(session_id = %session.id(), err = %err, "connection.reply_send_failed");
        CloseReason::TransportError
    })
}
