use crate::registry::SessionId;
use tracing::debug;

pub fn log_inbound_line(session_id: SessionId, kind: &str, payload_bytes: usize) {
    debug!(
        %session_id,
        kind,
        payload_bytes,
        "connection.line_received"
    );
}

pub fn log_protocol_violation(session_id: SessionId, kind: &str, reason: &str) {
    debug!(
        %session_id,
        kind,
        reason,
        "connection.protocol_violation"
    );
}
