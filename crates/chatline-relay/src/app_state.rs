use crate::registry::Registry;
use chatline_protocol::config::LimitsConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type SharedState = Arc<AppState>;

#[derive(Debug)]
pub struct AppState {
    limits: LimitsConfig,
    registry: Registry,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            registry: Registry::new(limits.name_policy),
            limits,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Parent of every session's close token; cancelling it closes all sessions.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
