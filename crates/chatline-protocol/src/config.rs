use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8001;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamePolicy {
    #[default]
    AllowDuplicates,
    RejectDuplicates,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_line_bytes: usize,
    pub idle_timeout_ms: u64,
    pub ping_delay_max_ms: u64,
    pub outbound_buffer: usize,
    pub name_policy: NamePolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 5 * 1024,
            idle_timeout_ms: 5_000,
            ping_delay_max_ms: 7_000,
            outbound_buffer: 64,
            name_policy: NamePolicy::AllowDuplicates,
        }
    }
}

impl LimitsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// The server checks each session twice per idle window.
    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis((self.idle_timeout_ms / 2).max(1))
    }

    pub fn ping_delay_max(&self) -> Duration {
        Duration::from_millis(self.ping_delay_max_ms)
    }
}
