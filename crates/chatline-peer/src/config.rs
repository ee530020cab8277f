use chatline_protocol::config::{LimitsConfig, DEFAULT_PORT};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "chatline", version, about = "chatline terminal peer")]
pub struct ClientArgs {
    /// Relay address as `host:port`; a bare host uses the default port.
    #[arg(long, env = "CHATLINE_SERVER", default_value = "127.0.0.1")]
    pub server: String,
    #[arg(long, env = "CHATLINE_NAME", value_parser = parse_name)]
    pub name: String,
    #[arg(
        long,
        env = "CHATLINE_PING_DELAY_MAX_MS",
        value_parser = clap::value_parser!(u64).range(1..=600_000)
    )]
    pub ping_delay_max_ms: Option<u64>,
    #[arg(
        long,
        env = "CHATLINE_MAX_LINE_BYTES",
        value_parser = clap::value_parser!(u64).range(16..=1_048_576)
    )]
    pub max_line_bytes: Option<u64>,
    #[arg(long, env = "CHATLINE_LOG_FILTER", default_value = "chatline_peer=warn")]
    pub log_filter: String,
}

impl ClientArgs {
    pub fn limits(&self) -> LimitsConfig {
        let mut limits = LimitsConfig::default();
        if let Some(ping_delay_max_ms) = self.ping_delay_max_ms {
            limits.ping_delay_max_ms = ping_delay_max_ms;
        }
        if let Some(max_line_bytes) = self.max_line_bytes {
            limits.max_line_bytes = max_line_bytes as usize;
        }
        limits
    }

    pub fn server_addr(&self) -> String {
        resolve_server_addr(&self.server)
    }
}

pub fn resolve_server_addr(server: &str) -> String {
    if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{DEFAULT_PORT}")
    }
}

/// The relay takes the first whitespace token after `LOGIN`, so names are one token.
fn parse_name(raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if raw.chars().any(char::is_whitespace) {
        return Err("name must not contain whitespace".to_string());
    }
    Ok(raw.to_string())
}
