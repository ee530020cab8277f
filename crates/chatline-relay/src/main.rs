mod app_state;
mod conn_handler;
mod liveness;
mod logging;
mod registry;
mod session;

use app_state::{AppState, SharedState};
use chatline_protocol::config::{LimitsConfig, NamePolicy};
use clap::Parser;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "chatline-relay", version, about = "Line-oriented chat relay")]
struct RelayArgs {
    #[arg(long, env = "CHATLINE_RELAY_ADDR", default_value = "127.0.0.1:8001")]
    listen: SocketAddr,
    #[arg(
        long,
        env = "CHATLINE_LOG_FILTER",
        default_value = "chatline_relay=info"
    )]
    log_filter: String,
    #[arg(
        long,
        env = "CHATLINE_IDLE_TIMEOUT_MS",
        value_parser = clap::value_parser!(u64).range(2..=3_600_000)
    )]
    idle_timeout_ms: Option<u64>,
    #[arg(
        long,
        env = "CHATLINE_MAX_LINE_BYTES",
        value_parser = clap::value_parser!(u64).range(16..=1_048_576)
    )]
    max_line_bytes: Option<u64>,
    /// Refuse a login whose name another session already holds.
    #[arg(long, env = "CHATLINE_UNIQUE_NAMES")]
    unique_names: bool,
}

impl RelayArgs {
    fn limits(&self) -> LimitsConfig {
        let mut limits = LimitsConfig::default();
        if let Some(idle_timeout_ms) = self.idle_timeout_ms {
            limits.idle_timeout_ms = idle_timeout_ms;
        }
        if let Some(max_line_bytes) = self.max_line_bytes {
            limits.max_line_bytes = max_line_bytes as usize;
        }
        if self.unique_names {
            limits.name_policy = NamePolicy::RejectDuplicates;
        }
        limits
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = RelayArgs::parse();
    init_tracing(&args.log_filter);

    let bind_addr = args.listen;
    let limits = args.limits();
    let state = Arc::new(AppState::new(limits.clone()));

    let listener = TcpListener::bind(bind_addr).await?;
    info!(
        %bind_addr,
        idle_timeout_ms = limits.idle_timeout_ms,
        max_line_bytes = limits.max_line_bytes,
        name_policy = ?limits.name_policy,
        "relay.listening"
    );

    serve(listener, state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(err = %err, "relay.signal_listen_failed");
            std::future::pending::<()>().await;
        }
    })
    .await;

    Ok(())
}

/// Accepts connections until `shutdown` resolves, then closes every live session.
async fn serve<F>(listener: TcpListener, state: SharedState, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let active_sessions = state.registry().len().await;
                info!(active_sessions, "relay.shutdown");
                state.shutdown_token().cancel();
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        tokio::spawn(conn_handler::handle_connection(
                            stream,
                            peer_addr,
                            Arc::clone(&state),
                        ));
                    }
                    Err(err) => warn!(err = %err, "relay.accept_failed"),
                }
            }
        }
    }
}

fn init_tracing(log_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_protocol::framing::LineCodec;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::{
        net::TcpStream,
        sync::oneshot,
        time::{sleep, timeout},
    };
    use tokio_util::codec::Framed;

    type LineClient = Framed<TcpStream, LineCodec>;

    #[test]
    fn relay_addr_defaults_when_not_provided() {
        let addr = RelayArgs::parse_from(["chatline-relay"]).listen;
        assert_eq!(addr.to_string(), "127.0.0.1:8001");
    }

    #[test]
    fn relay_addr_uses_listen_flag() {
        let addr = RelayArgs::parse_from(["chatline-relay", "--listen", "127.0.0.1:9011"]).listen;
        assert_eq!(addr.to_string(), "127.0.0.1:9011");
    }

    #[test]
    fn relay_log_filter_defaults_when_not_provided() {
        let filter = RelayArgs::parse_from(["chatline-relay"]).log_filter;
        assert_eq!(filter, "chatline_relay=info");
    }

    #[test]
    fn limits_default_without_overrides() {
        let limits = RelayArgs::parse_from(["chatline-relay"]).limits();
        assert_eq!(limits, LimitsConfig::default());
    }

    #[test]
    fn limits_take_flag_overrides() {
        let limits = RelayArgs::parse_from([
            "chatline-relay",
            "--idle-timeout-ms",
            "900",
            "--max-line-bytes",
            "256",
            "--unique-names",
        ])
        .limits();
        assert_eq!(limits.idle_timeout_ms, 900);
        assert_eq!(limits.max_line_bytes, 256);
        assert_eq!(limits.name_policy, NamePolicy::RejectDuplicates);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn serve_future_can_be_spawned() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind relay listener");
        let state = Arc::new(AppState::new(LimitsConfig::default()));
        let fut = serve(listener, state, async {});
        assert_send(&fut);
        timeout(Duration::from_secs(5), fut)
            .await
            .expect("ready shutdown should stop serve");
    }

    #[tokio::test]
    async fn integration_login_roster_ping_and_chat_scenario() {
        let (addr, shutdown_tx, server_task) = spawn_test_relay(LimitsConfig::default()).await;

        let mut alice = connect_client(addr).await;
        send_line(&mut alice, "LOGIN Alice").await;
        assert_eq!(recv_line(&mut alice).await, "LOGIN OK");
        send_line(&mut alice, "ASK_CLIENTS").await;
        assert_eq!(recv_line(&mut alice).await, "CLIENTS Alice ");

        let mut bob = connect_client(addr).await;
        send_line(&mut bob, "LOGIN Bob").await;
        assert_eq!(recv_line(&mut bob).await, "LOGIN OK");

        send_line(&mut alice, "PING").await;
        assert_eq!(recv_line(&mut alice).await, "PING CHANGED");
        send_line(&mut alice, "PING").await;
        assert_eq!(recv_line(&mut alice).await, "PING OK");

        send_line(&mut alice, "ASK_CLIENTS").await;
        assert_eq!(recv_line(&mut alice).await, "CLIENTS Alice Bob ");

        send_line(&mut alice, "hello").await;
        assert_eq!(recv_line(&mut alice).await, "Alice: hello");
        assert_eq!(recv_line(&mut bob).await, "Alice: hello");

        let _ = shutdown_tx.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn integration_lines_before_login_get_no_reply() {
        let (addr, shutdown_tx, server_task) = spawn_test_relay(LimitsConfig::default()).await;

        let mut client = connect_client(addr).await;
        send_line(&mut client, "PING").await;
        send_line(&mut client, "hello?").await;
        send_line(&mut client, "LOGIN Carol").await;

        // The first reply is the login one; the earlier lines were dropped silently.
        assert_eq!(recv_line(&mut client).await, "LOGIN OK");

        let _ = shutdown_tx.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn integration_disconnect_marks_roster_changed_for_others() {
        let (addr, shutdown_tx, server_task) = spawn_test_relay(LimitsConfig::default()).await;

        let mut alice = connect_client(addr).await;
        send_line(&mut alice, "LOGIN Alice").await;
        assert_eq!(recv_line(&mut alice).await, "LOGIN OK");

        let mut bob = connect_client(addr).await;
        send_line(&mut bob, "LOGIN Bob").await;
        assert_eq!(recv_line(&mut bob).await, "LOGIN OK");

        send_line(&mut alice, "PING").await;
        assert_eq!(recv_line(&mut alice).await, "PING CHANGED");

        drop(bob);

        let roster = wait_for_roster(&mut alice, "CLIENTS Alice ").await;
        assert_eq!(roster, "CLIENTS Alice ");
        send_line(&mut alice, "PING").await;
        assert_eq!(recv_line(&mut alice).await, "PING CHANGED");

        let _ = shutdown_tx.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn integration_idle_session_is_dropped_from_roster() {
        let limits = LimitsConfig {
            idle_timeout_ms: 200,
            ..LimitsConfig::default()
        };
        let (addr, shutdown_tx, server_task) = spawn_test_relay(limits).await;

        let mut alice = connect_client(addr).await;
        send_line(&mut alice, "LOGIN Alice").await;
        assert_eq!(recv_line(&mut alice).await, "LOGIN OK");

        // Alice stays silent; the relay closes her connection.
        let closed = timeout(Duration::from_secs(5), alice.next())
            .await
            .expect("idle session should be closed");
        assert!(closed.is_none(), "expected end of stream, got {closed:?}");

        let mut bob = connect_client(addr).await;
        send_line(&mut bob, "LOGIN Bob").await;
        assert_eq!(recv_line(&mut bob).await, "LOGIN OK");
        send_line(&mut bob, "ASK_CLIENTS").await;
        assert_eq!(recv_line(&mut bob).await, "CLIENTS Bob ");

        let _ = shutdown_tx.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn integration_traffic_keeps_session_alive_past_idle_threshold() {
        let limits = LimitsConfig {
            idle_timeout_ms: 300,
            ..LimitsConfig::default()
        };
        let (addr, shutdown_tx, server_task) = spawn_test_relay(limits).await;

        let mut alice = connect_client(addr).await;
        send_line(&mut alice, "LOGIN Alice").await;
        assert_eq!(recv_line(&mut alice).await, "LOGIN OK");

        let mut bob = connect_client(addr).await;
        send_line(&mut bob, "LOGIN Bob").await;
        assert_eq!(recv_line(&mut bob).await, "LOGIN OK");

        // Five idle thresholds pass while both keep pinging.
        for _ in 0..15 {
            sleep(Duration::from_millis(100)).await;
            send_line(&mut alice, "PING").await;
            assert!(recv_line(&mut alice).await.starts_with("PING"));
            send_line(&mut bob, "PING").await;
            assert!(recv_line(&mut bob).await.starts_with("PING"));
        }

        send_line(&mut alice, "ASK_CLIENTS").await;
        assert_eq!(recv_line(&mut alice).await, "CLIENTS Alice Bob ");

        let text = "y".repeat(5120 - "Alice: ".len());
        send_line(&mut alice, &text).await;
        let relayed = recv_line(&mut bob).await;
        assert_eq!(relayed.len(), 5120);
        assert_eq!(relayed, format!("Alice: {text}"));

        let _ = shutdown_tx.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn integration_oversized_line_closes_connection() {
        let (addr, shutdown_tx, server_task) = spawn_test_relay(LimitsConfig::default()).await;

        let mut raw = TcpStream::connect(addr)
            .await
            .expect("raw client should connect");
        tokio::io::AsyncWriteExt::write_all(&mut raw, &vec![b'x'; 6000])
            .await
            .expect("oversized write should be accepted by the socket");

        let mut client = Framed::new(raw, LineCodec::new(5120));
        let ended = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("relay should close the connection");
        assert!(
            !matches!(ended, Some(Ok(_))),
            "expected closed stream, got {ended:?}"
        );

        let _ = shutdown_tx.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn integration_unique_names_policy_refuses_taken_name() {
        let limits = LimitsConfig {
            name_policy: NamePolicy::RejectDuplicates,
            ..LimitsConfig::default()
        };
        let (addr, shutdown_tx, server_task) = spawn_test_relay(limits).await;

        let mut first = connect_client(addr).await;
        send_line(&mut first, "LOGIN Sam").await;
        assert_eq!(recv_line(&mut first).await, "LOGIN OK");

        let mut second = connect_client(addr).await;
        send_line(&mut second, "LOGIN Sam").await;
        assert_eq!(recv_line(&mut second).await, "LOGIN TAKEN");
        send_line(&mut second, "LOGIN Samuel").await;
        assert_eq!(recv_line(&mut second).await, "LOGIN OK");

        let _ = shutdown_tx.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn integration_shutdown_closes_live_sessions() {
        let (addr, shutdown_tx, server_task) = spawn_test_relay(LimitsConfig::default()).await;

        let mut alice = connect_client(addr).await;
        send_line(&mut alice, "LOGIN Alice").await;
        assert_eq!(recv_line(&mut alice).await, "LOGIN OK");

        let _ = shutdown_tx.send(());
        let _ = server_task.await;

        let ended = timeout(Duration::from_secs(5), alice.next())
            .await
            .expect("session should close on shutdown");
        assert!(ended.is_none(), "expected end of stream, got {ended:?}");
    }

    async fn spawn_test_relay(
        limits: LimitsConfig,
    ) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let state = Arc::new(AppState::new(limits));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test relay listener");
        let addr = listener.local_addr().expect("listener local addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, state, async {
            let _ = shutdown_rx.await;
        }));

        // Give the server a short moment to start accepting sockets.
        sleep(Duration::from_millis(20)).await;

        (addr, shutdown_tx, task)
    }

    async fn connect_client(addr: SocketAddr) -> LineClient {
        let stream = TcpStream::connect(addr)
            .await
            .expect("test client should connect");
        Framed::new(stream, LineCodec::new(5120))
    }

    async fn send_line(client: &mut LineClient, line: &str) {
        client.send(line).await.expect("send line to relay");
    }

    async fn recv_line(client: &mut LineClient) -> String {
        match timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for relay line")
        {
            Some(Ok(line)) => line,
            Some(Err(err)) => panic!("line read error: {err}"),
            None => panic!("relay closed the connection unexpectedly"),
        }
    }

    async fn wait_for_roster(client: &mut LineClient, expected: &str) -> String {
        for _ in 0..50 {
            send_line(client, "ASK_CLIENTS").await;
            let roster = recv_line(client).await;
            if roster == expected {
                return roster;
            }
            sleep(Duration::from_millis(20)).await;
        }

        panic!("roster never became {expected:?}");
    }
}
