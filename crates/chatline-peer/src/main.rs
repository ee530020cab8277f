mod commands;
mod config;
mod heartbeat;
mod runtime;
mod wire;

use clap::Parser;
use commands::{parse_user_command, UserCommand, HELP_TEXT};
use config::ClientArgs;
use runtime::{PeerEngine, PeerInput};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const INPUT_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();
    init_tracing(&args.log_filter);

    let server = args.server_addr();
    let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
    let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
    let engine = PeerEngine::new(args.name.clone(), args.limits(), events_tx);

    println!("[info] connecting to {server} as {}", args.name);
    let engine_task = tokio::spawn({
        let server = server.clone();
        async move { engine.run(&server, input_rx).await }
    });

    let mut stdin = spawn_stdin_reader();
    let mut input_tx = Some(input_tx);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                println!("{}", wire::display_line(&event));
            }
            line = stdin.recv(), if input_tx.is_some() => {
                let Some(line) = line else {
                    debug!("peer.stdin_closed");
                    input_tx = None;
                    continue;
                };
                let input = match parse_user_command(&line) {
                    UserCommand::Help => {
                        println!("{HELP_TEXT}");
                        continue;
                    }
                    UserCommand::Unknown => {
                        println!("[info] unknown command; try /help");
                        continue;
                    }
                    UserCommand::Ignore => continue,
                    UserCommand::Who => PeerInput::Who,
                    UserCommand::Quit => PeerInput::Quit,
                    UserCommand::SendMessage(text) => PeerInput::Say(text),
                };
                let Some(tx) = input_tx.as_ref() else {
                    continue;
                };
                if tx.send(input).await.is_err() {
                    input_tx = None;
                }
            }
        }
    }

    let reason = engine_task.await??;
    info!(reason = %reason, "peer.exited");
    Ok(())
}

/// Reads stdin on a plain thread; a pending read must not block runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(INPUT_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Logs go to stderr so they never interleave with chat on stdout.
fn init_tracing(log_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
