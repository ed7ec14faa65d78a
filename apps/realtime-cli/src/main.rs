//! Realtime terminal client entry point.
//!
//! Keeps the realtime channel open, prints every event, and accepts a few
//! commands on stdin:
//!
//! - `:connect`, `:disconnect`, `:state`
//! - `:history`, `:clear`
//! - `:quit`
//! - any other line is sent as a JSON frame.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use realtime_connection::{ConnectionEvent, RealtimeManager};

use crate::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting realtime client"
    );

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => ClientConfig::load_from(&path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_overrides(|key| std::env::var(key).ok()),
        None => ClientConfig::load().context("loading configuration")?,
    };
    tracing::info!(url = %config.url, "configuration loaded");

    let manager = RealtimeManager::new(config.manager_config());
    let mut events = manager
        .take_events()
        .await
        .context("event stream already taken")?;

    match config.credential() {
        Some(token) => manager.set_credential(Some(token)),
        None => tracing::warn!(
            "no credential configured; set `token` in the config file or {}",
            config::TOKEN_ENV
        ),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            Some(event) = events.recv() => print_event(&event),

            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if !handle_line(&manager, line.trim()) {
                    break;
                }
            }
        }
    }

    manager.shutdown().await;
    tracing::info!("realtime client stopped");
    Ok(())
}

/// Runs one stdin command. Returns `false` to quit.
fn handle_line(manager: &RealtimeManager, line: &str) -> bool {
    match line {
        "" => {}
        ":quit" => return false,
        ":connect" => manager.connect(),
        ":disconnect" => manager.disconnect(),
        ":state" => {
            println!(
                "state: {} (reconnect attempt {})",
                manager.state(),
                manager.reconnect_attempt()
            );
            if let Some(error) = manager.last_error() {
                println!("last error: {error}");
            }
        }
        ":history" => {
            for message in manager.history() {
                println!(
                    "{} {} {}",
                    message.timestamp.to_rfc3339(),
                    message.msg_type,
                    message.data
                );
            }
        }
        ":clear" => manager.clear_history(),
        raw => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(frame) => {
                if !manager.send(&frame) {
                    println!("not connected, frame dropped");
                }
            }
            Err(e) => println!("not JSON: {e}"),
        },
    }
    true
}

fn print_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged(state) => println!("[state] {state}"),
        ConnectionEvent::Reconnecting { attempt, delay } => {
            println!("[reconnect] attempt {attempt} in {} ms", delay.as_millis());
        }
        ConnectionEvent::RetriesExhausted { attempts } => {
            println!("[reconnect] gave up after {attempts} attempts; type :connect to retry");
        }
        ConnectionEvent::Notification(n) => println!("[{:?}] {}", n.severity, n.message),
        ConnectionEvent::Progress(p) => println!(
            "[progress] {} {}",
            p.job_id.as_deref().unwrap_or("-"),
            p.data
        ),
        ConnectionEvent::Message(m) => println!("[message] {}", m.msg_type),
    }
}
