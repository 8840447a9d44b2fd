//! `taskbridge run` / `poll` / `stop` — daemon lifecycle over the control
//! socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use taskbridge_core::config;
use taskbridge_daemon::{request_poll, request_stop, start_blocking, DaemonError};
use taskbridge_sync::LogSink;

use crate::connect::{HttpBoardClient, HttpChatClient};

/// Run the daemon in the foreground with the live HTTP clients.
pub fn run_foreground() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let config = config::load_at(&home).context("failed to load configuration")?;

    let chat = Arc::new(HttpChatClient::new(&config.chat));
    let board = Arc::new(HttpBoardClient::new(&config.board));

    start_blocking(&home, config, chat, board, Arc::new(LogSink))
        .context("daemon exited with error")
}

/// Ask the running daemon for an immediate board poll and report its summary.
pub fn poll() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    match request_poll(&home) {
        Ok(summary) => {
            let written = summary["written"].as_u64().unwrap_or(0);
            let unchanged = summary["unchanged"].as_u64().unwrap_or(0);
            let unresolved = summary["unresolved"].as_u64().unwrap_or(0);
            let aborted = summary["aborted"].as_bool().unwrap_or(false);
            println!(
                "{}: {written} written, {unchanged} unchanged, {unresolved} unresolved{}",
                "poll complete".green(),
                if aborted { " (aborted at deadline)" } else { "" },
            );
            Ok(())
        }
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("daemon is not running");
            Ok(())
        }
        Err(err) => Err(err).context("failed to trigger poll"),
    }
}

/// Request graceful shutdown.
pub fn stop() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    match request_stop(&home) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("daemon is not running");
        }
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}
