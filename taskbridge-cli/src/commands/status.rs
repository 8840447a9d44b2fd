//! `taskbridge status` — daemon runtime visibility.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use taskbridge_daemon::{paths::socket_path, request_status, DaemonError};

/// Arguments for `taskbridge status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        match request_status(&home) {
            Ok(status) => {
                if self.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&status)
                            .context("failed to render status JSON")?
                    );
                    return Ok(());
                }
                print_human(&status);
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    let payload = serde_json::json!({
                        "running": false,
                        "socket": socket_path(&home).display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render status JSON")?
                    );
                } else {
                    println!(
                        "daemon is {} (socket: {})",
                        "not running".red(),
                        socket_path(&home).display()
                    );
                }
                Ok(())
            }
            Err(err) => Err(err).context("failed to query daemon status"),
        }
    }
}

fn print_human(status: &serde_json::Value) {
    println!("daemon is {}", "running".green());
    println!(
        "  links: {} ({} tombstoned)",
        status["links"].as_u64().unwrap_or(0),
        status["tombstoned"].as_u64().unwrap_or(0),
    );
    println!(
        "  last poll: {}",
        format_age(status["last_poll_at_unix"].as_u64().unwrap_or(0))
    );
    println!(
        "  last event: {}",
        format_age(status["last_event_at_unix"].as_u64().unwrap_or(0))
    );

    let counters = &status["counters"];
    println!(
        "  since start: {} written, {} unchanged, {} tombstoned, {} unresolved, {} malformed, {} errors",
        counters["written"].as_u64().unwrap_or(0),
        counters["unchanged"].as_u64().unwrap_or(0),
        counters["tombstoned"].as_u64().unwrap_or(0),
        counters["unresolved"].as_u64().unwrap_or(0),
        counters["malformed"].as_u64().unwrap_or(0),
        counters["errors"].as_u64().unwrap_or(0),
    );
}

fn format_age(at_unix: u64) -> String {
    if at_unix == 0 {
        return "never".to_string();
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let age = now.saturating_sub(at_unix);
    if age < 60 {
        format!("{age}s ago")
    } else if age < 3600 {
        format!("{}m ago", age / 60)
    } else {
        format!("{}h ago", age / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timestamp_formats_as_never() {
        assert_eq!(format_age(0), "never");
    }

    #[test]
    fn recent_timestamp_formats_in_seconds() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let formatted = format_age(now - 5);
        assert!(formatted.ends_with("s ago"), "got {formatted}");
    }
}
