//! taskbridge — keep a chat platform's to-dos and a workspace database in
//! sync, both ways.
//!
//! # Usage
//!
//! ```text
//! taskbridge run
//! taskbridge status [--json]
//! taskbridge poll
//! taskbridge links [--json]
//! taskbridge stop
//! ```

mod commands;
mod connect;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{links::LinksArgs, status::StatusArgs};

#[derive(Parser, Debug)]
#[command(
    name = "taskbridge",
    version,
    about = "Bidirectional sync between a chat to-do list and a workspace database",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync daemon in the foreground (event ingest + board polling).
    Run,

    /// Query daemon runtime status over the control socket.
    Status(StatusArgs),

    /// Trigger an immediate reconciliation poll of the board.
    Poll,

    /// List persisted sync links between chat tasks and board records.
    Links(LinksArgs),

    /// Request graceful daemon shutdown.
    Stop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run => commands::daemon::run_foreground(),
        Commands::Status(args) => args.run(),
        Commands::Poll => commands::daemon::poll(),
        Commands::Links(args) => args.run(),
        Commands::Stop => commands::daemon::stop(),
    }
}
