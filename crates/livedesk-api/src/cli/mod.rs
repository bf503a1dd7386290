//! CLI command definitions and dispatch for the `livedesk` binary.
//!
//! Uses clap derive macros for argument parsing. History commands follow a
//! noun-verb pattern (e.g., `livedesk sessions list`).

pub mod session;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Coordinate live chat between website visitors and support agents.
#[derive(Parser)]
#[command(name = "livedesk", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the live chat server (WebSocket channel + REST history).
    Serve {
        /// Port to listen on.
        #[arg(long, short, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Keep sessions in memory only; nothing is written to the database.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Browse persisted chat sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },

    /// Show data directory, store, and session counts.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List sessions, oldest first.
    #[command(alias = "ls")]
    List {
        /// Filter by status (waiting, active, closed).
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of sessions to show.
        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Show one session with its transcript.
    Show {
        /// Session ID.
        id: String,
    },
}
