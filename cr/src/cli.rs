//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// codereload - recompile and hot-swap a running server per request
#[derive(Parser)]
#[command(
    name = "cr",
    about = "Per-request recompile and hot-swap coordinator",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator and serve reload requests on the socket
    Serve {
        /// Socket path (overrides config)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Reload on behalf of a subject and print the build output
    Reload {
        /// Subject to reload (usually the unit serving the request)
        subject: String,

        /// Build in this process instead of asking a running server
        #[arg(long)]
        local: bool,

        /// Socket path (overrides config)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Check whether symlinks can be created in the build directory
    Probe {
        /// Directory to probe (defaults to the build output directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Check if a reload server is alive
    Ping {
        /// Socket path (overrides config)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Ask a running reload server to stop
    Stop {
        /// Socket path (overrides config)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codereload")
        .join("logs")
        .join("codereload.log")
}
