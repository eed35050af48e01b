//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pool of workers. SIGHUP restarts the pool, SIGTERM/SIGINT stop it.
    Pool {
        /// Worker program
        program: PathBuf,

        /// Number of workers (defaults to the CPU count)
        #[arg(long, value_name = "N")]
        count: Option<usize>,

        /// Workers handshake with {"status": "started"} and drain on stop
        #[arg(long)]
        enhanced: bool,

        /// Recycle a worker after this many requests
        #[arg(long, value_name = "N")]
        max_connections: Option<u64>,

        /// Milliseconds to wait for workers to stop before killing them
        #[arg(long, value_name = "MS")]
        stop_timeout: Option<u64>,

        /// Arguments passed to every worker
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Supervise a single child until SIGTERM/SIGINT
    Child {
        /// Child program
        program: PathBuf,

        /// Do not restart the child when it exits unexpectedly
        #[arg(long)]
        no_respawn: bool,

        /// Milliseconds to wait for the child to stop before killing it
        #[arg(long, value_name = "MS")]
        stop_timeout: Option<u64>,

        /// Arguments passed to the child
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Run a child that handshakes once and exits
    RunOnce {
        /// Child program
        program: PathBuf,

        /// Kill the child if it has not finished after this many milliseconds
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Arguments passed to the child
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        config_file: PathBuf,
    },

    /// Print a sample configuration, or write it to a file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}
