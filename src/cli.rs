use clap::{Parser, Subcommand};
use std::path::PathBuf;

use focus_guard::catalog::Platform;

/// Focus Guard
///
/// Blocks distracting platforms for a few hours. When the block ends, an unlock
/// code is shown after a five minute wait; enter it to lift the block.
#[derive(Parser, Debug)]
#[command(name = "focusguard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Keep all state in memory (nothing survives the process)
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the platforms that can be blocked
    Platforms,
    /// Start a block session and stay attached to it
    Start {
        /// Platform to block (repeatable), e.g. -p instagram -p tiktok
        #[arg(short = 'p', long = "platform", required_unless_present = "all")]
        platforms: Vec<Platform>,

        /// Block every platform
        #[arg(long, conflicts_with = "platforms")]
        all: bool,

        /// Block duration in hours (defaults to the configured duration)
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Reattach to the session in progress
    Resume,
    /// Show the current session
    Status,
    /// Show per-platform usage reported by the backend
    Usage,
    /// Ask the backend for the permissions it needs
    Permissions,
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
