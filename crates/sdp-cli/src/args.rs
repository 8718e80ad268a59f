//! CLI argument definitions and parsing structures (clap).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sdp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Structured Development Process runtime", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize SDP in a directory
    Init {
        /// Path to initialize (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Check project configuration and state layout
    Doctor,

    /// Recommend the next step
    Next,

    /// Record what happened to the last recommendation
    Feedback {
        /// One of: accepted, rejected, refined
        verdict: String,
    },

    /// Derive and record a lesson from a verification report
    Lesson {
        /// Workstream the report belongs to
        #[arg(long)]
        ws: String,

        /// Path to a verification report JSON
        #[arg(long)]
        report: PathBuf,
    },

    /// Execute a workstream plan through the dispatcher
    Run {
        /// Feature id (F### or F####)
        #[arg(short, long)]
        feature: String,

        /// Path to a JSON plan: an array of {"id", "depends_on"}
        #[arg(short, long)]
        plan: PathBuf,

        /// Command template per workstream; "{ws}" expands to the id
        #[arg(short, long)]
        exec: String,

        /// Parallel workstreams (clamped to 1-5)
        #[arg(short, long, default_value_t = 3)]
        concurrency: usize,
    },

    /// Drive a pull request to green
    Ci {
        /// Pull request number
        #[arg(long)]
        pr: u64,

        /// Feature id the PR belongs to
        #[arg(short, long)]
        feature: String,

        /// Max fix iterations
        #[arg(long, default_value_t = 5)]
        max_iter: u32,

        /// Pending-only rounds before escalating (0 disables)
        #[arg(long, default_value_t = 0)]
        max_pending_retries: u32,

        /// Seconds to sleep before each poll
        #[arg(long, default_value_t = 30)]
        poll_delay: u64,

        /// Seconds to sleep after a pending round
        #[arg(long, default_value_t = 30)]
        retry_delay: u64,

        /// Escalate instead of fixing
        #[arg(long)]
        no_fix: bool,
    },

    /// Inspect the evidence log
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum EvidenceCommands {
    /// Walk the hash chain and report integrity
    Verify,
    /// Export the log as CSV or JSON
    Export {
        #[arg(long, default_value = "csv")]
        format: String,
    },
    /// Totals by type, model, and date
    Stats,
    /// Show the last N events
    Tail {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}
