//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agentchain - multi-agent code generation workflow orchestrator
#[derive(Parser)]
#[command(
    name = "agentchain",
    about = "Multi-agent code generation workflow orchestrator",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run a workflow for a task
    Run {
        /// Task description
        task: String,

        /// Chain to run (standard, minimal, prototype, quality)
        #[arg(long)]
        chain: Option<String>,

        /// Override the output base directory
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },

    /// List the available chain configurations
    Chains,

    /// Query the execution log
    Memory {
        /// Similarity query text
        query: Option<String>,

        /// Filter by worker name
        #[arg(short, long)]
        agent: Option<String>,

        /// Only successful executions
        #[arg(long)]
        success_only: bool,

        /// Show aggregate statistics instead of records
        #[arg(long)]
        stats: bool,

        /// Maximum records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}
