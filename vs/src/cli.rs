//! CLI argument parsing for vectorstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vs")]
#[command(author, version, about = "File-backed similarity memory store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a record from stdin or an argument
    Add {
        /// Record content (reads stdin when omitted)
        content: Option<String>,

        /// Metadata entries as key=value pairs
        #[arg(short, long)]
        meta: Vec<String>,
    },

    /// Query for the closest records
    Query {
        /// Query text
        #[arg(required = true)]
        text: String,

        /// Maximum results to return
        #[arg(short = 'k', long, default_value_t = crate::DEFAULT_TOP_K)]
        top_k: usize,
    },

    /// List stored records
    List {
        /// Maximum records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show store statistics
    Stats,

    /// Delete a single record by id
    Delete {
        /// Record id to delete
        #[arg(required = true)]
        id: String,
    },

    /// Delete all records
    Clear,
}
