//! CLI module for the PMP cache
//!
//! Runs one cache operation per invocation against a configured store.
//! Mostly useful with persistent drivers (`file`, `redis`); the in-memory
//! store lives only as long as the process.

pub mod cache;

use clap::{Parser, Subcommand};

/// PMP Cache - inspect and modify configured cache stores
#[derive(Debug, Parser)]
#[command(name = "pmp-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Store to operate on (defaults to the configured default store)
    #[arg(long, global = true)]
    pub store: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the value stored under a key as JSON
    Get { key: String },

    /// Store a value; parsed as JSON, otherwise stored as a string
    Put {
        key: String,
        value: String,
        /// Time to live in seconds (stored forever when omitted)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Remove a key
    Forget { key: String },

    /// Remove every entry from the store
    Flush,

    /// Increment an integer counter
    Incr {
        key: String,
        #[arg(long, default_value_t = 1)]
        by: i64,
    },

    /// Decrement an integer counter
    Decr {
        key: String,
        #[arg(long, default_value_t = 1)]
        by: i64,
    },

    /// List configured stores
    Stores,
}
