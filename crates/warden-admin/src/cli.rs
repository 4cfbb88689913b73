//! Command line definition for warden-admin

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Maintenance tool for the Warden lock tables.
///
/// Connects to the relational lock store and inspects or repairs exclusive,
/// tree and shared locks.
#[derive(Parser, Debug)]
#[command(name = "warden-admin")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "WARDEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Database URL, overrides `db.url`
    #[arg(long = "db-url", env = "WARDEN_DB__URL", global = true)]
    pub db_url: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Log filter, e.g. `info` or `warden_persistence=debug`
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Also write daily-rolling log files into this directory
    #[arg(long, env = "WARDEN_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the lock tables and indexes when missing
    Install,

    /// Shared lock maintenance
    #[command(subcommand)]
    Shared(SharedAction),

    /// Tree lock maintenance
    #[command(subcommand)]
    Tree(TreeAction),

    /// Exclusive lock inspection
    #[command(subcommand)]
    Exclusive(ExclusiveAction),
}

#[derive(Subcommand, Debug)]
pub enum SharedAction {
    /// Delete expired shared locks
    Cleanup,

    /// Delete every shared lock.
    ///
    /// Requires --force to prevent accidental wipes.
    RemoveAll {
        #[arg(long)]
        force: bool,
    },

    /// Show the token of a content item's shared lock
    Get { content_id: i32 },

    /// Purge expired shared locks every `lock.shared.cleanup_interval_secs`
    /// until interrupted
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum TreeAction {
    /// List every live path lock
    List,

    /// Release path locks by id
    Release {
        #[arg(required = true)]
        lock_ids: Vec<i32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ExclusiveAction {
    /// Whether a live lease exists for the key
    Status { key: String },
}
