//! warden-admin: maintenance CLI for the Warden lock tables.
//!
//! Parses arguments, loads configuration, connects to the relational lock
//! store and dispatches to the command handlers.

mod cli;
mod commands;
mod logging;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use warden_core::Configuration;
use warden_core::model::DB_URL;
use warden_persistence::SqlLockStore;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logging_guard = logging::init_logging(&cli.log_level, cli.log_dir.as_deref())?;

    let mut builder = Configuration::builder(cli.config.as_deref())?;
    if let Some(url) = cli.db_url {
        builder = builder.set_override(DB_URL, url)?;
    }
    let config = Configuration::from_config(builder.build()?);

    let url = config
        .database_url()
        .context("no database configured, pass --db-url or set db.url")?;
    let store = SqlLockStore::connect(
        &url,
        config.database_max_connections(),
        config.store_options(),
    )
    .await
    .context("failed to connect to the lock store")?;
    tracing::debug!(max_connections = config.database_max_connections(), "Lock store connected");

    let output = commands::dispatch(cli.command, Arc::new(store), &config).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output.json)?);
    } else {
        println!("{}", output.text);
    }

    Ok(())
}
