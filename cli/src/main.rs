// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # NFS Broker
//!
//! The `nfsbroker` binary serves the service broker API for pre-existing
//! NFS (or, with `--broker-type smb`, SMB) shares.
//!
//! ## Commands
//!
//! - `nfsbroker [serve]` - Run the broker (the default when no command is given)
//! - `nfsbroker resolve --share <share> [--params <json>]` - Resolve mount
//!   options against the configured policy without starting a server
//!
//! Flags fall back to `NFSBROKER_*` environment variables; a `.env` file in
//! the working directory is loaded first.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use nfsbroker::commands::{self, ResolveArgs};
use nfsbroker::config::{BrokerArgs, MaskArgs};
use nfsbroker::server;

/// Service broker for existing NFS and SMB shares
#[derive(Parser)]
#[command(name = "nfsbroker")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "NFSBROKER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "NFSBROKER_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Compact
    )]
    log_format: LogFormat,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(flatten)]
    mask: MaskArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the service broker API
    #[command(name = "serve")]
    Serve,

    /// Resolve mount options for a share without starting the broker
    #[command(name = "resolve")]
    Resolve(ResolveArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command {
        None | Some(Commands::Serve) => server::start_broker(&cli.broker, &cli.mask).await,
        Some(Commands::Resolve(args)) => commands::resolve::handle_command(&cli.mask, args),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
