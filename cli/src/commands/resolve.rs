// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dry-run mount option resolution
//!
//! Builds the mask from the same flags the server uses and resolves one
//! share plus bind parameters, without touching any store.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use nfsbroker_core::domain::mount_options::OptionValue;
use nfsbroker_core::domain::service::SHARE_KEY;

use crate::config::MaskArgs;

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Share as given at provision time, optionally with ?key=value options
    #[arg(long)]
    pub share: String,

    /// Bind parameters as a JSON object
    #[arg(long, value_name = "JSON")]
    pub params: Option<String>,

    /// Prefix for the rendered driver arguments
    #[arg(long, default_value = "--", allow_hyphen_values = true)]
    pub prefix: String,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct Resolution {
    pub mount_config: BTreeMap<String, String>,
    pub cli_args: Vec<String>,
}

pub fn resolve(mask_args: &MaskArgs, args: &ResolveArgs) -> Result<Resolution> {
    let mask = mask_args.build_mask()?;

    let mut raw = match &args.params {
        Some(json) => {
            let value: serde_json::Value =
                serde_json::from_str(json).context("--params is not valid JSON")?;
            let object = value
                .as_object()
                .context("--params must be a JSON object")?;
            OptionValue::map_from_json(object)
        }
        None => BTreeMap::new(),
    };
    raw.insert(SHARE_KEY.to_string(), OptionValue::from(args.share.as_str()));

    let working = mask.resolve_working_set(&raw)?;
    Ok(Resolution {
        mount_config: working.to_config(),
        cli_args: working.to_cli_args(&args.prefix),
    })
}

pub fn handle_command(mask_args: &MaskArgs, args: ResolveArgs) -> Result<()> {
    let resolution = resolve(mask_args, &args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }

    println!("{}", "Resolved mount configuration:".bold());
    for (key, value) in &resolution.mount_config {
        println!("  {} = {}", key.cyan(), value);
    }
    println!();
    println!("{} {}", "Driver arguments:".bold(), resolution.cli_args.join(" "));
    Ok(())
}
