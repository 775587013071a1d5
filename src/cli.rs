// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "nuvio-agent",
    version,
    about = "Local device agent for the Nuvio web console"
)]
pub struct Cli {
    /// Explicit config file (merged over the default search paths).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the first port to try (default 8843).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not open the browser on the status page after startup.
    #[arg(long)]
    pub no_browser: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective configuration after merging all layers.
    ShowConfig,
    /// Discard the persisted token and generate a new one.
    RegenerateToken,
}
