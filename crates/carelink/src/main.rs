// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Carelink - identity-verification and health-data-collection orchestrator.
//!
//! Binary entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod serve;
mod shutdown;
mod status;

/// Carelink session orchestrator.
#[derive(Parser, Debug)]
#[command(name = "carelink", version, about, long_about = None)]
struct Cli {
    /// Path to an explicit configuration file (skips the XDG lookup).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator server.
    Serve,
    /// Show whether a running server is healthy.
    Status {
        /// Output structured JSON for scripting.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => carelink_config::load_and_validate_path(path),
        None => carelink_config::load_and_validate(),
    };
    let config = match config {
        Ok(config) => config,
        Err(errors) => {
            carelink_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Status { json }) => status::run_status(&config, json).await,
        None => {
            println!("carelink: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
