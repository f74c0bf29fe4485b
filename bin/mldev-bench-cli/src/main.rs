// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # mldev-bench
//!
//! Command-line driver for the inference pipeline benchmark.
//!
//! ## Usage
//! ```bash
//! # One model, 10k repetitions, against the simulated device
//! mldev-bench inference --model ./models/mnist.toml --input ./data/mnist.in --repetitions 10000
//!
//! # Several models from a config file, metrics as JSON
//! mldev-bench --config bench.toml inference --json
//!
//! # Device and host capabilities
//! mldev-bench info
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mldev-bench",
    about = "Multi-core inference request pipeline benchmark",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (overrides CLI arguments).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enqueue/dequeue inference benchmark.
    Inference(commands::inference::InferenceArgs),

    /// Display device capabilities and worker core resolution.
    Info,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Inference(args) => commands::inference::execute(cli.config, args),
        Commands::Info => commands::info::execute(cli.config),
    }
}
