// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mldev-bench info` command: display device capabilities and the cores
//! workers would run on.

use inference_bench::BenchConfig;
use ml_device::{MlDevice, SimDevice};
use std::path::PathBuf;

pub fn execute(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match &config_path {
        Some(path) => BenchConfig::from_file(path)?,
        None => BenchConfig::default(),
    };
    let info = SimDevice::default().info();

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              mldev-bench · Device Info               ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    println!("  Device");
    println!("   Driver:       {}", info.driver_name);
    println!("   Max models:   {}", info.max_models);
    println!("   Queue pairs:  {}", info.max_queue_pairs);
    println!("   Descriptors:  {}", info.max_desc);
    println!("   Alignment:    {} bytes", info.min_align_size);
    println!();

    let lcores = config.resolve_worker_lcores();
    println!("  Host");
    println!("   Worker cores: {lcores:?}");
    if lcores.len() < 2 {
        println!("   WARNING: at least 2 worker cores are required");
    } else {
        println!("   Enqueue on {}, dequeue on {}", lcores[0], lcores[1]);
    }
    if !config.filelist.is_empty() {
        println!("   Models:       {} configured", config.filelist.len());
        if config.filelist.len() > info.max_models {
            println!("   WARNING: more models than the device supports");
        }
    }

    Ok(())
}
