// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: run the pipeline against the simulated device.
//!
//! Writes two model descriptions and their inputs to a temporary directory,
//! then compares a clean device with one that injects failures.
//!
//! ```bash
//! cargo run -p inference-bench --example sim_run
//! ```

use inference_bench::{BenchConfig, FileEntry, InferenceBench};
use ml_device::{SimDevice, SimModel};
use std::path::Path;
use std::sync::Arc;

const REPETITIONS: u64 = 10_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let dir = std::env::temp_dir().join(format!("mldev-sim-run-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;

    let filelist = vec![
        write_model(&dir, "echo", &SimModel::passthrough("echo", 1, 784))?,
        write_model(&dir, "int8", &SimModel::int8("int8", 4, 256, 0.05))?,
    ];
    let config = BenchConfig {
        repetitions: REPETITIONS,
        worker_lcores: Some(vec![1, 2]),
        pin_threads: false,
        filelist,
        ..Default::default()
    };

    println!("{:<12} {:>10} {:>8} {:>14}  verdict", "device", "completed", "errors", "ops/s");
    println!("{}", "-".repeat(58));

    for (label, device) in [
        ("clean", SimDevice::default()),
        ("fail/1000", SimDevice::default().with_fail_every(1000)),
    ] {
        let mut bench = InferenceBench::setup(Arc::new(device), config.clone())?;
        bench.load_models()?;
        for fid in 0..2 {
            bench.build_io(fid)?;
        }

        let metrics = bench.run(0..=1, REPETITIONS)?;
        let verdicts: Vec<String> = (0..2)
            .map(|fid| bench.collect_result(fid).map(|v| v.to_string()))
            .collect::<Result<_, _>>()?;
        bench.teardown()?;

        println!(
            "{:<12} {:>10} {:>8} {:>14.0}  {}",
            label,
            metrics.completed(),
            metrics.errors(),
            metrics.ops_per_second(),
            verdicts.join("/"),
        );
    }

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

/// Writes a model description and a ramp input sized for it.
fn write_model(
    dir: &Path,
    tag: &str,
    model: &SimModel,
) -> Result<FileEntry, Box<dyn std::error::Error>> {
    let model_path = dir.join(format!("{tag}.toml"));
    let input_path = dir.join(format!("{tag}.in"));

    std::fs::write(&model_path, model.to_toml()?)?;
    let elems = model.input_elems * model.batch_size as usize;
    let raw: Vec<u8> = (0..elems)
        .flat_map(|i| ((i % 64) as f32 * 0.1).to_le_bytes())
        .collect();
    std::fs::write(&input_path, raw)?;

    Ok(FileEntry {
        model: model_path,
        input: input_path,
        output: None,
    })
}
