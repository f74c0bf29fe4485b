// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mldev-bench inference` command: run the benchmark end to end.
//!
//! ```text
//! setup → load_models → build_io(each fid) → run → collect_result → teardown
//! ```

use anyhow::Context;
use inference_bench::{BenchConfig, FileEntry, InferenceBench, RunMetrics, TestResult};
use io_pool::PoolStats;
use ml_device::SimDevice;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args)]
pub struct InferenceArgs {
    /// Model description file (repeat for several models).
    #[arg(short, long)]
    model: Vec<PathBuf>,

    /// Raw input file, one per model.
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// Raw output file, one per model (optional).
    #[arg(short, long)]
    output: Vec<PathBuf>,

    /// Rounds over the model list.
    #[arg(short, long, default_value_t = 1)]
    repetitions: u64,

    /// Device queue pair.
    #[arg(long, default_value_t = 0)]
    queue_pair: u16,

    /// Worker cores (comma-separated). Defaults to every core but 0.
    #[arg(long, value_delimiter = ',')]
    lcores: Option<Vec<usize>>,

    /// Do not pin workers to their cores.
    #[arg(long)]
    no_pin: bool,

    /// Give up after this many spins on a pool or queue.
    #[arg(long)]
    max_spins: Option<u64>,

    /// Simulated device: fail every n-th operation.
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    /// Print run metrics as JSON.
    #[arg(long)]
    json: bool,
}

impl InferenceArgs {
    fn to_config(&self) -> anyhow::Result<BenchConfig> {
        if self.model.is_empty() {
            anyhow::bail!("no model given: use --model/--input or --config");
        }
        if self.model.len() != self.input.len() {
            anyhow::bail!(
                "{} model(s) but {} input file(s)",
                self.model.len(),
                self.input.len()
            );
        }
        if !self.output.is_empty() && self.output.len() != self.model.len() {
            anyhow::bail!(
                "{} model(s) but {} output file(s)",
                self.model.len(),
                self.output.len()
            );
        }

        let filelist = self
            .model
            .iter()
            .zip(&self.input)
            .enumerate()
            .map(|(fid, (model, input))| FileEntry {
                model: model.clone(),
                input: input.clone(),
                output: self.output.get(fid).cloned(),
            })
            .collect();

        Ok(BenchConfig {
            repetitions: self.repetitions,
            queue_pair: self.queue_pair,
            worker_lcores: self.lcores.clone(),
            pin_threads: !self.no_pin,
            max_spins: self.max_spins,
            filelist,
            ..Default::default()
        })
    }
}

#[derive(serde::Serialize)]
struct ModelReport {
    fid: u16,
    name: String,
    result: TestResult,
    pool: Option<PoolStats>,
    output: Option<PathBuf>,
}

#[derive(serde::Serialize)]
struct Report {
    metrics: RunMetrics,
    models: Vec<ModelReport>,
    used: u64,
    errors: u64,
}

pub fn execute(config_path: Option<PathBuf>, args: InferenceArgs) -> anyhow::Result<()> {
    let config = match &config_path {
        Some(path) => BenchConfig::from_file(path)?,
        None => args.to_config()?,
    };
    config.dump();
    config.validate()?;

    let device = SimDevice::default().with_fail_every(args.fail_every);
    let mut bench = InferenceBench::setup(Arc::new(device), config)?;

    let outcome = drive(&mut bench);
    let teardown = bench.teardown();
    let report = outcome?;
    teardown.context("teardown failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    let failed = report
        .models
        .iter()
        .filter(|m| !m.result.is_success())
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} model(s) FAILED");
    }
    Ok(())
}

/// Runs every stage between setup and teardown.
fn drive(bench: &mut InferenceBench<SimDevice>) -> anyhow::Result<Report> {
    bench.load_models().context("loading models")?;

    let nb_models = u16::try_from(bench.models().len())?;
    for fid in 0..nb_models {
        bench
            .build_io(fid)
            .with_context(|| format!("building io for model {fid}"))?;
    }
    bench.mem_setup()?;

    let repetitions = bench.config().repetitions;
    tracing::info!("running {nb_models} model(s), {repetitions} repetition(s)");
    let metrics = bench.run(0..=nb_models.saturating_sub(1), repetitions)?;

    let mut models = Vec::with_capacity(usize::from(nb_models));
    for fid in 0..nb_models {
        let result = bench.collect_result(fid)?;
        let output = bench.write_output(fid)?;
        let model = bench.model(fid).context("model vanished")?;
        models.push(ModelReport {
            fid,
            name: model.name().to_string(),
            result,
            pool: model.pool_stats(),
            output,
        });
    }

    Ok(Report {
        metrics,
        models,
        used: bench.nb_used(),
        errors: bench.total_errors(),
    })
}

fn print_report(report: &Report) {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║          mldev-bench · Inference Pipeline            ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Workers ────────────────────────────────────────────────
    println!("  Workers");
    for w in &report.metrics.workers {
        println!(
            "   lcore {:>3}  {:<8} ops {:>10}  errors {:>6}{}",
            w.lcore,
            w.role.to_string(),
            w.ops,
            w.errors,
            if w.stalled { "  (stalled)" } else { "" }
        );
    }
    println!();

    // ── Models ─────────────────────────────────────────────────
    println!("  Models");
    for m in &report.models {
        let pool = m
            .pool
            .as_ref()
            .map(PoolStats::summary)
            .unwrap_or_else(|| "no pool".into());
        println!("   [{}] {:<20} {:<8} {pool}", m.fid, m.name, m.result.to_string());
        if let Some(path) = &m.output {
            println!("       output -> {}", path.display());
        }
    }
    println!();

    println!("  Used buffers: {}, errors: {}", report.used, report.errors);
    println!("{}", report.metrics.summary());
}
