// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The benchmark handle and its setup → run → verdict pipeline.
//!
//! ```text
//! InferenceBench::setup()        capability checks, one Model per entry
//!     │  .load_models()          load + start through the device
//!     │  .build_io(fid)          staging, input file, private io pool
//!     │  .mem_setup()            shared operation pool (run() does it lazily)
//!     ▼
//!   .run(fids, reps)             one enqueue + one dequeue worker, joined
//!     │
//!     ▼
//!   .collect_result(fid)         dequantize used buffers, SUCCESS / FAILED
//!   .write_output(fid)
//!   .teardown()                  idempotent
//! ```
//!
//! The model registry is only mutated between runs. During `run` the
//! workers see it through shared references.

use crate::launcher;
use crate::model::{Model, ModelState, RawStaging};
use crate::worker::{self, SpinLimit, WorkerCtx};
use crate::{BenchConfig, BenchError, RunMetrics};
use io_pool::{IoLayout, ObjectPool, PoolError, PoolStats, RequestBuffer, MAX_POOL_SIZE};
use ml_device::{DeviceInfo, MlDevice, Operation};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

/// Name of the shared operation pool.
const OP_POOL_NAME: &str = "ml_test_op_pool";

/// Spin bound for recovering stale completions when `max_spins` is unset.
const DRAIN_MAX_SPINS: u64 = 1 << 20;

// ── Verdict ────────────────────────────────────────────────────

/// Pass/fail verdict for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TestResult {
    Success,
    Failed,
}

impl TestResult {
    pub fn is_success(&self) -> bool {
        *self == TestResult::Success
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestResult::Success => f.write_str("SUCCESS"),
            TestResult::Failed => f.write_str("FAILED"),
        }
    }
}

// ── Benchmark handle ───────────────────────────────────────────

/// One inference benchmark against one device.
///
/// # Example
/// ```no_run
/// use inference_bench::{BenchConfig, InferenceBench};
/// use ml_device::SimDevice;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), inference_bench::BenchError> {
/// let config = BenchConfig::from_file("bench.toml".as_ref())?;
/// let reps = config.repetitions;
/// let mut bench = InferenceBench::setup(Arc::new(SimDevice::default()), config)?;
/// bench.load_models()?;
/// bench.build_io(0)?;
/// let metrics = bench.run(0..=0, reps)?;
/// println!("{}", metrics.summary());
/// println!("{}", bench.collect_result(0)?);
/// bench.teardown()?;
/// # Ok(())
/// # }
/// ```
pub struct InferenceBench<D: MlDevice> {
    device: Arc<D>,
    config: BenchConfig,
    info: DeviceInfo,
    worker_lcores: Vec<usize>,
    models: Vec<Model>,
    op_pool: Option<ObjectPool<Operation>>,
    /// Error count per worker core, accumulated over runs.
    error_count: BTreeMap<usize, u64>,
    nb_used: u64,
    last_run: Option<RunMetrics>,
    /// Operations a stalled run left in the device that could not be
    /// recovered.
    undrained: u64,
}

impl<D: MlDevice> InferenceBench<D> {
    /// Checks device and host capabilities and creates one model entry per
    /// filelist entry. Nothing is loaded or allocated yet.
    pub fn setup(device: Arc<D>, config: BenchConfig) -> Result<Self, BenchError> {
        let info = device.info();

        if config.filelist.len() > info.max_models {
            return Err(BenchError::Capability(format!(
                "too many models: nb_filelist = {}, max_models = {}",
                config.filelist.len(),
                info.max_models
            )));
        }
        if config.queue_pair >= info.max_queue_pairs {
            return Err(BenchError::Capability(format!(
                "queue pair {} not available, device has {}",
                config.queue_pair, info.max_queue_pairs
            )));
        }

        let worker_lcores = config.resolve_worker_lcores();
        if worker_lcores.len() < 2 {
            return Err(BenchError::Capability(format!(
                "{} worker lcore(s) available, 2 required",
                worker_lcores.len()
            )));
        }

        let models = config
            .filelist
            .iter()
            .enumerate()
            .map(|(fid, entry)| {
                u16::try_from(fid)
                    .map(|fid| Model::new(fid, entry.clone()))
                    .map_err(|_| BenchError::Config(format!("filelist id {fid} out of range")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            "setup: {} model(s) on device '{}', worker lcores {:?}",
            models.len(),
            info.driver_name,
            worker_lcores
        );

        Ok(Self {
            device,
            config,
            info,
            worker_lcores,
            models,
            op_pool: None,
            error_count: BTreeMap::new(),
            nb_used: 0,
            last_run: None,
            undrained: 0,
        })
    }

    /// Loads and starts every model that is not loaded yet.
    ///
    /// The state recorded for each model is the one the device accepted.
    pub fn load_models(&mut self) -> Result<(), BenchError> {
        for model in self.models.iter_mut().filter(|m| m.handle.is_none()) {
            let handle = self.device.load_model(&model.files.model)?;
            model.handle = Some(handle);
            model.state = ModelState::Loaded;

            let info = self.device.model_info(handle)?;
            model.name = info.name;
            model.batch_size = info.batch_size;

            self.device.start_model(handle)?;
            model.state = ModelState::Started;

            tracing::info!(
                "model {}: '{}' loaded as {handle}, batch_size = {}",
                model.fid,
                model.name,
                model.batch_size
            );
        }
        Ok(())
    }

    /// Creates the shared operation pool. No-op if it already exists.
    pub fn mem_setup(&mut self) -> Result<(), BenchError> {
        if self.op_pool.is_some() {
            return Ok(());
        }
        let pool = ObjectPool::with_factory(OP_POOL_NAME, MAX_POOL_SIZE, |_| {
            Ok::<_, PoolError>(Operation::new())
        })?;
        tracing::debug!("operation pool '{}' created, {} ops", pool.name(), pool.capacity());
        self.op_pool = Some(pool);
        Ok(())
    }

    /// Builds staging memory and the private request-buffer pool of `fid`.
    ///
    /// The raw input file must be exactly the model's raw input size. Every
    /// pooled buffer gets a quantized copy of the raw input. Nothing is
    /// attached to the model unless every step succeeds.
    pub fn build_io(&mut self, fid: u16) -> Result<(), BenchError> {
        let model = self.model_ref(fid)?;
        if model.io_pool.is_some() {
            tracing::debug!("model {fid}: io already built");
            return Ok(());
        }
        let handle = model.handle.ok_or_else(|| BenchError::NotReady {
            fid,
            detail: "model not loaded".into(),
        })?;
        let batch_size = model.batch_size;

        let sizes = self.device.io_sizes(handle, batch_size)?;
        let layout = IoLayout::new(sizes.input_qsize, sizes.output_qsize, self.info.min_align_size)?;
        tracing::debug!(
            "model {fid}: qsize in/out = {}/{}, dsize in/out = {}/{}, buffer = {} bytes",
            sizes.input_qsize,
            sizes.output_qsize,
            sizes.input_dsize,
            sizes.output_dsize,
            layout.total_len()
        );

        let mut staging = RawStaging::new(sizes.input_dsize, sizes.output_dsize)?;
        read_exact_input(&model.files.input, staging.input_mut())?;

        let nb_buffers = MAX_POOL_SIZE
            .min(usize::try_from(self.config.repetitions).unwrap_or(usize::MAX))
            .max(1);
        let device = &self.device;
        let raw_input = staging.input();
        let pool = ObjectPool::with_factory(format!("ml_io_pool_{fid}"), nb_buffers, |_| {
            let mut req = RequestBuffer::new(layout)?;
            device.quantize(handle, batch_size, raw_input, req.input_mut())?;
            Ok::<_, BenchError>(req)
        })?;
        tracing::debug!("model {fid}: io pool '{}' created, {nb_buffers} buffers", pool.name());

        let model = self.model_mut(fid)?;
        model.sizes = Some(sizes);
        model.layout = Some(layout);
        model.staging = Some(staging);
        model.io_pool = Some(pool);
        Ok(())
    }

    /// Runs one enqueue and one dequeue worker over `fids` and blocks until
    /// both have joined.
    ///
    /// Completions a stalled run left in the device are recovered before
    /// workers start, so the dequeue side only counts this run's
    /// operations. Fails with [`BenchError::Undrained`] if some cannot be.
    pub fn run(
        &mut self,
        fids: RangeInclusive<u16>,
        repetitions: u64,
    ) -> Result<RunMetrics, BenchError> {
        let (start_fid, end_fid) = (*fids.start(), *fids.end());
        if fids.is_empty() || usize::from(end_fid) >= self.models.len() {
            return Err(BenchError::Config(format!(
                "invalid model range {start_fid}..={end_fid} for {} model(s)",
                self.models.len()
            )));
        }
        for fid in fids.clone() {
            let model = self.model_ref(fid)?;
            if model.handle.is_none() || model.io_pool.is_none() {
                return Err(BenchError::NotReady {
                    fid,
                    detail: "io pool not built".into(),
                });
            }
        }
        self.mem_setup()?;
        let outstanding = self.drain_stale();
        if outstanding > 0 {
            return Err(BenchError::Undrained { outstanding });
        }

        let op_pool = self.op_pool.as_ref().ok_or_else(|| {
            BenchError::Pool(PoolError::ZeroCapacity {
                pool: OP_POOL_NAME.into(),
            })
        })?;
        let abort = AtomicBool::new(false);
        let ctx = WorkerCtx {
            device: self.device.as_ref(),
            models: &self.models,
            op_pool,
            qp_id: self.config.queue_pair,
            spin: self.config.max_spins.into(),
            abort: &abort,
        };
        let plan = launcher::assign(&self.worker_lcores, start_fid, end_fid, repetitions);

        tracing::info!(
            "run: models {start_fid}..={end_fid}, {repetitions} repetition(s), {} worker(s)",
            plan.len()
        );
        let started = Instant::now();
        let launched = launcher::launch(&ctx, &plan, self.config.pin_threads);
        let duration = started.elapsed();
        self.drain_stale();
        let workers = launched?;

        for report in &workers {
            *self.error_count.entry(report.lcore).or_default() += report.errors;
        }

        let metrics = RunMetrics {
            start_fid,
            end_fid,
            repetitions,
            workers,
            duration,
        };
        tracing::info!("{}", metrics.summary());
        self.last_run = Some(metrics.clone());
        Ok(metrics)
    }

    /// Dequantizes every buffer of `fid` that was dispatched at least once
    /// into the raw output staging area and returns the verdict.
    ///
    /// SUCCESS iff at least one buffer was used, no worker recorded an
    /// error, the last run did not stall, and no operation is still stuck
    /// in the device. Must not be called while a run is in progress.
    pub fn collect_result(&mut self, fid: u16) -> Result<TestResult, BenchError> {
        let idx = self.model_index(fid)?;
        let device = &self.device;
        let Model {
            handle,
            batch_size,
            staging,
            io_pool,
            ..
        } = &mut self.models[idx];

        let mut used = 0u64;
        if let (Some(handle), Some(staging), Some(pool)) = (*handle, staging.as_mut(), io_pool.as_ref()) {
            let batch_size = *batch_size;
            pool.for_each_free(|req| {
                if req.niters() == 0 {
                    return;
                }
                if let Err(e) = device.dequantize(handle, batch_size, req.output(), staging.output_mut()) {
                    tracing::warn!("model {fid}: dequantize failed: {e}");
                }
                used += 1;
            });
        }
        self.nb_used += used;

        let errors = self.total_errors();
        let stalled = self.last_run.as_ref().is_some_and(RunMetrics::stalled);
        if stalled {
            tracing::warn!("model {fid}: last run stalled before completing");
        }
        if self.undrained > 0 {
            tracing::warn!("model {fid}: {} operation(s) stuck in the device", self.undrained);
        }
        let verdict = if self.nb_used > 0 && errors == 0 && !stalled && self.undrained == 0 {
            TestResult::Success
        } else {
            TestResult::Failed
        };
        tracing::info!(
            "model {fid}: used buffers = {used}, total used = {}, errors = {errors}: {verdict}",
            self.nb_used
        );
        Ok(verdict)
    }

    /// Writes the raw output of `fid` to its configured output file.
    ///
    /// Returns the path written, or `None` if no output file is configured.
    pub fn write_output(&self, fid: u16) -> Result<Option<PathBuf>, BenchError> {
        let model = self.model_ref(fid)?;
        let Some(path) = model.files.output.clone() else {
            return Ok(None);
        };
        let staging = model.staging.as_ref().ok_or_else(|| BenchError::NotReady {
            fid,
            detail: "no output staging".into(),
        })?;
        std::fs::write(&path, staging.output()).map_err(|source| BenchError::Io {
            what: "output",
            path: path.clone(),
            source,
        })?;
        tracing::info!("model {fid}: output written to {}", path.display());
        Ok(Some(path))
    }

    /// Stops and unloads every loaded model.
    ///
    /// Keeps going after a failure and returns the first error.
    pub fn unload_models(&mut self) -> Result<(), BenchError> {
        let mut first_error = None;
        for model in &mut self.models {
            let Some(handle) = model.handle else {
                continue;
            };
            if model.state == ModelState::Started {
                match self.device.stop_model(handle) {
                    Ok(()) => model.state = ModelState::Loaded,
                    Err(e) => {
                        tracing::warn!("model {}: stop failed: {e}", model.fid);
                        first_error.get_or_insert(BenchError::from(e));
                        continue;
                    }
                }
            }
            match self.device.unload_model(handle) {
                Ok(()) => {
                    model.handle = None;
                    model.state = ModelState::Finished;
                }
                Err(e) => {
                    tracing::warn!("model {}: unload failed: {e}", model.fid);
                    first_error.get_or_insert(BenchError::from(e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Releases every pool and staging area and unloads the models.
    ///
    /// Safe to call more than once.
    pub fn teardown(&mut self) -> Result<(), BenchError> {
        for model in &mut self.models {
            model.release_io();
        }
        if let Some(pool) = self.op_pool.take() {
            tracing::debug!("operation pool '{}' destroyed", pool.name());
        }
        self.unload_models()
    }

    // ── Accessors ──────────────────────────────────────────────

    /// Returns the device.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Returns the device capabilities captured at setup.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Returns the resolved worker cores.
    pub fn worker_lcores(&self) -> &[usize] {
        &self.worker_lcores
    }

    /// Returns the model registry.
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Returns one model.
    pub fn model(&self, fid: u16) -> Option<&Model> {
        self.models.get(usize::from(fid))
    }

    /// Returns the operation pool counters, if the pool exists.
    pub fn op_pool_stats(&self) -> Option<PoolStats> {
        self.op_pool.as_ref().map(ObjectPool::stats)
    }

    /// Returns the error count of each worker core.
    pub fn error_counts(&self) -> &BTreeMap<usize, u64> {
        &self.error_count
    }

    /// Returns the sum of all worker error counts.
    pub fn total_errors(&self) -> u64 {
        self.error_count.values().sum()
    }

    /// Returns how many dispatched buffers `collect_result` has seen.
    pub fn nb_used(&self) -> u64 {
        self.nb_used
    }

    /// Returns the metrics of the most recent run.
    pub fn last_run(&self) -> Option<&RunMetrics> {
        self.last_run.as_ref()
    }

    /// Returns how many operations are stuck in the device after a stall.
    pub fn undrained(&self) -> u64 {
        self.undrained
    }

    /// Recovers operations left in the device queue, returning buffers and
    /// descriptors to their pools. Completion errors count against the
    /// dequeue core. Returns how many are still outstanding.
    fn drain_stale(&mut self) -> u64 {
        let Some(op_pool) = self.op_pool.as_ref() else {
            return 0;
        };
        let outstanding = op_pool.stats().in_use();
        if outstanding == 0 {
            self.undrained = 0;
            return 0;
        }

        let abort = AtomicBool::new(false);
        let ctx = WorkerCtx {
            device: self.device.as_ref(),
            models: &self.models,
            op_pool,
            qp_id: self.config.queue_pair,
            spin: SpinLimit::bounded(self.config.max_spins.unwrap_or(DRAIN_MAX_SPINS)),
            abort: &abort,
        };
        let lcore = self.worker_lcores.get(1).copied().unwrap_or_default();
        let report = worker::drain(&ctx, lcore, outstanding);

        *self.error_count.entry(lcore).or_default() += report.errors;
        self.undrained = outstanding - report.ops;
        if self.undrained > 0 {
            tracing::error!(
                "{} of {outstanding} operation(s) still held by the device",
                self.undrained
            );
        } else {
            tracing::info!("recovered {outstanding} stale operation(s)");
        }
        self.undrained
    }

    fn model_index(&self, fid: u16) -> Result<usize, BenchError> {
        let idx = usize::from(fid);
        if idx >= self.models.len() {
            return Err(BenchError::Config(format!(
                "filelist id {fid} out of range ({} model(s))",
                self.models.len()
            )));
        }
        Ok(idx)
    }

    fn model_ref(&self, fid: u16) -> Result<&Model, BenchError> {
        let idx = self.model_index(fid)?;
        Ok(&self.models[idx])
    }

    fn model_mut(&mut self, fid: u16) -> Result<&mut Model, BenchError> {
        let idx = self.model_index(fid)?;
        Ok(&mut self.models[idx])
    }
}

/// Fills `dst` from `path`, which must be exactly `dst.len()` bytes long.
fn read_exact_input(path: &Path, dst: &mut [u8]) -> Result<(), BenchError> {
    let io_err = |source| BenchError::Io {
        what: "input",
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_err)?;
    let actual = file.metadata().map_err(io_err)?.len();
    if actual != dst.len() as u64 {
        tracing::error!(
            "invalid input file, size = {actual} (expected size = {})",
            dst.len()
        );
        return Err(BenchError::InputSize {
            path: path.to_path_buf(),
            expected: dst.len(),
            actual,
        });
    }
    file.read_exact(dst).map_err(io_err)
}
