// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end benchmark pipeline.
//!
//! These tests drive setup → load → build_io → run → collect_result →
//! teardown against the simulated device, proving that the pools, the
//! device facade and the two workers compose correctly.

use inference_bench::{BenchConfig, BenchError, FileEntry, InferenceBench, Role, TestResult};
use ml_device::{
    DeviceError, DeviceInfo, IoSizes, MlDevice, ModelHandle, ModelInfo, OpError, Operation,
    SimDevice, SimModel,
};
use proptest::prelude::*;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Helpers ────────────────────────────────────────────────────

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Writes a model description and its raw input into `dir`.
fn write_model(dir: &TempDir, tag: &str, model: &SimModel, input: &[u8]) -> FileEntry {
    let model_path = dir.path().join(format!("{tag}.toml"));
    let input_path = dir.path().join(format!("{tag}.in"));
    std::fs::write(&model_path, model.to_toml().unwrap()).unwrap();
    let mut f = std::fs::File::create(&input_path).unwrap();
    f.write_all(input).unwrap();

    FileEntry {
        model: model_path,
        input: input_path,
        output: Some(dir.path().join(format!("{tag}.out"))),
    }
}

fn config(filelist: Vec<FileEntry>, repetitions: u64) -> BenchConfig {
    BenchConfig {
        repetitions,
        worker_lcores: Some(vec![1, 2]),
        pin_threads: false,
        filelist,
        ..Default::default()
    }
}

/// One passthrough model with a 16-element ramp as input.
fn single_model(dir: &TempDir) -> (FileEntry, Vec<u8>) {
    let raw: Vec<f32> = (0..16).map(|i| i as f32 * 0.5).collect();
    let raw = f32_bytes(&raw);
    let entry = write_model(dir, "echo", &SimModel::passthrough("echo", 1, 16), &raw);
    (entry, raw)
}

fn ready_bench<D: MlDevice>(
    device: D,
    filelist: Vec<FileEntry>,
    repetitions: u64,
) -> InferenceBench<D> {
    let n = filelist.len() as u16;
    let mut bench = InferenceBench::setup(Arc::new(device), config(filelist, repetitions)).unwrap();
    bench.load_models().unwrap();
    for fid in 0..n {
        bench.build_io(fid).unwrap();
    }
    bench
}

// ── Scenarios ──────────────────────────────────────────────────

#[test]
fn test_clean_run_succeeds() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut bench = ready_bench(SimDevice::default(), vec![entry], 10);

    let metrics = bench.run(0..=0, 10).unwrap();
    assert_eq!(metrics.enqueued(), 10);
    assert_eq!(metrics.completed(), 10);
    assert_eq!(metrics.errors(), 0);
    assert!(!metrics.stalled());

    assert_eq!(bench.collect_result(0).unwrap(), TestResult::Success);
    assert!(bench.nb_used() >= 1 && bench.nb_used() <= 10);
    assert_eq!(bench.total_errors(), 0);
    bench.teardown().unwrap();
}

#[test]
fn test_injected_errors_fail_the_run() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut bench = ready_bench(SimDevice::default().with_fail_every(3), vec![entry], 5);

    let metrics = bench.run(0..=0, 5).unwrap();
    assert_eq!(metrics.completed(), 5);
    assert_eq!(metrics.errors(), 2);

    assert_eq!(bench.collect_result(0).unwrap(), TestResult::Failed);
    assert_eq!(bench.total_errors(), 2);
    assert!(bench.nb_used() >= 1);
    bench.teardown().unwrap();
}

#[test]
fn test_input_size_mismatch() {
    let dir = TempDir::new().unwrap();
    let entry = write_model(&dir, "short", &SimModel::passthrough("short", 1, 16), &[0u8; 63]);

    let mut bench =
        InferenceBench::setup(Arc::new(SimDevice::default()), config(vec![entry], 1)).unwrap();
    bench.load_models().unwrap();

    let err = bench.build_io(0).unwrap_err();
    assert!(matches!(
        err,
        BenchError::InputSize {
            expected: 64,
            actual: 63,
            ..
        }
    ));
    assert_eq!(err.errno(), -22);
    assert!(bench.model(0).unwrap().io_pool().is_none());

    bench.teardown().unwrap();
    bench.teardown().unwrap();
}

#[test]
fn test_zero_repetitions_is_failed() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut bench = ready_bench(SimDevice::default(), vec![entry], 0);

    let metrics = bench.run(0..=0, 0).unwrap();
    assert_eq!(metrics.enqueued(), 0);
    assert_eq!(metrics.completed(), 0);
    assert_eq!(bench.collect_result(0).unwrap(), TestResult::Failed);
    assert_eq!(bench.nb_used(), 0);
}

#[test]
fn test_teardown_twice() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut bench = ready_bench(SimDevice::default(), vec![entry], 4);
    bench.run(0..=0, 4).unwrap();
    bench.collect_result(0).unwrap();

    bench.teardown().unwrap();
    bench.teardown().unwrap();
    assert!(bench.op_pool_stats().is_none());
    assert!(bench.model(0).unwrap().handle().is_none());
}

// ── Properties ─────────────────────────────────────────────────

#[test]
fn test_passthrough_output_matches_input() {
    let dir = TempDir::new().unwrap();
    let (entry, raw) = single_model(&dir);
    let out_path = entry.output.clone().unwrap();
    let mut bench = ready_bench(SimDevice::default(), vec![entry], 3);

    bench.run(0..=0, 3).unwrap();
    assert!(bench.collect_result(0).unwrap().is_success());

    let staging = bench.model(0).unwrap().staging().unwrap();
    assert_eq!(staging.output(), raw.as_slice());

    let written = bench.write_output(0).unwrap();
    assert_eq!(written.as_deref(), Some(out_path.as_path()));
    assert_eq!(std::fs::read(&out_path).unwrap(), raw);
}

#[test]
fn test_int8_output_within_scale() {
    let dir = TempDir::new().unwrap();
    let values = [0.0f32, 0.3, -1.2, 2.5, 6.0, -6.3, 0.05, 1.0];
    let raw = f32_bytes(&values);
    let entry = write_model(&dir, "q", &SimModel::int8("q", 1, values.len(), 0.1), &raw);
    let mut bench = ready_bench(SimDevice::default(), vec![entry], 2);

    bench.run(0..=0, 2).unwrap();
    assert!(bench.collect_result(0).unwrap().is_success());

    let out = bench.model(0).unwrap().staging().unwrap().output().to_vec();
    for (expected, got) in values.iter().zip(out.chunks_exact(4)) {
        let got = f32::from_le_bytes(got.try_into().unwrap());
        assert!((expected - got).abs() <= 0.05 + 1e-5, "{expected} vs {got}");
    }
}

#[test]
fn test_multi_model_round_robin() {
    let dir = TempDir::new().unwrap();
    let a = write_model(&dir, "a", &SimModel::passthrough("a", 1, 4), &f32_bytes(&[1.0; 4]));
    let b = write_model(&dir, "b", &SimModel::passthrough("b", 1, 32), &f32_bytes(&[2.0; 32]));
    let c = write_model(&dir, "c", &SimModel::int8("c", 1, 8, 0.5), &f32_bytes(&[3.0; 8]));
    let device = SimDevice::default();
    let mut bench = ready_bench(device, vec![a, b, c], 20);

    let metrics = bench.run(0..=2, 20).unwrap();
    assert_eq!(metrics.enqueued(), 60);
    assert_eq!(metrics.completed(), 60);
    assert_eq!(bench.device().processed(), 60);

    for fid in 0..=2 {
        assert!(bench.collect_result(fid).unwrap().is_success());
        let stats = bench.model(fid).unwrap().pool_stats().unwrap();
        assert_eq!(stats.acquires, 20);
        assert!(stats.is_balanced());
    }
}

#[test]
fn test_pools_are_balanced_after_run() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut bench = ready_bench(SimDevice::default(), vec![entry], 500);

    bench.run(0..=0, 500).unwrap();

    let io = bench.model(0).unwrap().pool_stats().unwrap();
    assert_eq!(io.capacity, 256);
    assert_eq!(io.available, io.capacity);
    assert_eq!(io.acquires, 500);
    assert!(io.is_balanced());

    let ops = bench.op_pool_stats().unwrap();
    assert_eq!(ops.available, ops.capacity);
    assert_eq!(ops.acquires, 500);
    assert!(ops.is_balanced());
}

#[test]
fn test_small_queue_forces_retries() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let device = SimDevice::new(DeviceInfo {
        driver_name: "narrow".into(),
        max_models: 1,
        max_queue_pairs: 1,
        max_desc: 1,
        min_align_size: 128,
    });
    let mut bench = ready_bench(device, vec![entry], 200);

    let metrics = bench.run(0..=0, 200).unwrap();
    assert_eq!(metrics.completed(), 200);
    assert!(bench.collect_result(0).unwrap().is_success());

    let layout = bench.model(0).unwrap().layout().unwrap();
    assert_eq!(layout.output().offset % 128, 0);
}

#[test]
fn test_worker_reports() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut bench = ready_bench(SimDevice::default(), vec![entry], 7);
    let metrics = bench.run(0..=0, 7).unwrap();

    assert_eq!(metrics.workers.len(), 2);
    let enq = metrics.workers.iter().find(|w| w.role == Role::Enqueue).unwrap();
    let deq = metrics.workers.iter().find(|w| w.role == Role::Dequeue).unwrap();
    assert_eq!(enq.lcore, 1);
    assert_eq!(deq.lcore, 2);
    assert_eq!(enq.ops, 7);
    assert_eq!(deq.ops, 7);
    assert!(bench.last_run().is_some());
}

// ── Capability checks ──────────────────────────────────────────

#[test]
fn test_too_many_models() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let device = SimDevice::new(DeviceInfo {
        driver_name: "one".into(),
        max_models: 1,
        max_queue_pairs: 1,
        max_desc: 8,
        min_align_size: 64,
    });

    let result = InferenceBench::setup(Arc::new(device), config(vec![entry.clone(), entry], 1));
    let err = result.err().unwrap();
    assert!(matches!(err, BenchError::Capability(_)));
    assert_eq!(err.errno(), -95);
}

#[test]
fn test_model_file_rejected() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("broken.toml");
    std::fs::write(&model_path, "name = 7").unwrap();
    let entry = FileEntry {
        model: model_path,
        input: dir.path().join("unused.in"),
        output: None,
    };

    let mut bench =
        InferenceBench::setup(Arc::new(SimDevice::default()), config(vec![entry], 1)).unwrap();
    let err = bench.load_models().unwrap_err();
    assert!(matches!(err, BenchError::Device(DeviceError::ModelFile { .. })));
    bench.teardown().unwrap();
}

// ── Device wrappers ────────────────────────────────────────────

/// Implements `MlDevice` for a wrapper around a `SimDevice` field,
/// forwarding everything but the listed methods.
macro_rules! forward_device {
    ($ty:ty, $inner:tt, { $($item:item)* }) => {
        impl MlDevice for $ty {
            fn info(&self) -> DeviceInfo {
                self.$inner.info()
            }
            fn load_model(&self, path: &Path) -> Result<ModelHandle, DeviceError> {
                self.$inner.load_model(path)
            }
            fn model_info(&self, model: ModelHandle) -> Result<ModelInfo, DeviceError> {
                self.$inner.model_info(model)
            }
            fn start_model(&self, model: ModelHandle) -> Result<(), DeviceError> {
                self.$inner.start_model(model)
            }
            fn stop_model(&self, model: ModelHandle) -> Result<(), DeviceError> {
                self.$inner.stop_model(model)
            }
            fn unload_model(&self, model: ModelHandle) -> Result<(), DeviceError> {
                self.$inner.unload_model(model)
            }
            fn io_sizes(&self, model: ModelHandle, batch_size: u32) -> Result<IoSizes, DeviceError> {
                self.$inner.io_sizes(model, batch_size)
            }
            fn op_error(&self, op: &Operation) -> OpError {
                self.$inner.op_error(op)
            }
            fn quantize(
                &self,
                model: ModelHandle,
                batch_size: u32,
                raw: &[u8],
                quantized: &mut [u8],
            ) -> Result<(), DeviceError> {
                self.$inner.quantize(model, batch_size, raw, quantized)
            }
            fn dequantize(
                &self,
                model: ModelHandle,
                batch_size: u32,
                quantized: &[u8],
                raw: &mut [u8],
            ) -> Result<(), DeviceError> {
                self.$inner.dequantize(model, batch_size, quantized, raw)
            }
            $($item)*
        }
    };
}

/// A device whose submission queue never accepts anything.
struct WedgedDevice(SimDevice);

forward_device!(WedgedDevice, 0, {
    fn enqueue_burst(&self, _qp_id: u16, _ops: &mut Vec<Operation>) -> usize {
        0
    }
    fn dequeue_burst(&self, qp_id: u16, out: &mut Vec<Operation>, max: usize) -> usize {
        self.0.dequeue_burst(qp_id, out, max)
    }
});

/// A device that accepts work but hides completions while muted.
struct MutedDevice {
    sim: SimDevice,
    muted: AtomicBool,
}

impl MutedDevice {
    fn new() -> Self {
        Self {
            sim: SimDevice::default(),
            muted: AtomicBool::new(true),
        }
    }
}

forward_device!(MutedDevice, sim, {
    fn enqueue_burst(&self, qp_id: u16, ops: &mut Vec<Operation>) -> usize {
        self.sim.enqueue_burst(qp_id, ops)
    }
    fn dequeue_burst(&self, qp_id: u16, out: &mut Vec<Operation>, max: usize) -> usize {
        if self.muted.load(Ordering::Relaxed) {
            return 0;
        }
        self.sim.dequeue_burst(qp_id, out, max)
    }
});

/// A device that holds completions back until `hold_until` have finished,
/// then hands them out newest first.
struct ReversingDevice {
    sim: SimDevice,
    held: Mutex<Vec<Operation>>,
    hold_until: usize,
    releasing: AtomicBool,
}

impl ReversingDevice {
    fn new(hold_until: usize) -> Self {
        Self {
            sim: SimDevice::default(),
            held: Mutex::new(Vec::new()),
            hold_until,
            releasing: AtomicBool::new(false),
        }
    }
}

forward_device!(ReversingDevice, sim, {
    fn enqueue_burst(&self, qp_id: u16, ops: &mut Vec<Operation>) -> usize {
        self.sim.enqueue_burst(qp_id, ops)
    }
    fn dequeue_burst(&self, qp_id: u16, out: &mut Vec<Operation>, max: usize) -> usize {
        let mut held = self.held.lock().unwrap();
        self.sim.dequeue_burst(qp_id, &mut held, usize::MAX);
        if held.len() >= self.hold_until {
            self.releasing.store(true, Ordering::Relaxed);
        }
        if !self.releasing.load(Ordering::Relaxed) {
            return 0;
        }
        let n = max.min(held.len());
        for _ in 0..n {
            out.extend(held.pop());
        }
        n
    }
});

// ── Completion order ───────────────────────────────────────────

#[test]
fn test_reversed_completions_reach_their_own_model() {
    let dir = TempDir::new().unwrap();
    let a = write_model(&dir, "a", &SimModel::passthrough("a", 1, 4), &f32_bytes(&[1.0; 4]));
    let b = write_model(&dir, "b", &SimModel::int8("b", 1, 24, 0.25), &f32_bytes(&[2.0; 24]));
    let c = write_model(&dir, "c", &SimModel::passthrough("c", 1, 40), &f32_bytes(&[3.0; 40]));
    let reps = 40;
    let total = 3 * reps as usize;
    let mut bench = ready_bench(ReversingDevice::new(total), vec![a, b, c], reps);

    let metrics = bench.run(0..=2, reps).unwrap();
    assert_eq!(metrics.enqueued(), total as u64);
    assert_eq!(metrics.completed(), total as u64);
    assert!(!metrics.stalled());

    let expected = [1.0f32, 2.0, 3.0];
    for fid in 0..=2u16 {
        let stats = bench.model(fid).unwrap().pool_stats().unwrap();
        assert_eq!(stats.acquires, reps);
        assert!(stats.is_balanced(), "model {fid}: {}", stats.summary());
        assert_eq!(bench.collect_result(fid).unwrap(), TestResult::Success);

        let out = bench.model(fid).unwrap().staging().unwrap().output().to_vec();
        for v in out.chunks_exact(4) {
            assert_eq!(f32::from_le_bytes(v.try_into().unwrap()), expected[usize::from(fid)]);
        }
    }
    assert!(bench.op_pool_stats().unwrap().is_balanced());
    bench.teardown().unwrap();
}

// ── Bounded spinning ───────────────────────────────────────────

#[test]
fn test_wedged_queue_stalls_instead_of_hanging() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut cfg = config(vec![entry], 3);
    cfg.max_spins = Some(10_000);

    let mut bench = InferenceBench::setup(Arc::new(WedgedDevice(SimDevice::default())), cfg).unwrap();
    bench.load_models().unwrap();
    bench.build_io(0).unwrap();

    let metrics = bench.run(0..=0, 3).unwrap();
    assert!(metrics.stalled());
    assert_eq!(metrics.enqueued(), 0);
    assert_eq!(metrics.completed(), 0);

    // Resources taken before the stall went back to their pools.
    let io = bench.model(0).unwrap().pool_stats().unwrap();
    assert_eq!(io.available, io.capacity);
    let ops = bench.op_pool_stats().unwrap();
    assert_eq!(ops.available, ops.capacity);

    assert_eq!(bench.collect_result(0).unwrap(), TestResult::Failed);
    bench.teardown().unwrap();
}

#[test]
fn test_stale_completions_do_not_leak_into_next_run() {
    let dir = TempDir::new().unwrap();
    let (entry, _) = single_model(&dir);
    let mut cfg = config(vec![entry], 10);
    cfg.max_spins = Some(2_000_000);

    let mut bench = InferenceBench::setup(Arc::new(MutedDevice::new()), cfg).unwrap();
    bench.load_models().unwrap();
    bench.build_io(0).unwrap();

    let first = bench.run(0..=0, 3).unwrap();
    assert!(first.stalled());
    assert_eq!(first.enqueued(), 3);
    assert_eq!(first.completed(), 0);
    assert_eq!(bench.undrained(), 3);
    assert_eq!(bench.collect_result(0).unwrap(), TestResult::Failed);

    // Still muted: the next run refuses to start.
    let err = bench.run(0..=0, 3).unwrap_err();
    assert!(matches!(err, BenchError::Undrained { outstanding: 3 }));
    assert_eq!(err.errno(), -16);

    bench.device().muted.store(false, Ordering::Relaxed);
    let second = bench.run(0..=0, 3).unwrap();
    assert!(!second.stalled());
    assert_eq!(second.enqueued(), 3);
    assert_eq!(second.completed(), 3);
    assert_eq!(bench.undrained(), 0);

    let io = bench.model(0).unwrap().pool_stats().unwrap();
    assert!(io.is_balanced(), "{}", io.summary());
    assert_eq!(io.acquires, 6);
    let ops = bench.op_pool_stats().unwrap();
    assert!(ops.is_balanced(), "{}", ops.summary());
    assert_eq!(bench.device().sim.processed(), 6);

    assert_eq!(bench.collect_result(0).unwrap(), TestResult::Success);
    bench.teardown().unwrap();
}

// ── Randomized ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_every_submission_completes(reps in 1u64..40, nb_models in 1usize..4) {
        let dir = TempDir::new().unwrap();
        let filelist: Vec<FileEntry> = (0..nb_models)
            .map(|i| {
                let elems = 4 * (i + 1);
                let raw = f32_bytes(&vec![i as f32; elems]);
                write_model(&dir, &format!("m{i}"), &SimModel::passthrough("m", 1, elems), &raw)
            })
            .collect();
        let mut bench = ready_bench(SimDevice::default(), filelist, reps);

        let end = (nb_models - 1) as u16;
        let metrics = bench.run(0..=end, reps).unwrap();
        let expected = reps * nb_models as u64;
        prop_assert_eq!(metrics.enqueued(), expected);
        prop_assert_eq!(metrics.completed(), expected);

        for fid in 0..=end {
            let stats = bench.model(fid).unwrap().pool_stats().unwrap();
            prop_assert!(stats.is_balanced());
            prop_assert_eq!(stats.acquires, reps);
        }
        bench.teardown().unwrap();
    }
}
