// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! In-process simulated ML device.
//!
//! [`SimDevice`] implements [`MlDevice`] without hardware:
//!
//! - Each queue pair is a bounded `ArrayQueue` of `max_desc` descriptors.
//!   A slot is reserved before an operation is processed, so a full queue
//!   rejects the submission and leaves the caller's burst untouched.
//! - "Inference" is an echo: the quantized input region is copied into the
//!   quantized output region at submission time.
//! - Models are described by a [`SimModel`], registered directly or loaded
//!   from a small TOML file.
//! - Raw host-domain data is `f32` little-endian. The [`Codec`] decides the
//!   device domain: passthrough (`f32`, exact round trip) or int8 with a
//!   scale.
//! - `with_fail_every(n)` completes the k-th processed operation (0-based)
//!   with an error when `k % n == 0`.
//!
//! # Model file format
//! ```toml
//! name = "mnist-echo"
//! batch_size = 1
//! input_elems = 784
//! output_elems = 784
//!
//! [codec]
//! kind = "int8"
//! scale = 0.05
//! ```

use crate::{
    DeviceError, DeviceInfo, IoSizes, MlDevice, ModelHandle, ModelInfo, OpError, OpStatus,
    Operation,
};
use crossbeam_queue::ArrayQueue;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Bytes per raw (host-domain) element.
const RAW_ELEM_BYTES: usize = 4;

/// Error code: operation targets a model that is not started.
pub const ERR_MODEL_NOT_STARTED: u64 = 0x1;
/// Error code: failure injected by `with_fail_every`.
pub const ERR_INJECTED: u64 = 0x2;
/// Error code: operation carries no request buffer.
pub const ERR_NO_BUFFER: u64 = 0x3;

/// Device-domain representation of a simulated model's I/O.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Codec {
    /// Quantized data is the raw `f32` data, byte for byte.
    #[default]
    Passthrough,
    /// Quantized data is `round(x / scale)` saturated to `i8`.
    Int8 { scale: f32 },
}

impl Codec {
    /// Bytes per device-domain element.
    pub fn quantized_elem_bytes(&self) -> usize {
        match self {
            Codec::Passthrough => RAW_ELEM_BYTES,
            Codec::Int8 { .. } => 1,
        }
    }

    fn quantize(&self, raw: &[u8], quantized: &mut [u8]) {
        match *self {
            Codec::Passthrough => quantized.copy_from_slice(raw),
            Codec::Int8 { scale } => {
                for (q, r) in quantized.iter_mut().zip(raw.chunks_exact(RAW_ELEM_BYTES)) {
                    let x = f32::from_le_bytes([r[0], r[1], r[2], r[3]]);
                    let v = (x / scale).round().clamp(i8::MIN as f32, i8::MAX as f32);
                    *q = (v as i8) as u8;
                }
            }
        }
    }

    fn dequantize(&self, quantized: &[u8], raw: &mut [u8]) {
        match *self {
            Codec::Passthrough => raw.copy_from_slice(quantized),
            Codec::Int8 { scale } => {
                for (r, &q) in raw.chunks_exact_mut(RAW_ELEM_BYTES).zip(quantized) {
                    let x = (q as i8) as f32 * scale;
                    r.copy_from_slice(&x.to_le_bytes());
                }
            }
        }
    }
}

/// Description of a simulated model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimModel {
    /// Model name.
    pub name: String,
    /// Largest batch size the model accepts.
    pub batch_size: u32,
    /// Input elements per batch.
    pub input_elems: usize,
    /// Output elements per batch.
    pub output_elems: usize,
    /// Device-domain representation.
    #[serde(default)]
    pub codec: Codec,
}

impl SimModel {
    /// An echo model with equal input/output widths and exact round trip.
    pub fn passthrough(name: &str, batch_size: u32, elems: usize) -> Self {
        Self {
            name: name.to_string(),
            batch_size,
            input_elems: elems,
            output_elems: elems,
            codec: Codec::Passthrough,
        }
    }

    /// An echo model quantized to int8 with the given scale.
    pub fn int8(name: &str, batch_size: u32, elems: usize, scale: f32) -> Self {
        Self {
            codec: Codec::Int8 { scale },
            ..Self::passthrough(name, batch_size, elems)
        }
    }

    /// Parses a model description from TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self, DeviceError> {
        toml::from_str(toml_str).map_err(|e| DeviceError::ModelFile {
            path: "<inline>".into(),
            detail: format!("TOML parse error: {e}"),
        })
    }

    /// Serialises the description to TOML.
    pub fn to_toml(&self) -> Result<String, DeviceError> {
        toml::to_string_pretty(self).map_err(|e| DeviceError::ModelFile {
            path: "<inline>".into(),
            detail: format!("TOML serialise error: {e}"),
        })
    }

    /// Returns the I/O sizes at `batch_size`.
    ///
    /// Fails with `Unsupported` if a size does not fit in `usize`.
    pub fn sizes(&self, batch_size: u32) -> Result<IoSizes, DeviceError> {
        let qb = self.codec.quantized_elem_bytes();
        let bytes = |elems: usize, elem_bytes: usize| {
            usize::try_from(batch_size)
                .ok()
                .and_then(|batches| elems.checked_mul(batches))
                .and_then(|n| n.checked_mul(elem_bytes))
                .ok_or_else(|| {
                    DeviceError::Unsupported(format!(
                        "model '{}': {elems} elements x batch {batch_size} overflows",
                        self.name
                    ))
                })
        };
        Ok(IoSizes {
            input_qsize: bytes(self.input_elems, qb)?,
            output_qsize: bytes(self.output_elems, qb)?,
            input_dsize: bytes(self.input_elems, RAW_ELEM_BYTES)?,
            output_dsize: bytes(self.output_elems, RAW_ELEM_BYTES)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Loaded,
    Started,
}

#[derive(Debug)]
struct Slot {
    model: SimModel,
    state: SlotState,
}

/// A simulated ML device.
pub struct SimDevice {
    info: DeviceInfo,
    slots: Mutex<Vec<Option<Slot>>>,
    /// Lock-free mirror of `SlotState::Started` for the submission path.
    started: Box<[AtomicBool]>,
    queues: Box<[ArrayQueue<Operation>]>,
    /// Reserved descriptors per queue pair.
    inflight: Box<[AtomicUsize]>,
    processed: AtomicU64,
    fail_every: Option<u64>,
}

impl SimDevice {
    /// Creates a device with the given capabilities.
    pub fn new(mut info: DeviceInfo) -> Self {
        info.max_desc = info.max_desc.max(1);
        info.max_queue_pairs = info.max_queue_pairs.max(1);
        // Handles are u16 slot indices.
        info.max_models = info.max_models.min(usize::from(u16::MAX) + 1);

        let queues = (0..info.max_queue_pairs)
            .map(|_| ArrayQueue::new(info.max_desc))
            .collect();
        let inflight = (0..info.max_queue_pairs)
            .map(|_| AtomicUsize::new(0))
            .collect();
        let started = (0..info.max_models).map(|_| AtomicBool::new(false)).collect();
        let slots = (0..info.max_models).map(|_| None).collect();

        Self {
            info,
            slots: Mutex::new(slots),
            started,
            queues,
            inflight,
            processed: AtomicU64::new(0),
            fail_every: None,
        }
    }

    /// Completes every `n`-th processed operation (starting with the first)
    /// with an error. `n == 0` disables injection.
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Registers a model description and returns its handle.
    pub fn register_model(&self, model: SimModel) -> Result<ModelHandle, DeviceError> {
        if model.batch_size == 0 || model.input_elems == 0 || model.output_elems == 0 {
            return Err(DeviceError::Unsupported(format!(
                "model '{}' has a zero dimension",
                model.name
            )));
        }
        model.sizes(model.batch_size)?;

        let mut slots = self.slots();
        let idx = slots
            .iter()
            .position(Option::is_none)
            .ok_or(DeviceError::TooManyModels {
                max: self.info.max_models,
            })?;

        let handle = u16::try_from(idx).map(ModelHandle).map_err(|_| {
            DeviceError::Unsupported(format!("model slot {idx} exceeds the handle range"))
        })?;

        tracing::debug!("sim: model '{}' registered in slot {idx}", model.name);
        slots[idx] = Some(Slot {
            model,
            state: SlotState::Loaded,
        });
        Ok(handle)
    }

    /// Returns the number of operations processed so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Slot>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_slot<R>(
        &self,
        model: ModelHandle,
        f: impl FnOnce(&mut Slot) -> Result<R, DeviceError>,
    ) -> Result<R, DeviceError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(model.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(DeviceError::UnknownModel(model))?;
        f(slot)
    }

    fn is_started(&self, model: ModelHandle) -> bool {
        self.started
            .get(model.0 as usize)
            .is_some_and(|s| s.load(Ordering::Acquire))
    }

    /// Runs the echo inference on one operation and records its status.
    fn process(&self, op: &mut Operation) {
        let seq = self.processed.fetch_add(1, Ordering::Relaxed);

        if !self.is_started(op.model) {
            let message = format!("model {} not started", op.model);
            op.complete(
                OpStatus::Error,
                Some(OpError {
                    code: ERR_MODEL_NOT_STARTED,
                    message,
                }),
            );
            return;
        }

        let Some(req) = op.request_mut() else {
            op.complete(
                OpStatus::Error,
                Some(OpError {
                    code: ERR_NO_BUFFER,
                    message: "operation has no request buffer".into(),
                }),
            );
            return;
        };

        let (input, output) = req.split_io_mut();
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        output[n..].fill(0);

        if let Some(every) = self.fail_every {
            if seq % every == 0 {
                op.complete(
                    OpStatus::Error,
                    Some(OpError {
                        code: ERR_INJECTED,
                        message: format!("injected failure on operation {seq}"),
                    }),
                );
                return;
            }
        }

        op.complete(OpStatus::Success, None);
    }

    fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), DeviceError> {
        if expected != actual {
            return Err(DeviceError::SizeMismatch {
                what,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new(DeviceInfo {
            driver_name: "ml_sim".into(),
            max_models: 8,
            max_queue_pairs: 1,
            max_desc: 1024,
            min_align_size: 64,
        })
    }
}

impl MlDevice for SimDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn load_model(&self, path: &Path) -> Result<ModelHandle, DeviceError> {
        let content = std::fs::read_to_string(path).map_err(|e| DeviceError::ModelFile {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let model = SimModel::from_toml(&content).map_err(|e| match e {
            DeviceError::ModelFile { detail, .. } => DeviceError::ModelFile {
                path: path.display().to_string(),
                detail,
            },
            other => other,
        })?;
        self.register_model(model)
    }

    fn model_info(&self, model: ModelHandle) -> Result<ModelInfo, DeviceError> {
        self.with_slot(model, |slot| {
            Ok(ModelInfo {
                name: slot.model.name.clone(),
                batch_size: slot.model.batch_size,
            })
        })
    }

    fn start_model(&self, model: ModelHandle) -> Result<(), DeviceError> {
        self.with_slot(model, |slot| {
            if slot.state != SlotState::Loaded {
                return Err(DeviceError::InvalidState {
                    model,
                    detail: "already started".into(),
                });
            }
            slot.state = SlotState::Started;
            Ok(())
        })?;
        self.started[model.0 as usize].store(true, Ordering::Release);
        Ok(())
    }

    fn stop_model(&self, model: ModelHandle) -> Result<(), DeviceError> {
        self.with_slot(model, |slot| {
            if slot.state != SlotState::Started {
                return Err(DeviceError::InvalidState {
                    model,
                    detail: "not started".into(),
                });
            }
            slot.state = SlotState::Loaded;
            Ok(())
        })?;
        self.started[model.0 as usize].store(false, Ordering::Release);
        Ok(())
    }

    fn unload_model(&self, model: ModelHandle) -> Result<(), DeviceError> {
        let mut slots = self.slots();
        let entry = slots
            .get_mut(model.0 as usize)
            .ok_or(DeviceError::UnknownModel(model))?;
        let started = match entry {
            None => return Err(DeviceError::UnknownModel(model)),
            Some(slot) => slot.state == SlotState::Started,
        };
        if started {
            return Err(DeviceError::InvalidState {
                model,
                detail: "stop before unloading".into(),
            });
        }
        *entry = None;
        Ok(())
    }

    fn io_sizes(&self, model: ModelHandle, batch_size: u32) -> Result<IoSizes, DeviceError> {
        self.with_slot(model, |slot| {
            if batch_size == 0 || batch_size > slot.model.batch_size {
                return Err(DeviceError::Unsupported(format!(
                    "batch size {batch_size} for model '{}' (max {})",
                    slot.model.name, slot.model.batch_size
                )));
            }
            slot.model.sizes(batch_size)
        })
    }

    fn enqueue_burst(&self, qp_id: u16, ops: &mut Vec<Operation>) -> usize {
        let (Some(queue), Some(inflight)) = (
            self.queues.get(qp_id as usize),
            self.inflight.get(qp_id as usize),
        ) else {
            return 0;
        };

        let max_desc = self.info.max_desc;
        let mut accepted = 0;
        while !ops.is_empty() {
            let reserved = inflight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < max_desc).then_some(n + 1)
                })
                .is_ok();
            if !reserved {
                break;
            }

            let mut op = ops.remove(0);
            self.process(&mut op);
            if let Err(op) = queue.push(op) {
                // Unreachable while reservations bound the queue length.
                inflight.fetch_sub(1, Ordering::AcqRel);
                ops.insert(0, op);
                break;
            }
            accepted += 1;
        }
        accepted
    }

    fn dequeue_burst(&self, qp_id: u16, out: &mut Vec<Operation>, max: usize) -> usize {
        let (Some(queue), Some(inflight)) = (
            self.queues.get(qp_id as usize),
            self.inflight.get(qp_id as usize),
        ) else {
            return 0;
        };

        let mut n = 0;
        while n < max {
            let Some(op) = queue.pop() else {
                break;
            };
            inflight.fetch_sub(1, Ordering::AcqRel);
            out.push(op);
            n += 1;
        }
        n
    }

    fn op_error(&self, op: &Operation) -> OpError {
        op.error().cloned().unwrap_or(OpError {
            code: 0,
            message: "no error recorded".into(),
        })
    }

    fn quantize(
        &self,
        model: ModelHandle,
        batch_size: u32,
        raw: &[u8],
        quantized: &mut [u8],
    ) -> Result<(), DeviceError> {
        self.with_slot(model, |slot| {
            let sizes = slot.model.sizes(batch_size)?;
            Self::check_len("raw input", sizes.input_dsize, raw.len())?;
            Self::check_len("quantized input", sizes.input_qsize, quantized.len())?;
            slot.model.codec.quantize(raw, quantized);
            Ok(())
        })
    }

    fn dequantize(
        &self,
        model: ModelHandle,
        batch_size: u32,
        quantized: &[u8],
        raw: &mut [u8],
    ) -> Result<(), DeviceError> {
        self.with_slot(model, |slot| {
            let sizes = slot.model.sizes(batch_size)?;
            Self::check_len("quantized output", sizes.output_qsize, quantized.len())?;
            Self::check_len("raw output", sizes.output_dsize, raw.len())?;
            slot.model.codec.dequantize(quantized, raw);
            Ok(())
        })
    }
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDevice")
            .field("info", &self.info)
            .field("processed", &self.processed())
            .field("fail_every", &self.fail_every)
            .finish()
    }
}
