// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device facade trait and the metadata it reports.

use crate::{DeviceError, OpError, Operation};
use std::fmt;
use std::path::Path;

/// Opaque device-assigned model identifier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ModelHandle(pub u16);

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static device capabilities.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    /// Driver name.
    pub driver_name: String,
    /// Maximum number of models loaded at once.
    pub max_models: usize,
    /// Number of queue pairs.
    pub max_queue_pairs: u16,
    /// Descriptors per queue pair.
    pub max_desc: usize,
    /// Minimum alignment of I/O buffers, a power of two.
    pub min_align_size: usize,
}

/// Per-model metadata reported after load.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelInfo {
    /// Model name.
    pub name: String,
    /// Batch size the model was compiled for.
    pub batch_size: u32,
}

/// Buffer sizes for one model at one batch size.
///
/// `q` sizes are the device-domain (quantized) lengths placed in the queue;
/// `d` sizes are the host-domain (dequantized) lengths used for file I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IoSizes {
    pub input_qsize: usize,
    pub output_qsize: usize,
    pub input_dsize: usize,
    pub output_dsize: usize,
}

/// An ML accelerator seen through a bounded submission/completion queue.
///
/// Implementations must allow `enqueue_burst` and `dequeue_burst` on the
/// same queue pair from two different threads at once.
pub trait MlDevice: Send + Sync {
    /// Returns static device capabilities.
    fn info(&self) -> DeviceInfo;

    /// Loads a model from `path` and returns its handle.
    fn load_model(&self, path: &Path) -> Result<ModelHandle, DeviceError>;

    /// Returns metadata for a loaded model.
    fn model_info(&self, model: ModelHandle) -> Result<ModelInfo, DeviceError>;

    /// Makes a loaded model ready to accept operations.
    fn start_model(&self, model: ModelHandle) -> Result<(), DeviceError>;

    /// Stops a started model.
    fn stop_model(&self, model: ModelHandle) -> Result<(), DeviceError>;

    /// Releases a model's slot.
    fn unload_model(&self, model: ModelHandle) -> Result<(), DeviceError>;

    /// Returns the quantized and raw I/O sizes for `batch_size`.
    ///
    /// Fails with `Unsupported` if the batch size cannot be served.
    fn io_sizes(&self, model: ModelHandle, batch_size: u32) -> Result<IoSizes, DeviceError>;

    /// Submits a prefix of `ops`, removing the accepted operations from the
    /// front of the vector. Returns how many were accepted.
    fn enqueue_burst(&self, qp_id: u16, ops: &mut Vec<Operation>) -> usize;

    /// Appends up to `max` completed operations to `out`. Returns how many
    /// were appended.
    fn dequeue_burst(&self, qp_id: u16, out: &mut Vec<Operation>, max: usize) -> usize;

    /// Returns the structured error of an operation completed with
    /// [`OpStatus::Error`](crate::OpStatus::Error).
    fn op_error(&self, op: &Operation) -> OpError;

    /// Converts raw host-domain input into the device domain.
    fn quantize(
        &self,
        model: ModelHandle,
        batch_size: u32,
        raw: &[u8],
        quantized: &mut [u8],
    ) -> Result<(), DeviceError>;

    /// Converts device-domain output back into the host domain.
    fn dequantize(
        &self,
        model: ModelHandle,
        batch_size: u32,
        quantized: &[u8],
        raw: &mut [u8],
    ) -> Result<(), DeviceError>;
}
