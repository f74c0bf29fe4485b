// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operation descriptors.
//!
//! An [`Operation`] is built from a pooled [`RequestBuffer`] just before
//! submission and taken apart right after its completion is observed. The
//! buffer travels inside the operation, so the descriptor and its buffer are
//! always released together.

use crate::ModelHandle;
use io_pool::RequestBuffer;

/// Completion status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum OpStatus {
    /// Not yet processed by a device.
    #[default]
    NotProcessed,
    /// Processed successfully.
    Success,
    /// Processed with an error; see [`MlDevice::op_error`](crate::MlDevice::op_error).
    Error,
}

/// Structured per-operation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpError {
    /// Device-specific error code.
    pub code: u64,
    /// Human-readable message.
    pub message: String,
}

/// One contiguous I/O segment. Segments are never chained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpSegment {
    /// Address of the first byte.
    pub addr: usize,
    /// Length in bytes.
    pub length: usize,
}

/// The unit submitted to a device queue pair.
#[derive(Debug, Default)]
pub struct Operation {
    /// Target model.
    pub model: ModelHandle,
    /// Number of batches carried.
    pub nb_batches: u32,
    /// Quantized input segment.
    pub input: OpSegment,
    /// Quantized output segment.
    pub output: OpSegment,
    /// Completion status, written by the device.
    pub status: OpStatus,
    error: Option<OpError>,
    request: Option<RequestBuffer>,
}

impl Operation {
    /// Creates an empty descriptor, as stored in an operation pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the descriptor for `model` and moves `request` into it.
    ///
    /// Segment addresses and lengths are taken from the buffer's layout.
    pub fn prepare(&mut self, model: ModelHandle, nb_batches: u32, request: RequestBuffer) {
        let base = request.base_addr();
        let layout = *request.layout();

        self.model = model;
        self.nb_batches = nb_batches;
        self.input = OpSegment {
            addr: base + layout.input().offset,
            length: layout.input().len,
        };
        self.output = OpSegment {
            addr: base + layout.output().offset,
            length: layout.output().len,
        };
        self.status = OpStatus::NotProcessed;
        self.error = None;
        self.request = Some(request);
    }

    /// Records the device's verdict. Called by device implementations.
    pub fn complete(&mut self, status: OpStatus, error: Option<OpError>) {
        self.status = status;
        self.error = error;
    }

    /// Returns the recorded error, if any.
    pub fn error(&self) -> Option<&OpError> {
        self.error.as_ref()
    }

    /// Returns the backing request buffer.
    pub fn request(&self) -> Option<&RequestBuffer> {
        self.request.as_ref()
    }

    /// Returns the backing request buffer for writing.
    pub fn request_mut(&mut self) -> Option<&mut RequestBuffer> {
        self.request.as_mut()
    }

    /// Detaches the backing buffer, leaving the descriptor empty.
    pub fn take_request(&mut self) -> Option<RequestBuffer> {
        self.request.take()
    }
}
