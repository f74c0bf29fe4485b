// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # ml-device
//!
//! The boundary between the inference benchmark and an ML accelerator.
//!
//! The benchmark never touches hardware directly. It talks to an
//! [`MlDevice`]: a bounded submission/completion queue with burst push/pop,
//! plus the model-lifecycle and quantize/dequantize calls needed to stage
//! I/O. [`SimDevice`] is an in-process implementation used by the CLI and
//! the test suite.
//!
//! # Key Components
//! - [`MlDevice`]: the facade trait.
//! - [`Operation`]: the descriptor submitted to a queue pair. It owns the
//!   [`RequestBuffer`](io_pool::RequestBuffer) backing it, so completion
//!   handling recovers the buffer (and its model id) from the operation
//!   itself, whatever order completions arrive in.
//! - [`SimDevice`]: a bounded queue, echo inference, passthrough or int8
//!   codec, deterministic error injection.
//!
//! # Burst Semantics
//! ```text
//! enqueue_burst(qp, &mut ops)       ── accepts a prefix of `ops`, 0..=len
//! dequeue_burst(qp, &mut out, max)  ── appends 0..=max completions
//! ```
//! Neither call blocks. Callers spin.
//!
//! # Example
//! ```
//! use ml_device::{MlDevice, SimDevice, SimModel};
//!
//! let dev = SimDevice::default();
//! let model = dev.register_model(SimModel::passthrough("echo", 1, 16)).unwrap();
//! let sizes = dev.io_sizes(model, 1).unwrap();
//! assert_eq!(sizes.input_dsize, 64);
//! ```

mod device;
mod error;
mod op;
pub mod sim;

pub use device::{DeviceInfo, IoSizes, MlDevice, ModelHandle, ModelInfo};
pub use error::DeviceError;
pub use op::{OpError, OpSegment, OpStatus, Operation};
pub use sim::{Codec, SimDevice, SimModel};
