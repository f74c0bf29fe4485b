// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # inference-bench
//!
//! A multi-core inference-request pipeline benchmark.
//!
//! The benchmark takes:
//! - A device implementing `MlDevice` from `ml-device`.
//! - A `BenchConfig` listing the models under test and their input files.
//!
//! It loads every model, builds one private pool of quantized request
//! buffers per model plus one shared pool of operation descriptors, then
//! runs exactly two worker threads against the device queue:
//!
//! ```text
//! enqueue worker:  op pool ─┐
//!                  io pool ─┴─► prepare ─► enqueue_burst ──┐
//!                                                          │ device queue
//! dequeue worker:  op pool ◄─┬─ release ◄─ dequeue_burst ◄─┘
//!                  io pool ◄─┘   (count errors)
//! ```
//!
//! After both join, `collect_result` dequantizes every buffer that was
//! dispatched and reports SUCCESS iff at least one buffer was used and no
//! completion carried an error.
//!
//! # Threads
//! Workers are plain OS threads spawned in a `std::thread::scope`, pinned to
//! their core on Linux, and busy-spin instead of blocking.

mod bench;
mod config;
mod error;
mod launcher;
mod metrics;
mod model;
mod worker;

pub use bench::{InferenceBench, TestResult};
pub use config::{BenchConfig, FileEntry};
pub use error::BenchError;
pub use metrics::RunMetrics;
pub use model::{Model, ModelState, RawStaging};
pub use worker::{CoreArgs, Role, SpinLimit, WorkerReport};
