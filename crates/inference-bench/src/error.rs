// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the inference benchmark.

use std::path::PathBuf;

#[cfg(target_os = "linux")]
mod errno {
    use nix::errno::Errno;

    pub const ENOENT: i32 = Errno::ENOENT as i32;
    pub const EIO: i32 = Errno::EIO as i32;
    pub const EBUSY: i32 = Errno::EBUSY as i32;
    pub const ENOMEM: i32 = Errno::ENOMEM as i32;
    pub const EINVAL: i32 = Errno::EINVAL as i32;
    pub const ENOTSUP: i32 = Errno::EOPNOTSUPP as i32;
}

// Linux numbering, so codes read the same on every host.
#[cfg(not(target_os = "linux"))]
mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBUSY: i32 = 16;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const ENOTSUP: i32 = 95;
}

use errno::{EBUSY, EINVAL, EIO, ENOENT, ENOMEM, ENOTSUP};

/// Errors that can occur while setting up or driving a benchmark run.
///
/// Per-operation device errors are not represented here: they are counted
/// during the run and only surface as a failed verdict.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// The device facade rejected a call.
    #[error("device error: {0}")]
    Device(#[from] ml_device::DeviceError),

    /// A pool could not be built.
    #[error("pool error: {0}")]
    Pool(#[from] io_pool::PoolError),

    /// A model, input or output file could not be accessed.
    #[error("cannot access {what} file '{}': {source}", .path.display())]
    Io {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input file does not match the model's raw input size.
    #[error("invalid input file '{}', size = {actual} (expected size = {expected})", .path.display())]
    InputSize {
        path: PathBuf,
        expected: usize,
        actual: u64,
    },

    /// The device or host cannot run the requested configuration.
    #[error("insufficient capabilities: {0}")]
    Capability(String),

    /// Invalid options.
    #[error("configuration error: {0}")]
    Config(String),

    /// A model is missing a setup step the call depends on.
    #[error("model {fid} not ready: {detail}")]
    NotReady { fid: u16, detail: String },

    /// A worker thread could not be started.
    #[error("failed to spawn worker on lcore {lcore}: {source}")]
    Spawn {
        lcore: usize,
        #[source]
        source: std::io::Error,
    },

    /// A worker thread panicked.
    #[error("worker on lcore {lcore} panicked")]
    WorkerPanicked { lcore: usize },

    /// A stalled run left operations in the device that could not be
    /// recovered.
    #[error("{outstanding} operation(s) from a stalled run still held by the device")]
    Undrained { outstanding: u64 },
}

impl BenchError {
    /// Returns the negative errno-like code for this error.
    pub fn errno(&self) -> i32 {
        use ml_device::DeviceError as D;

        let code = match self {
            BenchError::Device(D::Unsupported(_) | D::TooManyModels { .. }) => ENOTSUP,
            BenchError::Device(D::ModelFile { .. }) => ENOENT,
            BenchError::Device(_) => EINVAL,
            BenchError::Pool(io_pool::PoolError::AllocationFailed { .. }) => ENOMEM,
            BenchError::Pool(_) => EINVAL,
            BenchError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ENOENT
            }
            BenchError::Io { .. } => EIO,
            BenchError::InputSize { .. } => EINVAL,
            BenchError::Capability(_) => ENOTSUP,
            BenchError::Config(_) => EINVAL,
            BenchError::NotReady { .. } => EINVAL,
            BenchError::Spawn { .. } | BenchError::WorkerPanicked { .. } => EIO,
            BenchError::Undrained { .. } => EBUSY,
        };
        -code
    }
}
