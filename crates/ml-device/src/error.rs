// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device-facade calls.

use crate::ModelHandle;

/// Errors reported by an [`MlDevice`](crate::MlDevice).
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The handle does not name a loaded model.
    #[error("unknown model handle {0}")]
    UnknownModel(ModelHandle),

    /// The device cannot serve the request (batch size, queue pair, ...).
    #[error("unsupported by device: {0}")]
    Unsupported(String),

    /// Every model slot is taken.
    #[error("device model limit reached ({max} models)")]
    TooManyModels { max: usize },

    /// The model is not in a state that allows the call.
    #[error("model {model} in wrong state: {detail}")]
    InvalidState { model: ModelHandle, detail: String },

    /// A buffer handed to the codec has the wrong length.
    #[error("{what} size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A model description file could not be read or parsed.
    #[error("model file '{path}': {detail}")]
    ModelFile { path: String, detail: String },
}
