// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for pool construction and use.

/// Errors that can occur while building or using an object pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A pool was requested with no objects in it.
    #[error("cannot create pool '{pool}' with zero capacity")]
    ZeroCapacity { pool: String },

    /// Backing memory for a pooled object could not be reserved.
    #[error("allocation of {requested_bytes} bytes failed: {detail}")]
    AllocationFailed {
        requested_bytes: usize,
        detail: String,
    },

    /// The device alignment is zero or not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// More objects were released than the pool was built with.
    #[error("pool '{pool}' overflow: release exceeds capacity {capacity}")]
    Overflow { pool: String, capacity: usize },
}
