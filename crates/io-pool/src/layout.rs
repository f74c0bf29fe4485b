// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Placement of quantized input/output regions inside a request buffer.
//!
//! An [`IoLayout`] is computed once per model and shared by every buffer in
//! that model's pool:
//!
//! ```text
//! 0                  align_ceil(input_len)          total_len()
//! ├── input region ──┤pad├── output region ──┤pad┤
//! ```
//!
//! Both region starts are multiples of the device's minimum alignment, and
//! the buffer base itself is aligned by [`RequestBuffer`](crate::RequestBuffer).

use crate::PoolError;

/// A byte range inside a request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Offset from the aligned buffer base.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl Region {
    /// Returns the exclusive end offset.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Alignment-rounded layout of one model's request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoLayout {
    align: usize,
    input: Region,
    output: Region,
    total_len: usize,
}

impl IoLayout {
    /// Computes the layout for the given quantized sizes.
    ///
    /// Returns `Err(InvalidAlignment)` if `align` is zero or not a power
    /// of two.
    pub fn new(input_len: usize, output_len: usize, align: usize) -> Result<Self, PoolError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(PoolError::InvalidAlignment(align));
        }

        let input = Region {
            offset: 0,
            len: input_len,
        };
        let output = Region {
            offset: align_ceil(input_len, align),
            len: output_len,
        };
        let total_len = output.offset + align_ceil(output_len, align);

        Ok(Self {
            align,
            input,
            output,
            total_len,
        })
    }

    /// Returns the alignment every region start honours.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Returns the quantized input region.
    pub fn input(&self) -> Region {
        self.input
    }

    /// Returns the quantized output region.
    pub fn output(&self) -> Region {
        self.output
    }

    /// Returns the padded size of one buffer, excluding base alignment slack.
    pub fn total_len(&self) -> usize {
        self.total_len
    }
}

/// Rounds `value` up to the next multiple of `align` (a power of two).
pub fn align_ceil(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
