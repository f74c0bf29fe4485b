// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pooled request buffers.
//!
//! A [`RequestBuffer`] is one allocation carrying a model's quantized input
//! and output regions, carved out according to that model's [`IoLayout`].
//! It is owned either by its pool's free list or by exactly one in-flight
//! operation, never both.

use crate::{IoLayout, PoolError};

/// One pooled input/output allocation.
pub struct RequestBuffer {
    /// Backing bytes, over-allocated by `align` so the base can be aligned.
    storage: Box<[u8]>,
    /// Offset of the aligned base inside `storage`.
    base: usize,
    layout: IoLayout,
    /// Number of times this buffer has been dispatched.
    niters: u64,
    /// Filelist id of the model that last dispatched this buffer.
    fid: u16,
}

impl RequestBuffer {
    /// Allocates a zeroed buffer for `layout`.
    ///
    /// Returns `Err(AllocationFailed)` if the backing memory cannot be
    /// reserved.
    pub fn new(layout: IoLayout) -> Result<Self, PoolError> {
        let requested = layout.total_len() + layout.align();
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(requested)
            .map_err(|e| PoolError::AllocationFailed {
                requested_bytes: requested,
                detail: e.to_string(),
            })?;
        storage.resize(requested, 0u8);
        let storage = storage.into_boxed_slice();

        // The heap block does not move when the box does, so this offset
        // stays valid for the buffer's lifetime.
        let base = storage
            .as_ptr()
            .align_offset(layout.align())
            .min(layout.align() - 1);

        Ok(Self {
            storage,
            base,
            layout,
            niters: 0,
            fid: 0,
        })
    }

    /// Returns the layout this buffer was built with.
    pub fn layout(&self) -> &IoLayout {
        &self.layout
    }

    /// Returns the quantized input region.
    pub fn input(&self) -> &[u8] {
        let r = self.layout.input();
        &self.storage[self.base + r.offset..self.base + r.end()]
    }

    /// Returns the quantized input region for writing.
    pub fn input_mut(&mut self) -> &mut [u8] {
        let r = self.layout.input();
        &mut self.storage[self.base + r.offset..self.base + r.end()]
    }

    /// Returns the quantized output region.
    pub fn output(&self) -> &[u8] {
        let r = self.layout.output();
        &self.storage[self.base + r.offset..self.base + r.end()]
    }

    /// Returns the quantized output region for writing.
    pub fn output_mut(&mut self) -> &mut [u8] {
        let r = self.layout.output();
        &mut self.storage[self.base + r.offset..self.base + r.end()]
    }

    /// Returns the input region and the output region for writing at once.
    pub fn split_io_mut(&mut self) -> (&[u8], &mut [u8]) {
        let input = self.layout.input();
        let output = self.layout.output();
        let (head, tail) = self.storage.split_at_mut(self.base + output.offset);
        (
            &head[self.base + input.offset..self.base + input.end()],
            &mut tail[..output.len],
        )
    }

    /// Returns the address of the aligned buffer base.
    pub fn base_addr(&self) -> usize {
        self.storage.as_ptr() as usize + self.base
    }

    /// Records one dispatch on behalf of model `fid`.
    pub fn mark_dispatched(&mut self, fid: u16) {
        self.niters += 1;
        self.fid = fid;
    }

    /// Returns how many times this buffer has been dispatched.
    pub fn niters(&self) -> u64 {
        self.niters
    }

    /// Returns the filelist id stamped at the last dispatch.
    pub fn fid(&self) -> u16 {
        self.fid
    }
}

impl std::fmt::Debug for RequestBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuffer")
            .field("fid", &self.fid)
            .field("niters", &self.niters)
            .field("input_len", &self.layout.input().len)
            .field("output_len", &self.layout.output().len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_sized_by_layout() {
        let layout = IoLayout::new(100, 40, 64).unwrap();
        let buf = RequestBuffer::new(layout).unwrap();
        assert_eq!(buf.input().len(), 100);
        assert_eq!(buf.output().len(), 40);
        assert!(buf.input().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_base_is_aligned() {
        let layout = IoLayout::new(10, 10, 256).unwrap();
        for _ in 0..8 {
            let buf = RequestBuffer::new(layout).unwrap();
            assert_eq!(buf.base_addr() % 256, 0);
        }
    }

    #[test]
    fn test_regions_are_independent() {
        let layout = IoLayout::new(4, 4, 8).unwrap();
        let mut buf = RequestBuffer::new(layout).unwrap();
        buf.input_mut().fill(0xAA);
        buf.output_mut().fill(0x55);
        assert!(buf.input().iter().all(|&b| b == 0xAA));
        assert!(buf.output().iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_split_io_mut() {
        let layout = IoLayout::new(3, 3, 4).unwrap();
        let mut buf = RequestBuffer::new(layout).unwrap();
        buf.input_mut().copy_from_slice(&[1, 2, 3]);
        let (input, output) = buf.split_io_mut();
        output.copy_from_slice(input);
        assert_eq!(buf.output(), &[1, 2, 3]);
    }

    #[test]
    fn test_mark_dispatched() {
        let layout = IoLayout::new(1, 1, 1).unwrap();
        let mut buf = RequestBuffer::new(layout).unwrap();
        assert_eq!(buf.niters(), 0);
        buf.mark_dispatched(3);
        buf.mark_dispatched(3);
        assert_eq!(buf.niters(), 2);
        assert_eq!(buf.fid(), 3);
    }
}
