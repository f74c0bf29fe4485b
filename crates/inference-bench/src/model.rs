// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The model registry entry.
//!
//! A [`Model`] is created in [`ModelState::Initial`] for each filelist entry
//! at setup, gains a device handle when loaded, and gains its raw staging
//! memory and private request-buffer pool in `build_io`. During a run it is
//! read-only.

use crate::FileEntry;
use io_pool::{IoLayout, ObjectPool, PoolStats, RequestBuffer};
use ml_device::{IoSizes, ModelHandle};
use std::fmt;

/// Lifecycle state reported by the device collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ModelState {
    Initial,
    Loaded,
    Started,
    Finished,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelState::Initial => "initial",
            ModelState::Loaded => "loaded",
            ModelState::Started => "started",
            ModelState::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Host-domain input and output bytes for one model.
///
/// One allocation: the raw input followed by the raw output.
#[derive(Debug)]
pub struct RawStaging {
    data: Vec<u8>,
    input_len: usize,
}

impl RawStaging {
    /// Reserves zeroed staging for `input_len + output_len` bytes.
    pub(crate) fn new(input_len: usize, output_len: usize) -> Result<Self, io_pool::PoolError> {
        let total = input_len + output_len;
        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|e| io_pool::PoolError::AllocationFailed {
                requested_bytes: total,
                detail: e.to_string(),
            })?;
        data.resize(total, 0);
        Ok(Self { data, input_len })
    }

    /// Returns the raw input bytes.
    pub fn input(&self) -> &[u8] {
        &self.data[..self.input_len]
    }

    pub(crate) fn input_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.input_len]
    }

    /// Returns the raw output bytes.
    pub fn output(&self) -> &[u8] {
        &self.data[self.input_len..]
    }

    pub(crate) fn output_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.input_len..]
    }
}

/// One loaded model, indexed by filelist id.
pub struct Model {
    pub(crate) fid: u16,
    pub(crate) files: FileEntry,
    pub(crate) state: ModelState,
    pub(crate) handle: Option<ModelHandle>,
    pub(crate) name: String,
    pub(crate) batch_size: u32,
    pub(crate) sizes: Option<IoSizes>,
    pub(crate) layout: Option<IoLayout>,
    pub(crate) staging: Option<RawStaging>,
    pub(crate) io_pool: Option<ObjectPool<RequestBuffer>>,
}

impl Model {
    pub(crate) fn new(fid: u16, files: FileEntry) -> Self {
        Self {
            fid,
            files,
            state: ModelState::Initial,
            handle: None,
            name: String::new(),
            batch_size: 0,
            sizes: None,
            layout: None,
            staging: None,
            io_pool: None,
        }
    }

    /// Returns the filelist id.
    pub fn fid(&self) -> u16 {
        self.fid
    }

    /// Returns the filelist entry this model was created from.
    pub fn files(&self) -> &FileEntry {
        &self.files
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Returns the device handle, once loaded.
    pub fn handle(&self) -> Option<ModelHandle> {
        self.handle
    }

    /// Returns the device-reported model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the batch size operations are submitted with.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Returns the I/O sizes, once `build_io` has run.
    pub fn io_sizes(&self) -> Option<IoSizes> {
        self.sizes
    }

    /// Returns the request-buffer layout, once `build_io` has run.
    pub fn layout(&self) -> Option<&IoLayout> {
        self.layout.as_ref()
    }

    /// Returns the raw staging memory, once `build_io` has run.
    pub fn staging(&self) -> Option<&RawStaging> {
        self.staging.as_ref()
    }

    /// Returns the private request-buffer pool, once `build_io` has run.
    pub fn io_pool(&self) -> Option<&ObjectPool<RequestBuffer>> {
        self.io_pool.as_ref()
    }

    /// Returns the request-buffer pool counters, if the pool exists.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.io_pool.as_ref().map(ObjectPool::stats)
    }

    /// Drops the pool and the staging memory. Safe to call repeatedly.
    pub(crate) fn release_io(&mut self) {
        if let Some(pool) = self.io_pool.take() {
            tracing::debug!("model {}: io pool '{}' destroyed", self.fid, pool.name());
        }
        self.staging = None;
        self.layout = None;
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("fid", &self.fid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("batch_size", &self.batch_size)
            .field("has_pool", &self.io_pool.is_some())
            .finish()
    }
}
