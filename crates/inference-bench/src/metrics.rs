// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Run metrics.
//!
//! [`RunMetrics`] collects the per-worker reports and the wall-clock time of
//! one `run` call. Throughput is derived from completions, not submissions.

use crate::worker::{Role, WorkerReport};
use std::time::Duration;

/// Aggregate metrics for one benchmark run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunMetrics {
    /// First filelist id in the run.
    pub start_fid: u16,
    /// Last filelist id in the run, inclusive.
    pub end_fid: u16,
    /// Repetitions per worker.
    pub repetitions: u64,
    /// One report per active worker.
    pub workers: Vec<WorkerReport>,
    /// Wall-clock time from launch to join.
    pub duration: Duration,
}

impl RunMetrics {
    fn sum(&self, role: Role, f: impl Fn(&WorkerReport) -> u64) -> u64 {
        self.workers.iter().filter(|w| w.role == role).map(f).sum()
    }

    /// Operations accepted by the device.
    pub fn enqueued(&self) -> u64 {
        self.sum(Role::Enqueue, |w| w.ops)
    }

    /// Completions observed.
    pub fn completed(&self) -> u64 {
        self.sum(Role::Dequeue, |w| w.ops)
    }

    /// Completions with an error status, over all workers.
    pub fn errors(&self) -> u64 {
        self.workers.iter().map(|w| w.errors).sum()
    }

    /// Whether any worker gave up before finishing its share.
    pub fn stalled(&self) -> bool {
        self.workers.iter().any(|w| w.stalled)
    }

    /// Returns completions per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 || self.completed() == 0 {
            return 0.0;
        }
        self.completed() as f64 / secs
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Run: models {}..={}, {} reps, {} enqueued, {} completed, {} errors, \
             {:.2}ms ({:.0} ops/s){}",
            self.start_fid,
            self.end_fid,
            self.repetitions,
            self.enqueued(),
            self.completed(),
            self.errors(),
            self.duration.as_secs_f64() * 1000.0,
            self.ops_per_second(),
            if self.stalled() { ", STALLED" } else { "" },
        )
    }
}
