// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool usage statistics.
//!
//! [`PoolStats`] is a point-in-time snapshot of an [`ObjectPool`](crate::ObjectPool)'s
//! counters. After a run has drained, `acquires == releases` and
//! `available == capacity`; anything else is a leak.

/// Snapshot of one pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Number of objects the pool was built with.
    pub capacity: usize,
    /// Objects sitting in the free list at snapshot time.
    pub available: usize,
    /// Successful acquires.
    pub acquires: u64,
    /// Successful releases.
    pub releases: u64,
    /// Acquire attempts that found the pool empty.
    pub empty_misses: u64,
}

impl PoolStats {
    /// Returns the number of objects currently owned outside the pool.
    pub fn in_use(&self) -> u64 {
        self.acquires.saturating_sub(self.releases)
    }

    /// Returns the fraction of acquire attempts that found the pool empty.
    ///
    /// Returns `0.0` if nothing was attempted.
    pub fn miss_ratio(&self) -> f64 {
        let attempts = self.acquires + self.empty_misses;
        if attempts == 0 {
            return 0.0;
        }
        self.empty_misses as f64 / attempts as f64
    }

    /// Returns `true` when every acquired object has been returned.
    pub fn is_balanced(&self) -> bool {
        self.acquires == self.releases && self.available == self.capacity
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Pool: {}/{} free, {} acquires, {} releases, {} empty misses ({:.0}% miss rate)",
            self.available,
            self.capacity,
            self.acquires,
            self.releases,
            self.empty_misses,
            self.miss_ratio() * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = PoolStats::default();
        assert_eq!(s.in_use(), 0);
        assert_eq!(s.miss_ratio(), 0.0);
        assert!(s.is_balanced());
    }

    #[test]
    fn test_in_use() {
        let s = PoolStats {
            capacity: 4,
            available: 1,
            acquires: 10,
            releases: 7,
            empty_misses: 0,
        };
        assert_eq!(s.in_use(), 3);
        assert!(!s.is_balanced());
    }

    #[test]
    fn test_miss_ratio() {
        let s = PoolStats {
            acquires: 3,
            empty_misses: 1,
            ..Default::default()
        };
        assert!((s.miss_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_summary() {
        let s = PoolStats {
            capacity: 8,
            available: 8,
            acquires: 5,
            releases: 5,
            empty_misses: 0,
        };
        let summary = s.summary();
        assert!(summary.contains("8/8 free"));
        assert!(summary.contains("5 acquires"));
    }
}
