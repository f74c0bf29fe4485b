// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-capacity, lock-free object pool.
//!
//! The [`ObjectPool`] is the only synchronisation point between the enqueue
//! and dequeue sides of a run. It:
//!
//! 1. Builds all of its objects up front through an explicit factory, so
//!    a failed build leaves no pool behind.
//! 2. Hands objects out by value from a bounded `ArrayQueue` free list.
//!    `try_acquire` returns `None` on exhaustion instead of blocking.
//! 3. Takes objects back by value on `release`.
//! 4. Counts acquires, releases and empty misses.
//!
//! # Thread Safety
//! `ObjectPool<T>` is `Send + Sync` for `T: Send`. Acquire and release are
//! CAS operations on the free list; no external lock is needed.

use crate::{PoolError, PoolStats};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on the number of objects in any pool.
pub const MAX_POOL_SIZE: usize = 256;

/// A bounded pool of pre-built, homogeneous objects.
pub struct ObjectPool<T> {
    name: String,
    free: ArrayQueue<T>,
    acquires: AtomicU64,
    releases: AtomicU64,
    empty_misses: AtomicU64,
}

impl<T> ObjectPool<T> {
    /// Builds a pool of `capacity` objects, calling `factory` once per slot
    /// with the slot index.
    ///
    /// The first factory error aborts construction; objects built so far
    /// are dropped and the error is returned.
    pub fn with_factory<F, E>(
        name: impl Into<String>,
        capacity: usize,
        mut factory: F,
    ) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<T, E>,
        E: From<PoolError>,
    {
        let name = name.into();
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity { pool: name }.into());
        }

        let free = ArrayQueue::new(capacity);
        for idx in 0..capacity {
            let obj = factory(idx)?;
            if free.push(obj).is_err() {
                return Err(PoolError::Overflow { pool: name, capacity }.into());
            }
        }

        Ok(Self {
            name,
            free,
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            empty_misses: AtomicU64::new(0),
        })
    }

    /// Takes one object out of the pool, or `None` if the pool is empty.
    ///
    /// Never blocks. Callers that must make progress retry.
    pub fn try_acquire(&self) -> Option<T> {
        match self.free.pop() {
            Some(obj) => {
                self.acquires.fetch_add(1, Ordering::Relaxed);
                Some(obj)
            }
            None => {
                self.empty_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Returns an object to the pool.
    ///
    /// Returns `Err(Overflow)` if the pool already holds `capacity` objects,
    /// which means something was released twice or came from another pool.
    pub fn release(&self, obj: T) -> Result<(), PoolError> {
        match self.free.push(obj) {
            Ok(()) => {
                self.releases.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => Err(PoolError::Overflow {
                pool: self.name.clone(),
                capacity: self.capacity(),
            }),
        }
    }

    /// Visits every object currently in the free list.
    ///
    /// Objects are popped, handed to `f`, and pushed back. Only meaningful
    /// while no other thread is acquiring or releasing, e.g. after all
    /// workers have joined. Does not touch the acquire/release counters.
    pub fn for_each_free<F>(&self, mut f: F)
    where
        F: FnMut(&mut T),
    {
        let n = self.free.len();
        for _ in 0..n {
            let Some(mut obj) = self.free.pop() else {
                break;
            };
            f(&mut obj);
            let pushed = self.free.push(obj);
            debug_assert!(pushed.is_ok(), "pool '{}' refilled concurrently", self.name);
        }
    }

    /// Returns the pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of objects the pool was built with.
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Returns the number of objects currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            available: self.available(),
            acquires: self.acquires.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            empty_misses: self.empty_misses.load(Ordering::Relaxed),
        }
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}
