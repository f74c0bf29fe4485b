// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # io-pool
//!
//! Fixed-capacity object pools for the inference-request hot path.
//!
//! Every object a benchmark run touches is created up front, when its pool
//! is built, and then cycles between the pool and exactly one in-flight
//! operation. Nothing is allocated per request.
//!
//! # Key Components
//!
//! - [`ObjectPool`]: a bounded, lock-free free list (`crossbeam` `ArrayQueue`)
//!   populated once by an explicit factory. `try_acquire` never blocks;
//!   callers retry on exhaustion.
//! - [`IoLayout`]: the alignment-rounded placement of a model's quantized
//!   input and output regions inside one request buffer.
//! - [`RequestBuffer`]: one pooled input/output allocation plus its
//!   dispatch counter and owning model id.
//! - [`PoolStats`]: acquire/release/miss counters for diagnostics.
//!
//! # Ownership Model
//!
//! ```text
//! ObjectPool::with_factory(n, factory)   ── n objects built up front
//!       │
//!       ▼
//!   try_acquire() ──► T (moved out, exclusively owned)
//!       │
//!       │  release(T)
//!       ▼
//!   free list  ──► next try_acquire()
//! ```
//!
//! Objects are moved out of the pool, so two owners of the same object
//! cannot exist. Releasing is an explicit move back in.
//!
//! # Example
//! ```
//! use io_pool::{IoLayout, ObjectPool, PoolError, RequestBuffer};
//!
//! let layout = IoLayout::new(100, 40, 64).unwrap();
//! let pool: ObjectPool<RequestBuffer> =
//!     ObjectPool::with_factory("io_pool_0", 4, |_| RequestBuffer::new(layout))?;
//!
//! let buf = pool.try_acquire().unwrap();
//! assert_eq!(buf.input().len(), 100);
//! assert_eq!(pool.available(), 3);
//!
//! pool.release(buf)?;
//! assert_eq!(pool.stats().in_use(), 0);
//! # Ok::<(), PoolError>(())
//! ```

mod error;
mod layout;
pub mod pool;
mod request;
mod stats;

pub use error::PoolError;
pub use layout::{align_ceil, IoLayout, Region};
pub use pool::{ObjectPool, MAX_POOL_SIZE};
pub use request::RequestBuffer;
pub use stats::PoolStats;
