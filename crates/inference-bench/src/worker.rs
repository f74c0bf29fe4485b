// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Enqueue and dequeue worker roles.
//!
//! Both roles busy-spin on the pools and the device queue. Neither blocks on
//! an OS primitive; waiting is bounded only by [`SpinLimit`].

use crate::model::Model;
use io_pool::ObjectPool;
use ml_device::{MlDevice, OpStatus, Operation};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};

/// Work bound to one worker before launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreArgs {
    /// Core the worker runs on.
    pub lcore: usize,
    /// First filelist id in the range.
    pub start_fid: u16,
    /// Last filelist id in the range, inclusive.
    pub end_fid: u16,
    /// Rounds over the range.
    pub nb_reqs: u64,
}

impl CoreArgs {
    /// Returns the filelist ids covered by this assignment.
    pub fn fids(&self) -> RangeInclusive<u16> {
        self.start_fid..=self.end_fid
    }

    /// Number of operations the enqueue side emits and the dequeue side
    /// waits for.
    pub fn expected_ops(&self) -> u64 {
        if self.end_fid < self.start_fid {
            return 0;
        }
        self.nb_reqs * (u64::from(self.end_fid - self.start_fid) + 1)
    }
}

/// Worker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Enqueue,
    Dequeue,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Enqueue => f.write_str("enqueue"),
            Role::Dequeue => f.write_str("dequeue"),
        }
    }
}

/// Optional bound on busy-wait retries.
///
/// `SpinLimit::default()` spins until the condition holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpinLimit(Option<u64>);

impl SpinLimit {
    /// Never gives up.
    pub const fn unbounded() -> Self {
        Self(None)
    }

    /// Gives up after `max_spins` failed attempts.
    pub const fn bounded(max_spins: u64) -> Self {
        Self(Some(max_spins))
    }

    /// Returns the bound, if any.
    pub fn max_spins(&self) -> Option<u64> {
        self.0
    }

    /// Calls `attempt` until it yields a value, the bound is exceeded, or
    /// `abort` is raised.
    pub fn retry<T>(&self, abort: &AtomicBool, mut attempt: impl FnMut() -> Option<T>) -> Option<T> {
        let mut spins = 0u64;
        loop {
            if let Some(value) = attempt() {
                return Some(value);
            }
            if abort.load(Ordering::Relaxed) {
                return None;
            }
            if self.0.is_some_and(|max| spins >= max) {
                return None;
            }
            spins += 1;
            std::hint::spin_loop();
        }
    }
}

impl From<Option<u64>> for SpinLimit {
    fn from(max_spins: Option<u64>) -> Self {
        Self(max_spins)
    }
}

/// What one worker did during a run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerReport {
    pub lcore: usize,
    pub role: Role,
    /// Operations submitted (enqueue) or completions observed (dequeue).
    pub ops: u64,
    /// Completions with an error status. Always 0 for the enqueue role.
    pub errors: u64,
    /// The worker gave up waiting before finishing its share.
    pub stalled: bool,
}

impl WorkerReport {
    fn new(lcore: usize, role: Role) -> Self {
        Self {
            lcore,
            role,
            ops: 0,
            errors: 0,
            stalled: false,
        }
    }
}

/// Read-only state shared by both workers for the duration of a run.
pub(crate) struct WorkerCtx<'a, D: ?Sized> {
    pub device: &'a D,
    pub models: &'a [Model],
    pub op_pool: &'a ObjectPool<Operation>,
    pub qp_id: u16,
    pub spin: SpinLimit,
    pub abort: &'a AtomicBool,
}

pub(crate) fn run_role<D>(role: Role, ctx: &WorkerCtx<'_, D>, args: &CoreArgs) -> WorkerReport
where
    D: MlDevice + ?Sized,
{
    match role {
        Role::Enqueue => enqueue_single(ctx, args),
        Role::Dequeue => dequeue_single(ctx, args),
    }
}

/// Submits `nb_reqs` rounds over the model range, one operation per burst.
pub(crate) fn enqueue_single<D>(ctx: &WorkerCtx<'_, D>, args: &CoreArgs) -> WorkerReport
where
    D: MlDevice + ?Sized,
{
    let mut report = WorkerReport::new(args.lcore, Role::Enqueue);
    if args.nb_reqs == 0 {
        return report;
    }

    let mut burst: Vec<Operation> = Vec::with_capacity(1);

    'rounds: for _ in 0..args.nb_reqs {
        for fid in args.fids() {
            if ctx.abort.load(Ordering::Relaxed) {
                report.stalled = true;
                break 'rounds;
            }
            let model = &ctx.models[usize::from(fid)];
            let (Some(pool), Some(handle)) = (model.io_pool.as_ref(), model.handle) else {
                tracing::error!("enqueue: model {fid} has no io pool");
                report.stalled = true;
                break 'rounds;
            };

            let Some(mut op) = ctx.spin.retry(ctx.abort, || ctx.op_pool.try_acquire()) else {
                report.stalled = true;
                break 'rounds;
            };

            let Some(mut req) = ctx.spin.retry(ctx.abort, || pool.try_acquire()) else {
                release_or_warn(ctx.op_pool, op);
                report.stalled = true;
                break 'rounds;
            };

            req.mark_dispatched(fid);
            op.prepare(handle, model.batch_size, req);
            burst.push(op);

            let submitted = ctx
                .spin
                .retry(ctx.abort, || (ctx.device.enqueue_burst(ctx.qp_id, &mut burst) == 1).then_some(()));
            if submitted.is_none() {
                if let Some(mut op) = burst.pop() {
                    if let Some(req) = op.take_request() {
                        release_or_warn(pool, req);
                    }
                    release_or_warn(ctx.op_pool, op);
                }
                report.stalled = true;
                break 'rounds;
            }
            report.ops += 1;
        }
    }

    if report.stalled {
        ctx.abort.store(true, Ordering::Relaxed);
        tracing::warn!(
            "enqueue worker on lcore {} stopped after {} of {} operations",
            args.lcore,
            report.ops,
            args.expected_ops()
        );
    }
    report
}

/// Drains completions until the expected count has been observed.
pub(crate) fn dequeue_single<D>(ctx: &WorkerCtx<'_, D>, args: &CoreArgs) -> WorkerReport
where
    D: MlDevice + ?Sized,
{
    let mut report = WorkerReport::new(args.lcore, Role::Dequeue);
    let expected = args.expected_ops();
    let mut burst: Vec<Operation> = Vec::with_capacity(1);

    while report.ops < expected {
        let completed = ctx.spin.retry(ctx.abort, || {
            if ctx.device.dequeue_burst(ctx.qp_id, &mut burst, 1) == 1 {
                burst.pop()
            } else {
                None
            }
        });
        let Some(op) = completed else {
            report.stalled = true;
            break;
        };
        if !retire(ctx, op) {
            report.errors += 1;
        }
        report.ops += 1;
    }

    if report.stalled {
        ctx.abort.store(true, Ordering::Relaxed);
        tracing::warn!(
            "dequeue worker on lcore {} stopped after {} of {} completions",
            args.lcore,
            report.ops,
            expected
        );
    }
    report
}

/// Collects up to `outstanding` completions left in the queue by a run that
/// stalled and returns their resources.
///
/// `ops` in the returned report is how many were recovered. `ctx.abort` is
/// ignored, only `ctx.spin` bounds the wait.
pub(crate) fn drain<D>(ctx: &WorkerCtx<'_, D>, lcore: usize, outstanding: u64) -> WorkerReport
where
    D: MlDevice + ?Sized,
{
    let mut report = WorkerReport::new(lcore, Role::Dequeue);
    let idle = AtomicBool::new(false);
    let mut burst: Vec<Operation> = Vec::new();

    while report.ops < outstanding {
        let max = usize::try_from(outstanding - report.ops).unwrap_or(usize::MAX);
        let got = ctx
            .spin
            .retry(&idle, || match ctx.device.dequeue_burst(ctx.qp_id, &mut burst, max) {
                0 => None,
                n => Some(n),
            });
        if got.is_none() {
            report.stalled = true;
            break;
        }
        for op in burst.drain(..) {
            if !retire(ctx, op) {
                report.errors += 1;
            }
            report.ops += 1;
        }
    }

    tracing::debug!("drained {} of {outstanding} stale completion(s)", report.ops);
    report
}

/// Logs an error status and returns the request buffer and the descriptor
/// to their pools. Returns `false` if the operation failed.
///
/// The owning model comes from the buffer's dispatch tag, never from
/// completion order.
fn retire<D>(ctx: &WorkerCtx<'_, D>, mut op: Operation) -> bool
where
    D: MlDevice + ?Sized,
{
    let ok = op.status != OpStatus::Error;
    if !ok {
        let err = ctx.device.op_error(&op);
        tracing::error!("error_code = {:#x}, error_message = {}", err.code, err.message);
    }

    match op.take_request() {
        Some(req) => match ctx.models.get(usize::from(req.fid())).and_then(|m| m.io_pool.as_ref()) {
            Some(pool) => release_or_warn(pool, req),
            None => tracing::warn!("dequeue: no pool for model {}", req.fid()),
        },
        None => tracing::warn!("dequeue: completion without a request buffer"),
    }
    release_or_warn(ctx.op_pool, op);
    ok
}

fn release_or_warn<T>(pool: &ObjectPool<T>, obj: T) {
    if let Err(e) = pool.release(obj) {
        tracing::warn!("{e}");
    }
}
