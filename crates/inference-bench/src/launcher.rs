// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Worker launch and core pinning.

use crate::worker::{run_role, CoreArgs, Role, WorkerCtx, WorkerReport};
use crate::BenchError;
use ml_device::MlDevice;
use std::sync::atomic::Ordering;
use std::thread;

/// Only two workers are ever active: one producer, one consumer.
const ACTIVE_WORKERS: usize = 2;

/// Binds roles to the first two worker cores, alternating enqueue/dequeue.
///
/// Both workers get the full fid range and repetition count. Extra cores
/// stay idle.
pub(crate) fn assign(
    lcores: &[usize],
    start_fid: u16,
    end_fid: u16,
    nb_reqs: u64,
) -> Vec<(Role, CoreArgs)> {
    lcores
        .iter()
        .take(ACTIVE_WORKERS)
        .enumerate()
        .map(|(n, &lcore)| {
            let role = if n % 2 == 0 { Role::Enqueue } else { Role::Dequeue };
            let args = CoreArgs {
                lcore,
                start_fid,
                end_fid,
                nb_reqs,
            };
            (role, args)
        })
        .collect()
}

/// Spawns one thread per assignment and blocks until all of them join.
///
/// If a spawn fails, already running workers are told to stop and the
/// spawn error is returned once they have joined.
pub(crate) fn launch<D>(
    ctx: &WorkerCtx<'_, D>,
    plan: &[(Role, CoreArgs)],
    pin_threads: bool,
) -> Result<Vec<WorkerReport>, BenchError>
where
    D: MlDevice + ?Sized,
{
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(plan.len());
        let mut spawn_error = None;

        for &(role, args) in plan {
            let spawned = thread::Builder::new()
                .name(format!("{role}-lcore{}", args.lcore))
                .spawn_scoped(scope, move || {
                    if pin_threads {
                        if let Err(e) = pin_to_core(args.lcore) {
                            tracing::warn!("cannot pin {role} worker to lcore {}: {e}", args.lcore);
                        }
                    }
                    tracing::debug!("{role} worker started on lcore {}", args.lcore);
                    run_role(role, ctx, &args)
                });

            match spawned {
                Ok(handle) => handles.push((args.lcore, handle)),
                Err(source) => {
                    ctx.abort.store(true, Ordering::Relaxed);
                    spawn_error = Some(BenchError::Spawn {
                        lcore: args.lcore,
                        source,
                    });
                    break;
                }
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut join_error = None;
        for (lcore, handle) in handles {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    join_error.get_or_insert(BenchError::WorkerPanicked { lcore });
                }
            }
        }

        match spawn_error.or(join_error) {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    })
}

/// Pins the calling thread to `core`.
#[cfg(target_os = "linux")]
pub(crate) fn pin_to_core(core: usize) -> std::io::Result<()> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset.set(core)?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin_to_core(_core: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "core pinning is only supported on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_alternates_roles() {
        let plan = assign(&[3, 5, 7, 9], 0, 2, 10);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, Role::Enqueue);
        assert_eq!(plan[0].1.lcore, 3);
        assert_eq!(plan[1].0, Role::Dequeue);
        assert_eq!(plan[1].1.lcore, 5);
        for (_, args) in &plan {
            assert_eq!(args.fids(), 0..=2);
            assert_eq!(args.nb_reqs, 10);
        }
    }

    #[test]
    fn test_assign_single_core() {
        let plan = assign(&[1], 0, 0, 1);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].0, Role::Enqueue);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pin_out_of_range_core_fails() {
        assert!(pin_to_core(usize::MAX).is_err());
    }
}
