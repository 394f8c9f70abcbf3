//! Cooperative tasklet scheduler.
//!
//! Each `Scheduler` owns a small set of [`Tasklet`]s and drives them, in registration order, on
//! a single OS thread pinned to one lcore. Many schedulers run in parallel; the
//! [`crate::admin`] controller rebalances sessions across them by inspecting each scheduler's
//! busy score and migrating the worst offender.

use crate::config::SchedulerConfig;
use crate::dpdk;
use crate::error::TransportError;
use crate::lcore::tasklet::{Tasklet, TaskletResult};
use crate::lcore::CoreId;
use crate::multicore::pin_thread_to_core;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Opaque handle to a tasklet registered with a [`Scheduler`]; stable across the tasklet's
/// lifetime, reused after `unregister_tasklet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskletId(pub usize);

struct Slot {
    tasklet: Box<dyn Tasklet>,
    last_cost_ns: AtomicU64,
}

/// Opaque hold on one scheduler's tasklet table, acquired via [`Scheduler::lock_for_migration`].
/// Deliberately doesn't expose the `Slot` table itself: callers outside this module only ever
/// thread it back into `detach_tasklet_locked`/`attach_tasklet_locked`.
pub(crate) struct SlotsGuard<'a>(std::sync::MutexGuard<'a, Vec<Option<Slot>>>);

/// A single-threaded cooperative scheduler pinned to one lcore.
pub struct Scheduler {
    cfg: SchedulerConfig,
    core: CoreId,
    slots: Mutex<Vec<Option<Slot>>>,
    started: AtomicBool,
    stop: Arc<AtomicBool>,
    avg_ns_per_loop: AtomicU64,
    sleep_ratio_score: Mutex<f64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig, core: CoreId) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            cfg,
            core,
            slots: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            avg_ns_per_loop: AtomicU64::new(0),
            sleep_ratio_score: Mutex::new(0.0),
            handle: Mutex::new(None),
        })
    }

    /// Registers a tasklet. Only safe before `start_all`, or while holding the registration
    /// lock implied by a stopped scheduler.
    pub fn register_tasklet(&self, tasklet: Box<dyn Tasklet>) -> Result<TaskletId, TransportError> {
        if self.started.load(Ordering::Acquire) {
            return Err(TransportError::InvalidArgument(
                "cannot register a tasklet on a running scheduler".into(),
            ));
        }
        let mut slots = self.slots.lock().unwrap();
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Slot {
                    tasklet,
                    last_cost_ns: AtomicU64::new(0),
                });
                return Ok(TaskletId(i));
            }
        }
        slots.push(Some(Slot {
            tasklet,
            last_cost_ns: AtomicU64::new(0),
        }));
        Ok(TaskletId(slots.len() - 1))
    }

    pub fn unregister_tasklet(&self, id: TaskletId) -> Result<(), TransportError> {
        if self.started.load(Ordering::Acquire) {
            return Err(TransportError::InvalidArgument(
                "cannot unregister a tasklet on a running scheduler".into(),
            ));
        }
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(id.0) {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => Err(TransportError::InvalidArgument(format!(
                "no tasklet registered with id {}",
                id.0
            ))),
        }
    }

    /// Lifts a tasklet out of a running scheduler for the admin controller's migration path.
    /// Unlike `unregister_tasklet`, this is safe while the scheduler thread is active: the run
    /// loop re-acquires `slots` fresh every iteration, so removing an entry under the same lock
    /// never races with a handler call in progress.
    pub fn detach_tasklet(&self, id: TaskletId) -> Option<Box<dyn Tasklet>> {
        let mut slots = self.slots.lock().unwrap();
        slots.get_mut(id.0).and_then(|slot| slot.take()).map(|s| s.tasklet)
    }

    /// Inserts a tasklet lifted from another scheduler via `detach_tasklet`, reusing a freed slot
    /// when one exists. Safe on a running scheduler for the same reason as `detach_tasklet`.
    pub fn attach_tasklet(&self, tasklet: Box<dyn Tasklet>) -> TaskletId {
        let mut slots = self.slots.lock().unwrap();
        Self::insert_into(&mut slots, tasklet)
    }

    /// Locks this scheduler's tasklet table for a migration, returning an opaque token the
    /// admin controller holds alongside another scheduler's token for the duration of the move.
    /// Migrations always lock the two schedulers' tables in ascending scheduler-index order, so
    /// no other thread observes a session owned by neither or both schedulers.
    pub(crate) fn lock_for_migration(&self) -> SlotsGuard<'_> {
        SlotsGuard(self.slots.lock().unwrap())
    }

    /// Same as `detach_tasklet`, but takes a lock already acquired via `lock_for_migration`
    /// instead of locking `self.slots` itself.
    pub(crate) fn detach_tasklet_locked(&self, guard: &mut SlotsGuard<'_>, id: TaskletId) -> Option<Box<dyn Tasklet>> {
        guard.0.get_mut(id.0).and_then(|slot| slot.take()).map(|s| s.tasklet)
    }

    /// Same as `attach_tasklet`, but takes a lock already acquired via `lock_for_migration`
    /// instead of locking `self.slots` itself.
    pub(crate) fn attach_tasklet_locked(&self, guard: &mut SlotsGuard<'_>, tasklet: Box<dyn Tasklet>) -> TaskletId {
        Self::insert_into(&mut guard.0, tasklet)
    }

    fn insert_into(slots: &mut Vec<Option<Slot>>, tasklet: Box<dyn Tasklet>) -> TaskletId {
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Slot {
                    tasklet,
                    last_cost_ns: AtomicU64::new(0),
                });
                return TaskletId(i);
            }
        }
        slots.push(Some(Slot {
            tasklet,
            last_cost_ns: AtomicU64::new(0),
        }));
        TaskletId(slots.len() - 1)
    }

    /// Session id and stats for every tasklet that wraps a session, for the monitor's aggregate
    /// view. Control-plane tasklets (PTP, multicast) contribute nothing.
    pub fn session_snapshots(&self) -> Vec<(crate::session::SessionId, crate::session::SessionStats)> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .flatten()
            .filter_map(|slot| slot.tasklet.session_snapshot())
            .collect()
    }

    /// Most recent per-loop cost recorded for `id`, used by the admin controller's busy-score
    /// computation.
    pub fn tasklet_cost_ns(&self, id: TaskletId) -> u64 {
        let slots = self.slots.lock().unwrap();
        slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .map(|s| s.last_cost_ns.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Average wall-clock cost of one full scheduler loop, in nanoseconds.
    pub fn avg_ns_per_loop(&self) -> u64 {
        self.avg_ns_per_loop.load(Ordering::Relaxed)
    }

    /// Carried from the original scheduler's `has_busy` heuristic: a scheduler that cannot sleep
    /// at all, or whose recent sleep ratio exceeds the configured threshold, is busy.
    pub fn has_busy(&self) -> bool {
        self.cfg.force_sleep_us == Some(0) || *self.sleep_ratio_score.lock().unwrap() > self.cfg.busy_sleep_ratio_pct
    }

    /// Launches the scheduler's worker thread, pinning it to its assigned lcore.
    pub fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let this = Arc::clone(self);
        let stop = Arc::clone(&self.stop);
        let core = self.core;
        let builder = std::thread::Builder::new().name(format!("sch-{}", core.raw()));
        let handle = builder
            .spawn(move || {
                if let Err(e) = pin_thread_to_core(core.raw()) {
                    log::error!("scheduler on core {}: failed to pin thread: {}", core, e);
                }
                this.run_loop(&stop);
            })
            .map_err(|e| TransportError::IoFailure(format!("spawn scheduler thread: {}", e)))?;
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.started.store(false, Ordering::Release);
    }

    fn run_loop(&self, stop: &AtomicBool) {
        let mut sleep_loops: u64 = 0;
        let mut total_loops: u64 = 0;
        while !stop.load(Ordering::Relaxed) {
            let loop_start = Instant::now();
            let mut all_done = true;
            {
                let mut slots = self.slots.lock().unwrap();
                for slot in slots.iter_mut().flatten() {
                    let t0 = Instant::now();
                    let result = slot.tasklet.handler();
                    slot.last_cost_ns
                        .store(t0.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    if result == TaskletResult::Pending {
                        all_done = false;
                    }
                }
            }
            let loop_ns = loop_start.elapsed().as_nanos() as u64;
            let prev = self.avg_ns_per_loop.load(Ordering::Relaxed);
            let smoothed = if prev == 0 { loop_ns } else { (prev * 7 + loop_ns) / 8 };
            self.avg_ns_per_loop.store(smoothed, Ordering::Relaxed);

            total_loops += 1;
            let advised = self.sleep_advice(all_done);
            if let Some(sleep) = advised {
                sleep_loops += 1;
                std::thread::sleep(sleep);
            }
            if total_loops % 1024 == 0 {
                *self.sleep_ratio_score.lock().unwrap() =
                    100.0 * sleep_loops as f64 / total_loops as f64;
            }
        }
    }

    fn sleep_advice(&self, all_done: bool) -> Option<Duration> {
        if let Some(forced) = self.cfg.force_sleep_us {
            return if forced == 0 {
                None
            } else {
                Some(Duration::from_micros(forced))
            };
        }
        if !all_done {
            return None;
        }
        let advised = self.cfg.default_sleep_us.min(self.cfg.default_sleep_us);
        if advised < self.cfg.sleep_threshold_us {
            None
        } else {
            Some(Duration::from_micros(advised))
        }
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Current TSC-derived timestamp, for tasklets that need a monotonic clock without a
    /// syscall.
    pub fn now_cycles() -> u64 {
        unsafe { dpdk::rte_rdtsc() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcore::tasklet::TaskletResult;

    struct OnceTasklet(bool);
    impl Tasklet for OnceTasklet {
        fn name(&self) -> &str {
            "once"
        }
        fn handler(&mut self) -> TaskletResult {
            if self.0 {
                self.0 = false;
                TaskletResult::Pending
            } else {
                TaskletResult::AllDone
            }
        }
    }

    #[test]
    fn register_reuses_freed_slots() {
        let sch = Scheduler::new(SchedulerConfig::default(), CoreId(0));
        let id0 = sch.register_tasklet(Box::new(OnceTasklet(true))).unwrap();
        sch.unregister_tasklet(id0).unwrap();
        let id1 = sch.register_tasklet(Box::new(OnceTasklet(true))).unwrap();
        assert_eq!(id0, id1);
    }

    #[test]
    fn has_busy_reflects_forced_zero_sleep() {
        let mut cfg = SchedulerConfig::default();
        cfg.force_sleep_us = Some(0);
        let sch = Scheduler::new(cfg, CoreId(0));
        assert!(sch.has_busy());
    }
}
