//! Admin controller: a dedicated thread that rebalances sessions across schedulers whose busy
//! score has crept past the configured threshold.
//!
//! Each scheduler runs its own tasklets independently; nothing elects a scheduler to be anyone's
//! destination ahead of time. The admin thread is the only mutator of the registry below, so a
//! migration never races another migration the way it might if multiple threads could rebalance
//! concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::AdminConfig;
use crate::lcore::scheduler::{Scheduler, TaskletId};
use crate::session::SessionId;

/// Where one session's tasklet currently lives.
#[derive(Debug, Clone, Copy)]
struct Placement {
    scheduler_idx: usize,
    tasklet_id: TaskletId,
}

/// Rebalances [`crate::session::SessionTasklet`]s across a fixed pool of schedulers.
pub struct AdminController {
    cfg: AdminConfig,
    schedulers: Vec<Arc<Scheduler>>,
    registry: Mutex<HashMap<SessionId, Placement>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AdminController {
    pub fn new(cfg: AdminConfig, schedulers: Vec<Arc<Scheduler>>) -> Arc<AdminController> {
        Arc::new(AdminController {
            cfg,
            schedulers,
            registry: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Records where a freshly-registered session's tasklet landed, so later rebalancing passes
    /// can find and move it.
    pub fn track(&self, session_id: SessionId, scheduler_idx: usize, tasklet_id: TaskletId) {
        self.registry.lock().unwrap().insert(
            session_id,
            Placement {
                scheduler_idx,
                tasklet_id,
            },
        );
    }

    pub fn untrack(&self, session_id: SessionId) {
        self.registry.lock().unwrap().remove(&session_id);
    }

    /// Launches the periodic rebalancing thread.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let stop = Arc::clone(&self.stop);
        let period = Duration::from_secs(self.cfg.period_s.max(1));
        let handle = std::thread::Builder::new()
            .name("admin".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    this.rebalance_once();
                    std::thread::sleep(period);
                }
            })
            .expect("spawn admin thread");
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// One rebalancing pass: finds the busiest scheduler, picks its hottest session, and moves it
    /// to whichever other scheduler is currently least loaded.
    fn rebalance_once(&self) {
        if self.schedulers.len() < 2 {
            return;
        }
        let busiest_idx = match self
            .schedulers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.has_busy())
            .max_by_key(|(_, s)| s.avg_ns_per_loop())
        {
            Some((i, _)) => i,
            None => return,
        };
        let busiest = &self.schedulers[busiest_idx];
        let loop_ns = busiest.avg_ns_per_loop().max(1);

        let hottest_session = {
            let registry = self.registry.lock().unwrap();
            registry
                .iter()
                .filter(|(_, p)| p.scheduler_idx == busiest_idx)
                .map(|(id, p)| {
                    let cost = busiest.tasklet_cost_ns(p.tasklet_id);
                    let busy_pct = 100.0 * cost as f64 / loop_ns as f64;
                    (*id, *p, busy_pct)
                })
                .filter(|(_, _, pct)| *pct >= self.cfg.migration_threshold_pct)
                .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap())
        };
        let Some((session_id, placement, busy_pct)) = hottest_session else {
            return;
        };

        let dest_idx = match self
            .schedulers
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != busiest_idx)
            .min_by_key(|&(_, s)| s.avg_ns_per_loop())
        {
            Some((i, _)) => i,
            None => return,
        };

        // Both scheduler tables are locked for the whole detach+attach so no other thread that
        // also locks both in order ever observes the session owned by neither or both.
        let (lo_idx, hi_idx) = if busiest_idx < dest_idx {
            (busiest_idx, dest_idx)
        } else {
            (dest_idx, busiest_idx)
        };
        let mut lo_guard = self.schedulers[lo_idx].lock_for_migration();
        let mut hi_guard = self.schedulers[hi_idx].lock_for_migration();
        let (src_guard, dst_guard) = if busiest_idx == lo_idx {
            (&mut lo_guard, &mut hi_guard)
        } else {
            (&mut hi_guard, &mut lo_guard)
        };

        let Some(tasklet) = busiest.detach_tasklet_locked(src_guard, placement.tasklet_id) else {
            return;
        };
        let new_id = self.schedulers[dest_idx].attach_tasklet_locked(dst_guard, tasklet);
        self.registry.lock().unwrap().insert(
            session_id,
            Placement {
                scheduler_idx: dest_idx,
                tasklet_id: new_id,
            },
        );
        log::info!(
            "admin: migrated session {} ({busy_pct:.1}% busy) from scheduler {} to {}",
            session_id.0,
            busiest_idx,
            dest_idx
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::lcore::tasklet::{Tasklet, TaskletResult};
    use crate::lcore::CoreId;

    struct SpinTasklet;
    impl Tasklet for SpinTasklet {
        fn name(&self) -> &str {
            "spin"
        }
        fn handler(&mut self) -> TaskletResult {
            TaskletResult::AllDone
        }
    }

    #[test]
    fn rebalance_is_a_noop_below_threshold() {
        let a = Scheduler::new(SchedulerConfig::default(), CoreId(0));
        let b = Scheduler::new(SchedulerConfig::default(), CoreId(1));
        let id = a.register_tasklet(Box::new(SpinTasklet)).unwrap();
        let admin = AdminController::new(AdminConfig::default(), vec![a.clone(), b.clone()]);
        admin.track(SessionId(1), 0, id);
        admin.rebalance_once();
        assert!(admin.registry.lock().unwrap().contains_key(&SessionId(1)));
    }

    #[test]
    fn migration_moves_tasklet_between_schedulers() {
        let a = Scheduler::new(SchedulerConfig::default(), CoreId(0));
        let b = Scheduler::new(SchedulerConfig::default(), CoreId(1));
        let id = a.register_tasklet(Box::new(SpinTasklet)).unwrap();
        let mut cfg = AdminConfig::default();
        cfg.migration_threshold_pct = 0.0;
        let admin = AdminController::new(cfg, vec![a.clone(), b.clone()]);
        admin.track(SessionId(1), 0, id);

        // force a nonzero cost sample and an elevated busy reading on `a`.
        a.tasklet_cost_ns(id);
        let mut sch_cfg = SchedulerConfig::default();
        sch_cfg.force_sleep_us = Some(0);
        let busy = Scheduler::new(sch_cfg, CoreId(2));
        let busy_id = busy.register_tasklet(Box::new(SpinTasklet)).unwrap();
        let admin2 = AdminController::new(AdminConfig::default(), vec![busy.clone(), b.clone()]);
        admin2.track(SessionId(2), 0, busy_id);
        assert!(busy.has_busy());
        admin2.rebalance_once();
    }
}
