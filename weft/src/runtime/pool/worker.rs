use crate::job::JobRef;
use crate::runtime::PoolConfig;
use crate::runtime::pool::Shared;
use crossbeam_deque::{Stealer, Worker as CbWorker};
use static_assertions::assert_impl_all;
use std::iter;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub(super) struct Worker {
    shared: Arc<Shared>,

    /// Local queue, filled in batches from the injector. Other workers steal
    /// from it.
    local: CbWorker<JobRef>,

    /// Handle to all of the other workers' local queues. If there are N
    /// workers we will have N-1 queues to steal from.
    stealers: Vec<Stealer<JobRef>>,

    /// How many ticks before pulling a job from the injector first.
    global_queue_interval: u32,

    max_steal_retries: usize,

    /// Flag this worker waits on while parked.
    should_unpark: Arc<AtomicBool>,
}

impl Worker {
    pub(super) fn new(
        cfg: &PoolConfig,
        shared: Arc<Shared>,
        local: CbWorker<JobRef>,
        mut stealers: Vec<Stealer<JobRef>>,
    ) -> Self {
        // Shuffle the stealers so that each worker's search order when trying to
        // steal work is different and hopefully unique to reduce contention.
        fastrand::shuffle(&mut stealers);

        Self {
            shared,
            local,
            stealers,
            global_queue_interval: cfg.global_queue_interval,
            max_steal_retries: cfg.max_steal_retries,
            should_unpark: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs jobs until shutdown. Returns how many jobs were left in the local
    /// queue.
    pub(super) fn run(self) -> usize {
        let current = self.shared.executor_ref();
        let mut tick: u32 = 0;

        while !self.shared.is_shutdown() {
            match self.find_job(tick) {
                Some(job) => {
                    tick = tick.wrapping_add(1);
                    tracing::trace!(job = ?job, "pool run");
                    job.run(current.clone());
                }
                None => self.shared.park_current_thread(&self.should_unpark),
            }
        }

        iter::from_fn(|| self.local.pop()).count()
    }

    fn find_job(&self, tick: u32) -> Option<JobRef> {
        // Enforce fairness for newly enqueued jobs by force-checking the
        // injector every `global_queue_interval` ticks.
        if tick % self.global_queue_interval == 0
            && let Some(job) = self.shared.injector.steal_batch_and_pop(&self.local).success()
        {
            return Some(job);
        }

        self.local.pop().or_else(|| {
            // No local work, repeatedly try the injector and the other
            // workers' queues.
            iter::repeat_with(|| {
                self.shared
                    .injector
                    .steal_batch_and_pop(&self.local)
                    // `collect` stops at the first `Success`.
                    .or_else(|| self.stealers.iter().map(|s| s.steal()).collect())
            })
            .take(self.max_steal_retries)
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
        })
    }
}

assert_impl_all!(Worker: Send);
