use crate::executor::{Executor, ExecutorRef};
use crate::job::JobRef;
use parking_lot::Mutex;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Weak};

/// Intrusive FIFO of jobs, linked through `scheduler_private[0]`.
#[derive(Default)]
struct RunQueue {
    head: Option<JobRef>,
    tail: Option<JobRef>,
    len: usize,
}

impl RunQueue {
    fn push_back(&mut self, job: JobRef) {
        job.scheduler_private()[0].set(ptr::null_mut());

        match self.tail {
            Some(tail) => tail.scheduler_private()[0].set(job.as_ptr().as_ptr().cast()),
            None => self.head = Some(job),
        }

        self.tail = Some(job);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<JobRef> {
        let job = self.head?;
        let next = job.scheduler_private()[0].replace(ptr::null_mut());

        // Safety: only `push_back` writes the link, always with a queued job.
        self.head = NonNull::new(next).map(|p| unsafe { JobRef::from_raw(p.cast()) });
        if self.head.is_none() {
            self.tail = None;
        }

        self.len -= 1;
        Some(job)
    }
}

/// A single-queue executor driven by whichever thread calls
/// [`LocalExecutor::run_next`] or [`LocalExecutor::run_until_idle`].
///
/// Any thread may enqueue. Jobs run in FIFO order.
pub struct LocalExecutor {
    queue: Mutex<RunQueue>,
    this: Weak<LocalExecutor>,
}

impl LocalExecutor {
    pub fn new() -> Arc<LocalExecutor> {
        Arc::new_cyclic(|this| LocalExecutor {
            queue: Mutex::new(RunQueue::default()),
            this: this.clone(),
        })
    }

    pub fn executor_ref(&self) -> ExecutorRef {
        let weak: Weak<dyn Executor> = self.this.clone();
        ExecutorRef::from_weak(weak)
    }

    /// Runs the oldest queued job. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The lock is released before running: the job may enqueue again.
        let Some(job) = self.queue.lock().pop_front() else {
            return false;
        };

        job.run(self.executor_ref());
        true
    }

    /// Runs jobs until the queue is empty, including jobs enqueued meanwhile.
    /// Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Executor for LocalExecutor {
    fn enqueue(&self, job: JobRef) {
        tracing::trace!(job = ?job, "local enqueue");
        self.queue.lock().push_back(job);
    }
}

impl Drop for LocalExecutor {
    fn drop(&mut self) {
        let pending = self.queue.get_mut().len;
        if pending > 0 {
            tracing::warn!(pending, "local executor dropped with queued jobs");
        }
    }
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ClosureJob, JobPriority};
    use crate::runtime::Builder;
    use anyhow::Result;
    use static_assertions::assert_impl_all;

    assert_impl_all!(LocalExecutor: Send, Sync, Executor);

    #[test]
    fn test_runs_in_fifo_order() -> Result<()> {
        let executor = Builder::new_local().try_build_local()?;
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            executor
                .executor_ref()
                .enqueue(ClosureJob::allocate(JobPriority::Default, move |_| order.lock().push(i)));
        }

        assert_eq!(executor.len(), 5);
        assert_eq!(executor.run_until_idle(), 5);
        assert!(executor.is_empty());
        assert!(!executor.run_next());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_job_sees_executor_and_may_reenqueue() -> Result<()> {
        let executor = Builder::new_local().try_build_local()?;
        let expected = executor.executor_ref();
        let hits = Arc::new(Mutex::new(0));

        let job = {
            let hits = Arc::clone(&hits);
            ClosureJob::allocate(JobPriority::Default, move |current| {
                assert_eq!(current, expected);
                *hits.lock() += 1;

                let hits = Arc::clone(&hits);
                current.enqueue(ClosureJob::allocate(JobPriority::Default, move |_| {
                    *hits.lock() += 1;
                }));
            })
        };

        executor.executor_ref().enqueue(job);
        assert_eq!(executor.run_until_idle(), 2);
        assert_eq!(*hits.lock(), 2);
        Ok(())
    }

    #[test]
    fn test_ref_outlived_by_executor() {
        let executor = LocalExecutor::new();
        let exec_ref = executor.executor_ref();
        assert!(exec_ref.is_alive());

        drop(executor);
        assert!(!exec_ref.is_alive());
    }
}
