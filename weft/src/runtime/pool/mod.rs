use crate::executor::{Executor, ExecutorRef};
use crate::job::JobRef;
use crate::runtime::PoolConfig;
use anyhow::{Context, Result, anyhow};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as CbWorker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, Thread};

mod worker;
use worker::Worker;

/// State shared by the pool handle and its workers. This is the executor
/// behind the pool's [`ExecutorRef`].
pub(crate) struct Shared {
    /// Global injector queue where enqueued jobs land.
    injector: Injector<JobRef>,

    /// One stealer per worker's local queue.
    stealers: Vec<Stealer<JobRef>>,

    /// Parked workers, each with the flag it waits on.
    parked_threads: Mutex<VecDeque<(Thread, Arc<AtomicBool>)>>,

    shutdown: AtomicBool,

    this: Weak<Shared>,
}

impl Shared {
    fn executor_ref(&self) -> ExecutorRef {
        let weak: Weak<dyn Executor> = self.this.clone();
        ExecutorRef::from_weak(weak)
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn has_work(&self) -> bool {
        !self.injector.is_empty() || self.stealers.iter().any(|s| !s.is_empty())
    }

    /// Parks the current worker until a job is enqueued or the pool shuts
    /// down.
    fn park_current_thread(&self, should_unpark: &Arc<AtomicBool>) {
        {
            let mut parked_threads = self.parked_threads.lock();

            // Checked while holding the lock: `enqueue` pushes before it looks
            // for a parked thread.
            if self.has_work() || self.is_shutdown() {
                return;
            }

            should_unpark.store(false, Ordering::Release);
            parked_threads.push_back((thread::current(), Arc::clone(should_unpark)));
        }

        tracing::debug!(thread = ?thread::current().name(), "worker parked");

        // Spurious wakeups are possible.
        while !should_unpark.load(Ordering::Acquire) {
            thread::park();
        }
    }

    fn unpark_one_thread(&self) -> bool {
        if let Some((thread, should_unpark)) = self.parked_threads.lock().pop_back() {
            should_unpark.store(true, Ordering::Release);
            thread.unpark();
            true
        } else {
            false
        }
    }

    fn unpark_all_threads(&self) -> usize {
        let mut num_unparked = 0;
        let mut parked_threads = self.parked_threads.lock();

        while let Some((thread, should_unpark)) = parked_threads.pop_back() {
            num_unparked += 1;
            should_unpark.store(true, Ordering::Release);
            thread.unpark();
        }

        num_unparked
    }
}

impl Executor for Shared {
    fn enqueue(&self, job: JobRef) {
        self.injector.push(job);
        self.unpark_one_thread();
    }
}

/// A fixed set of worker threads sharing jobs through a global injector queue
/// and work stealing.
///
/// Jobs still queued when the pool shuts down are not run. They are counted
/// and reported with a warning.
pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<thread::JoinHandle<usize>>>,
}

impl ThreadPool {
    pub(crate) fn try_new(cfg: PoolConfig) -> Result<ThreadPool> {
        let num_workers = cfg.worker_threads;

        let local_queues = (0..num_workers)
            .map(|_| CbWorker::new_fifo())
            .collect::<Vec<_>>();
        let stealers = local_queues.iter().map(|w| w.stealer()).collect::<Vec<_>>();

        let shared = Arc::new_cyclic(|this| Shared {
            injector: Injector::new(),
            stealers: stealers.clone(),
            parked_threads: Mutex::new(VecDeque::with_capacity(num_workers)),
            shutdown: AtomicBool::new(false),
            this: this.clone(),
        });

        let pool = ThreadPool {
            shared: Arc::clone(&shared),
            handles: Mutex::new(Vec::with_capacity(num_workers)),
        };

        for (i, local_queue) in local_queues.into_iter().enumerate() {
            // Give each worker a list of all *other* workers' stealers.
            let other_stealers = stealers
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| s.clone())
                .collect::<Vec<_>>();

            let worker = Worker::new(&cfg, Arc::clone(&shared), local_queue, other_stealers);

            // On error, dropping `pool` stops the workers spawned so far.
            let handle = spawn_worker_thread(&cfg, worker)?;
            pool.handles.lock().push(handle);
        }

        tracing::debug!(workers = num_workers, "thread pool started");
        Ok(pool)
    }

    pub fn executor_ref(&self) -> ExecutorRef {
        self.shared.executor_ref()
    }

    pub fn worker_threads(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Stops the workers and waits for them to exit. Workers finish the job
    /// they are running, queued jobs are dropped. Calling it again is a no-op.
    ///
    /// Must not be called from a pool worker.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.unpark_all_threads();

        let handles = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return Ok(());
        }

        let mut dropped = 0;
        let mut panicked = 0;
        for handle in handles {
            match handle.join() {
                Ok(n) => dropped += n,
                Err(_) => panicked += 1,
            }
        }

        loop {
            match self.shared.injector.steal() {
                Steal::Success(_) => dropped += 1,
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }

        if dropped > 0 {
            tracing::warn!(dropped, "thread pool shut down with queued jobs");
        }
        tracing::debug!("thread pool stopped");

        if panicked == 0 {
            Ok(())
        } else {
            Err(anyhow!("{} worker thread(s) panicked", panicked))
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "thread pool shutdown failed");
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("worker_threads", &self.worker_threads())
            .field("shutdown", &self.shared.is_shutdown())
            .finish()
    }
}

fn spawn_worker_thread(cfg: &PoolConfig, worker: Worker) -> Result<thread::JoinHandle<usize>> {
    let mut builder = thread::Builder::new();

    if let Some(stack_size) = cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    let name = (cfg.thread_name.0)();
    builder
        .name(name.clone())
        .spawn(move || worker.run())
        .with_context(|| format!("failed to spawn worker thread {}", name))
}
