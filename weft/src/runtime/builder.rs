use crate::runtime::{LocalExecutor, ThreadPool};
use anyhow::{Result, anyhow};
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// How many ticks before a pool worker checks the global injector queue even
/// when it has local work.
const GLOBAL_QUEUE_INTERVAL: u32 = 31;

/// Maximum number of stealing attempts before a worker parks.
const MAX_STEAL_RETRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Local,
    Pool,
}

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let worker_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = worker_count.fetch_add(1, Ordering::Relaxed);
        format!("weft-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and builds one of the reference executors.
///
/// ```
/// use weft::Builder;
///
/// let pool = Builder::new_pool()
///     .worker_threads(2)
///     .thread_name("my-pool")
///     .try_build_pool()?;
/// pool.shutdown()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Builder {
    /// Executor flavor.
    kind: Kind,

    /// The number of pool worker threads. Defaults to 1 per core.
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the pool.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the pool.
    thread_stack_size: Option<usize>,

    /// How many ticks before pulling a job from the global injector queue.
    global_queue_interval: u32,

    /// How many times a worker loops over the injector and the other workers'
    /// queues to find work before parking.
    max_steal_retries: usize,

    /// First pool-only setting that was configured, rejected by
    /// `try_build_local`.
    pool_setting: Option<&'static str>,
}

impl Builder {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            global_queue_interval: GLOBAL_QUEUE_INTERVAL,
            max_steal_retries: MAX_STEAL_RETRIES,
            pool_setting: None,
        }
    }

    fn set_pool_setting(&mut self, name: &'static str) {
        self.pool_setting.get_or_insert(name);
    }

    /// Returns a new builder for a [`LocalExecutor`], driven by the thread
    /// that owns it.
    pub fn new_local() -> Builder {
        Builder::new(Kind::Local)
    }

    /// Returns a new builder for a work-stealing [`ThreadPool`].
    pub fn new_pool() -> Builder {
        Builder::new(Kind::Pool)
    }

    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker_threads must be greater than 0");
        self.set_pool_setting("worker_threads");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name of threads spawned by the pool.
    ///
    /// The default name is "weft-{N}".
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.set_pool_setting("thread_name");
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the name of threads spawned by the
    /// pool.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.set_pool_setting("thread_name_fn");
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies minimal stack size.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(
            val.is_power_of_two(),
            "thread_stack_size must be a power of two"
        );
        self.set_pool_setting("thread_stack_size");
        self.thread_stack_size = Some(val);
        self
    }

    /// Sets the number of ticks after which a worker checks the global
    /// injector queue before its own.
    #[track_caller]
    pub fn global_queue_interval(mut self, val: u32) -> Self {
        assert!(val > 0, "global_queue_interval must be greater than 0");
        self.set_pool_setting("global_queue_interval");
        self.global_queue_interval = val;
        self
    }

    #[track_caller]
    pub fn max_steal_retries(mut self, val: usize) -> Self {
        assert!(val > 0, "max_steal_retries must be greater than 0");
        self.set_pool_setting("max_steal_retries");
        self.max_steal_retries = val;
        self
    }

    /// Creates the configured [`LocalExecutor`].
    ///
    /// Fails if a pool-only setting, such as `worker_threads`, was configured.
    pub fn try_build_local(self) -> Result<Arc<LocalExecutor>> {
        if self.kind != Kind::Local {
            return Err(anyhow!("cannot build a LocalExecutor from a {:?} builder", self.kind));
        }
        if let Some(setting) = self.pool_setting {
            return Err(anyhow!("{} does not apply to a LocalExecutor", setting));
        }

        Ok(LocalExecutor::new())
    }

    /// Creates the configured [`ThreadPool`]. Workers are running when this
    /// returns.
    pub fn try_build_pool(self) -> Result<ThreadPool> {
        if self.kind != Kind::Pool {
            return Err(anyhow!("cannot build a ThreadPool from a {:?} builder", self.kind));
        }

        ThreadPool::try_new(self.try_into()?)
    }
}

/// Validated pool configuration.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) global_queue_interval: u32,
    pub(crate) max_steal_retries: usize,
}

impl TryFrom<Builder> for PoolConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        Ok(PoolConfig {
            worker_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            global_queue_interval: builder.global_queue_interval,
            max_steal_retries: builder.max_steal_retries,
        })
    }
}
