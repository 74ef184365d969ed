//! Reference executors: a local run queue, and a work-stealing thread pool.

mod builder;
pub use builder::Builder;
pub(crate) use builder::PoolConfig;

mod local;
pub use local::LocalExecutor;

mod pool;
pub use pool::ThreadPool;
