//! Runtime representation of asynchronous tasks.
//!
//! A [`Job`] is the minimal unit an executor runs. An [`AsyncTask`] is a job
//! whose invocation resumes the continuation currently installed on it: a
//! chain of [`AsyncContext`] frames, each of which knows how to resume its
//! caller and on which executor. Every task carries an [`AtomicTaskStatus`]
//! word packing its cancellation flag, a lock bit and the head of an intrusive
//! list of [`TaskStatusRecord`]s.
//!
//! [`Job`]: job::Job
//! [`AsyncTask`]: task::AsyncTask
//! [`AsyncContext`]: context::AsyncContext
//! [`AtomicTaskStatus`]: task::AtomicTaskStatus
//! [`TaskStatusRecord`]: task::TaskStatusRecord

pub mod context;
pub use context::{AsyncContext, AsyncContextFlags, AsyncContextKind, YieldingAsyncContext};

pub mod executor;
pub use executor::{Executor, ExecutorRef};

pub mod job;
pub use job::{ClosureJob, Job, JobFlags, JobKind, JobPriority, JobRef, TaskFlags};

pub mod runtime;
pub use runtime::{Builder, LocalExecutor, ThreadPool};

pub mod task;
pub use task::{
    ActiveTaskStatus, AsyncTask, AtomicTaskStatus, CancellationStats, ChildFragment, Id, TaskRef,
    TaskStatusRecord, request_cancel,
};

mod utils;
pub use utils::LinkedIter;

#[cfg(test)]
mod test_utils;
