use crate::executor::ExecutorRef;
use crate::job::{Job, JobFlags, JobPriority, JobRef};
use std::ptr::NonNull;

/// A boxed one-shot closure behind a plain job.
///
/// The allocation is freed when the job runs. A `JobRef` obtained from
/// [`ClosureJob::allocate`] that is never run leaks its closure.
#[repr(C)]
pub struct ClosureJob<F> {
    job: Job,
    f: F,
}

impl<F> ClosureJob<F>
where
    F: FnOnce(ExecutorRef) + Send + 'static,
{
    pub fn allocate(priority: JobPriority, f: F) -> JobRef {
        let boxed = Box::new(ClosureJob {
            job: Job::new(JobFlags::invoke().with_priority(priority), invoke::<F>),
            f,
        });

        // Safety: `job` is the first field of a `#[repr(C)]` struct, and the
        // box is only reclaimed by `invoke`.
        unsafe { JobRef::from_raw(NonNull::new_unchecked(Box::into_raw(boxed)).cast()) }
    }
}

unsafe fn invoke<F: FnOnce(ExecutorRef)>(job: JobRef, executor: ExecutorRef) {
    let boxed = unsafe { Box::from_raw(job.as_ptr().cast::<ClosureJob<F>>().as_ptr()) };
    let ClosureJob { f, .. } = *boxed;
    f(executor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_runs_once_and_frees_captures() {
        let hits = Arc::new(AtomicUsize::new(0));

        let job = {
            let hits = Arc::clone(&hits);
            ClosureJob::allocate(JobPriority::Background, move |executor| {
                assert!(executor.is_no_preference());
                hits.fetch_add(1, Ordering::Relaxed);
            })
        };

        assert_eq!(job.priority(), JobPriority::Background);
        assert_eq!(Arc::strong_count(&hits), 2);

        job.run(ExecutorRef::no_preference());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(Arc::strong_count(&hits), 1);
    }
}
