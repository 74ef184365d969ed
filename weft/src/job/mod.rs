use crate::context::AsyncContext;
use crate::executor::ExecutorRef;
use crate::task::TaskRef;
use static_assertions::{assert_impl_all, const_assert, const_assert_eq};
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

mod closure;
pub use self::closure::ClosureJob;

mod flags;
pub use self::flags::{JobFlags, JobKind, JobPriority, TaskFlags};

/// Runs a job that is not an async task.
pub type JobInvokeFn = unsafe fn(job: JobRef, executor: ExecutorRef);

/// Resumes a task in `context`. This is both the resume function installed on
/// a task and the `resume_parent`/`yield_to_parent` function of a context.
pub type TaskContinuationFn =
    unsafe fn(task: TaskRef, executor: ExecutorRef, context: NonNull<AsyncContext>);

/// The function a job runs. Which variant is valid is decided by the job
/// kind, and checked when the job is constructed.
#[derive(Clone, Copy)]
pub(crate) enum JobRole {
    Invoke(JobInvokeFn),
    ResumeTask(TaskContinuationFn),
}

/// A schedulable job.
///
/// Jobs are addressed through [`JobRef`]. To carry data, embed the `Job` as
/// the first field of a `#[repr(C)]` struct and cast the `JobRef` back in the
/// invoke function, as [`ClosureJob`] does.
#[repr(C, align(16))]
pub struct Job {
    /// Reserved for the executor currently holding the job.
    scheduler_private: [Cell<*mut ()>; 2],

    flags: JobFlags,

    role: Cell<JobRole>,
}

// Fixed size and alignment so that executors can address jobs generically.
const_assert_eq!(mem::size_of::<Job>() % mem::size_of::<usize>(), 0);
const_assert!(mem::align_of::<Job>() >= 2 * mem::align_of::<usize>());

// Safety: `scheduler_private` is only touched by the executor holding the job,
// and `role` only by the task itself between resumptions. Handing a job to an
// executor synchronizes through the executor's queue.
unsafe impl Send for Job {}
unsafe impl Sync for Job {}

impl Job {
    /// Creates a plain job.
    ///
    /// # Panics
    ///
    /// Panics if `flags` marks the job as an async task.
    #[track_caller]
    pub fn new(flags: JobFlags, invoke: JobInvokeFn) -> Job {
        assert!(!flags.is_async_task(), "wrong constructor for a task");
        Job::with_role(flags, JobRole::Invoke(invoke))
    }

    /// Creates the job header of an async task.
    #[track_caller]
    pub(crate) fn new_task(flags: JobFlags, resume: TaskContinuationFn) -> Job {
        assert!(flags.is_async_task(), "wrong constructor for a non-task job");
        Job::with_role(flags, JobRole::ResumeTask(resume))
    }

    fn with_role(flags: JobFlags, role: JobRole) -> Job {
        Job {
            scheduler_private: [Cell::new(ptr::null_mut()), Cell::new(ptr::null_mut())],
            flags,
            role: Cell::new(role),
        }
    }

    pub fn flags(&self) -> JobFlags {
        self.flags
    }

    pub fn is_async_task(&self) -> bool {
        self.flags.is_async_task()
    }

    pub(crate) fn resume_fn(&self) -> TaskContinuationFn {
        match self.role.get() {
            JobRole::ResumeTask(resume) => resume,
            JobRole::Invoke(_) => unreachable!("task job holds an invoke role"),
        }
    }

    pub(crate) fn set_resume_fn(&self, resume: TaskContinuationFn) {
        debug_assert!(self.is_async_task());
        self.role.set(JobRole::ResumeTask(resume));
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Raw handle to a [`Job`].
///
/// The handle does not own the job. Whoever created the job decides how it is
/// freed; a job handed to an executor must stay valid until it has run.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobRef {
    ptr: NonNull<Job>,
}

// Safety: see `Job`.
unsafe impl Send for JobRef {}
unsafe impl Sync for JobRef {}

assert_impl_all!(JobRef: Send, Sync, Copy);

impl JobRef {
    /// # Safety
    ///
    /// `ptr` must point at a live `Job` that stays valid, and does not move,
    /// for as long as the returned handle is used.
    pub unsafe fn from_raw(ptr: NonNull<Job>) -> JobRef {
        JobRef { ptr }
    }

    pub fn as_ptr(&self) -> NonNull<Job> {
        self.ptr
    }

    pub fn job(&self) -> &Job {
        unsafe { self.ptr.as_ref() }
    }

    pub fn flags(&self) -> JobFlags {
        self.job().flags
    }

    pub fn is_async_task(&self) -> bool {
        self.job().is_async_task()
    }

    pub fn priority(&self) -> JobPriority {
        self.flags().priority()
    }

    /// Returns the task this job belongs to, if it is one.
    pub fn as_task(&self) -> Option<TaskRef> {
        // Safety: only `AsyncTask::new` builds task jobs, and the job is the
        // first field of the task.
        self.is_async_task()
            .then(|| unsafe { TaskRef::from_job(*self) })
    }

    /// The two slots reserved for the executor holding this job.
    pub fn scheduler_private(&self) -> &[Cell<*mut ()>; 2] {
        &self.job().scheduler_private
    }

    /// Runs the job. Task jobs resume their installed continuation, other jobs
    /// call their invoke function.
    ///
    /// The job is consumed: the caller must not run it again unless it has
    /// been handed back to an executor by the job itself.
    pub fn run(self, current: ExecutorRef) {
        if let Some(task) = self.as_task() {
            task.run(current);
            return;
        }

        match self.job().role.get() {
            JobRole::Invoke(invoke) => {
                tracing::trace!(job = ?self, executor = ?current, "invoke job");
                // Safety: the invoke function was paired with this job at construction.
                unsafe { invoke(self, current) }
            }
            JobRole::ResumeTask(_) => unreachable!("plain job holds a task-resume role"),
        }
    }
}

impl fmt::Debug for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRef")
            .field("ptr", &self.ptr)
            .field("kind", &self.flags().kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::AsyncTask;
    use crate::test_utils::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[repr(C)]
    struct CountingJob {
        job: Job,
        runs: AtomicUsize,
    }

    unsafe fn count_invoke(job: JobRef, _executor: ExecutorRef) {
        let this = unsafe { job.as_ptr().cast::<CountingJob>().as_ref() };
        this.runs.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_job_layout() {
        assert_eq!(mem::size_of::<Job>() % mem::size_of::<usize>(), 0);
        assert!(mem::align_of::<Job>() >= 2 * mem::align_of::<usize>());
    }

    #[rstest]
    #[case::unspecified(JobPriority::Unspecified)]
    #[case::utility(JobPriority::Utility)]
    #[case::user_interactive(JobPriority::UserInteractive)]
    fn test_plain_job_runs_invoke(#[case] priority: JobPriority) {
        let job = CountingJob {
            job: Job::new(JobFlags::invoke().with_priority(priority), count_invoke),
            runs: AtomicUsize::new(0),
        };

        let job_ref = unsafe { JobRef::from_raw(NonNull::from(&job.job)) };
        assert!(!job_ref.is_async_task());
        assert!(job_ref.as_task().is_none());
        assert_eq!(job_ref.priority(), priority);

        job_ref.run(ExecutorRef::no_preference());
        assert_eq!(job.runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_task_job_routes_through_context() {
        let frame = RecordingFrame::root();
        let task = TaskRef::allocate(AsyncTask::new(
            JobFlags::task(),
            record_and_complete,
            frame.context_ptr(),
            None,
        ));

        let job = task.as_job();
        assert!(job.is_async_task());
        assert_eq!(job.as_task(), Some(task));

        job.run(ExecutorRef::no_preference());

        // The task resume function ran with the installed context, and the
        // task's own resume slot was never called as a plain invoke function.
        assert_eq!(frame.visits(), 1);
        unsafe { task.dealloc() };
    }

    #[test]
    #[should_panic(expected = "wrong constructor for a task")]
    fn test_plain_constructor_rejects_task_flags() {
        let _ = Job::new(JobFlags::task(), count_invoke);
    }

    #[test]
    #[should_panic(expected = "wrong constructor for a non-task job")]
    fn test_task_constructor_rejects_plain_flags() {
        let _ = Job::new_task(JobFlags::invoke(), record_and_complete);
    }

    #[test]
    fn test_scheduler_private_slots() {
        let job = ClosureJob::allocate(JobPriority::Default, |_| {});
        let slots = job.scheduler_private();
        assert!(slots.iter().all(|s| s.get().is_null()));

        let marker = job.as_ptr().as_ptr().cast::<()>();
        slots[1].set(marker);
        assert_eq!(job.scheduler_private()[1].get(), marker);
        assert!(job.scheduler_private()[0].get().is_null());

        job.run(ExecutorRef::no_preference());
    }
}
