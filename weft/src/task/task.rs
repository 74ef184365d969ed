use crate::context::AsyncContext;
use crate::executor::ExecutorRef;
use crate::job::{Job, JobFlags, JobPriority, JobRef, TaskContinuationFn};
use crate::task::current::CurrentTaskGuard;
use crate::task::{AtomicTaskStatus, ChildFragment, Id};
use static_assertions::{assert_impl_all, const_assert, const_assert_eq};
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::ptr::{self, NonNull};

/// A job whose invocation resumes the continuation installed on it.
///
/// The job header comes first so that a [`JobRef`] to a task can be turned back
/// into a [`TaskRef`], and an executor can run tasks and plain jobs through
/// the same queue.
#[repr(C)]
pub struct AsyncTask {
    job: Job,

    /// Context handed to the resume function on the next run.
    resume_context: Cell<NonNull<AsyncContext>>,

    status: AtomicTaskStatus,

    /// Reserved for a task-local frame allocator.
    allocator_private: [Cell<*mut ()>; 4],

    id: Id,

    child: Option<ChildFragment>,
}

const_assert_eq!(mem::offset_of!(AsyncTask, job), 0);
const_assert_eq!(mem::size_of::<AsyncTask>() % mem::size_of::<usize>(), 0);
const_assert!(mem::align_of::<AsyncTask>() >= 2 * mem::align_of::<usize>());

// Safety: the `Cell`s are only touched by the thread currently running the
// task, and a task is never run by two threads at once. Handing a task to an
// executor synchronizes through the executor's queue. The status word is
// atomic.
unsafe impl Send for AsyncTask {}
unsafe impl Sync for AsyncTask {}

impl AsyncTask {
    /// Creates a task that will run `resume(task, _, initial_context)` when
    /// first invoked.
    ///
    /// # Panics
    ///
    /// Panics if `flags` is not a task kind, or if the child-task flag
    /// disagrees with whether a `parent` is given.
    #[track_caller]
    pub fn new(
        flags: JobFlags,
        resume: TaskContinuationFn,
        initial_context: NonNull<AsyncContext>,
        parent: Option<TaskRef>,
    ) -> AsyncTask {
        assert!(
            flags.is_child_task() == parent.is_some(),
            "child task flag must match the presence of a parent task"
        );

        AsyncTask {
            job: Job::new_task(flags, resume),
            resume_context: Cell::new(initial_context),
            status: AtomicTaskStatus::new(),
            allocator_private: std::array::from_fn(|_| Cell::new(ptr::null_mut())),
            id: Id::next(),
            child: parent.map(ChildFragment::new),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn flags(&self) -> JobFlags {
        self.job.flags()
    }

    pub fn priority(&self) -> JobPriority {
        self.flags().priority()
    }

    pub fn status(&self) -> &AtomicTaskStatus {
        &self.status
    }

    /// Advisory check: the answer may be stale as soon as it is returned.
    pub fn is_cancelled(&self) -> bool {
        self.status.is_cancelled()
    }

    pub fn is_future(&self) -> bool {
        self.flags().is_future()
    }

    pub fn is_child_task(&self) -> bool {
        self.flags().is_child_task()
    }

    pub fn has_child_fragment(&self) -> bool {
        self.child.is_some()
    }

    /// # Panics
    ///
    /// Panics if the task is not a child task.
    #[track_caller]
    pub fn child_fragment(&self) -> &ChildFragment {
        match &self.child {
            Some(fragment) => fragment,
            None => panic!("task {} is not a child task", self.id),
        }
    }

    /// The four slots reserved for a task-local allocator.
    pub fn allocator_private(&self) -> &[Cell<*mut ()>; 4] {
        &self.allocator_private
    }

    /// The context the next run will resume.
    pub fn resume_context(&self) -> NonNull<AsyncContext> {
        self.resume_context.get()
    }
}

impl fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("id", &self.id)
            .field("flags", &self.flags())
            .field("status", &self.status)
            .field("child", &self.child)
            .finish_non_exhaustive()
    }
}

/// Raw handle to an [`AsyncTask`].
///
/// Like [`JobRef`] it does not own the task. [`TaskRef::allocate`] and
/// [`TaskRef::dealloc`] provide a boxed default; tasks placed elsewhere are
/// wrapped with [`TaskRef::from_raw`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskRef {
    ptr: NonNull<AsyncTask>,
}

// Safety: see `AsyncTask`.
unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

assert_impl_all!(TaskRef: Send, Sync, Copy);
assert_impl_all!(AsyncTask: Send, Sync);

impl TaskRef {
    /// Moves `task` to the heap. Free it with [`TaskRef::dealloc`] once it has
    /// finished running.
    pub fn allocate(task: AsyncTask) -> TaskRef {
        let ptr = Box::into_raw(Box::new(task));
        // Safety: `Box::into_raw` never returns null.
        TaskRef {
            ptr: unsafe { NonNull::new_unchecked(ptr) },
        }
    }

    /// # Safety
    ///
    /// The task must come from [`TaskRef::allocate`], must not be queued or
    /// running, and no handle to it may be used afterwards.
    pub unsafe fn dealloc(self) {
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }

    /// # Safety
    ///
    /// `ptr` must point at a live task that stays valid, and does not move,
    /// for as long as the returned handle is used.
    pub unsafe fn from_raw(ptr: NonNull<AsyncTask>) -> TaskRef {
        TaskRef { ptr }
    }

    /// # Safety
    ///
    /// `job` must be the header of an `AsyncTask`.
    pub(crate) unsafe fn from_job(job: JobRef) -> TaskRef {
        TaskRef {
            ptr: job.as_ptr().cast(),
        }
    }

    pub fn as_ptr(&self) -> NonNull<AsyncTask> {
        self.ptr
    }

    pub fn as_job(&self) -> JobRef {
        // Safety: the job is the first field of the task.
        unsafe { JobRef::from_raw(self.ptr.cast()) }
    }

    /// Resumes the installed continuation.
    ///
    /// Both the resume function and the context are read before the call:
    /// once resumed, the task may be handed to another executor at any time.
    pub fn run(self, current: ExecutorRef) {
        let resume = self.job.resume_fn();
        let context = self.resume_context.get();
        let _guard = CurrentTaskGuard::enter(self);

        tracing::trace!(task.id = %self.id, executor = ?current, "resume task");

        // Safety: the continuation and its context were installed together,
        // and the caller consumed the job to get here.
        unsafe { resume(self, current, context) }
    }

    /// Installs the continuation the next run will resume. Only the task
    /// itself calls this, right before handing itself to an executor.
    pub fn install_continuation(&self, resume: TaskContinuationFn, context: NonNull<AsyncContext>) {
        self.job.set_resume_fn(resume);
        self.resume_context.set(context);
    }
}

impl Deref for TaskRef {
    type Target = AsyncTask;

    fn deref(&self) -> &AsyncTask {
        // Safety: guaranteed by whoever created the handle.
        unsafe { self.ptr.as_ref() }
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskRef").field(&self.ptr).finish()
    }
}
