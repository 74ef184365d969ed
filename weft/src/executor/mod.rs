use crate::job::JobRef;
use std::fmt;
use std::sync::{Arc, Weak};

/// Anything that can run jobs. Behavior beyond accepting a job is up to the
/// implementation; the only requirement is that every enqueued job is
/// eventually run exactly once via [`JobRef::run`], or dropped at shutdown.
pub trait Executor: Send + Sync + 'static {
    /// Hands a job to this executor.
    fn enqueue(&self, job: JobRef);
}

/// Opaque identity of the executor a computation wants to resume on.
///
/// An `ExecutorRef` never keeps its executor alive. Two refs are equal when
/// they name the same executor, or when both are [`no_preference`].
///
/// [`no_preference`]: ExecutorRef::no_preference
#[derive(Clone, Default)]
pub struct ExecutorRef {
    inner: Option<Weak<dyn Executor>>,
}

impl ExecutorRef {
    /// A ref expressing no preference about where execution resumes.
    ///
    /// Only valid in continuation and return positions. It is not an executor
    /// and cannot be enqueued on.
    pub const fn no_preference() -> ExecutorRef {
        ExecutorRef { inner: None }
    }

    pub fn new<E: Executor>(executor: &Arc<E>) -> ExecutorRef {
        let weak = Arc::downgrade(executor);
        let weak: Weak<dyn Executor> = weak;
        ExecutorRef { inner: Some(weak) }
    }

    pub fn from_weak(executor: Weak<dyn Executor>) -> ExecutorRef {
        ExecutorRef {
            inner: Some(executor),
        }
    }

    pub fn is_no_preference(&self) -> bool {
        self.inner.is_none()
    }

    /// Whether the referenced executor still exists. Always false for
    /// `no_preference`.
    pub fn is_alive(&self) -> bool {
        self.inner.as_ref().is_some_and(|w| w.strong_count() > 0)
    }

    /// Hands `job` to the referenced executor.
    ///
    /// # Panics
    ///
    /// Panics on `no_preference`, or if the executor has been dropped.
    #[track_caller]
    pub fn enqueue(&self, job: JobRef) {
        if let Err(job) = self.try_enqueue(job) {
            panic!("executor {:?} is gone, cannot enqueue {:?}", self, job);
        }
    }

    /// Like [`enqueue`](ExecutorRef::enqueue) but gives the job back when the
    /// executor has been dropped.
    ///
    /// # Panics
    ///
    /// Panics on `no_preference`.
    #[track_caller]
    pub fn try_enqueue(&self, job: JobRef) -> Result<(), JobRef> {
        let Some(weak) = &self.inner else {
            panic!("cannot enqueue {:?} on ExecutorRef::no_preference()", job);
        };

        match weak.upgrade() {
            Some(executor) => {
                executor.enqueue(job);
                Ok(())
            }
            None => {
                tracing::warn!(executor = ?self, "stale executor ref");
                Err(job)
            }
        }
    }
}

impl PartialEq for ExecutorRef {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => Weak::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for ExecutorRef {}

impl fmt::Debug for ExecutorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("ExecutorRef(no_preference)"),
            Some(weak) => f
                .debug_tuple("ExecutorRef")
                .field(&Weak::as_ptr(weak).cast::<()>())
                .finish(),
        }
    }
}
