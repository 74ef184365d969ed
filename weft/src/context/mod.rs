#![allow(unsafe_op_in_unsafe_fn)]

use crate::executor::ExecutorRef;
use crate::job::TaskContinuationFn;
use crate::task::TaskRef;
use crate::utils::LinkedIter;
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::NonNull;

mod yielding;
pub use self::yielding::YieldingAsyncContext;

const KIND_MASK: u32 = 0x0000_00FF;
const SHOULD_NOT_DEALLOCATE: u32 = 1 << 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AsyncContextKind {
    /// A context that can only return to its parent.
    Ordinary = 0,

    /// A [`YieldingAsyncContext`]: the frame may also yield to its parent
    /// without ending.
    Yielding = 1,
}

/// Flags describing a context. The kind is owned by the context constructors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AsyncContextFlags(u32);

impl AsyncContextFlags {
    pub const fn empty() -> AsyncContextFlags {
        AsyncContextFlags(0)
    }

    pub fn kind(&self) -> AsyncContextKind {
        match self.0 & KIND_MASK {
            1 => AsyncContextKind::Yielding,
            _ => AsyncContextKind::Ordinary,
        }
    }

    pub(crate) fn with_kind(self, kind: AsyncContextKind) -> AsyncContextFlags {
        AsyncContextFlags((self.0 & !KIND_MASK) | kind as u32)
    }

    /// Marks a context that lives inside its caller's frame, so a frame
    /// allocator must not free it on return.
    #[must_use]
    pub fn with_should_not_deallocate(self) -> AsyncContextFlags {
        AsyncContextFlags(self.0 | SHOULD_NOT_DEALLOCATE)
    }

    pub fn should_not_deallocate(&self) -> bool {
        self.0 & SHOULD_NOT_DEALLOCATE != 0
    }
}

impl fmt::Debug for AsyncContextFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContextFlags")
            .field("kind", &self.kind())
            .field("should_not_deallocate", &self.should_not_deallocate())
            .finish()
    }
}

/// One suspended logical call frame.
///
/// A callee is handed a context linking back to its caller's context. It ends
/// by calling [`AsyncContext::return_to_parent`], possibly from another thread
/// and much later. Frames store arguments and results next to the context by
/// embedding it as the first field of a `#[repr(C)]` struct, and must derive
/// the context pointer from a pointer to the whole frame.
///
/// Contexts are never copied: a copy would duplicate the frame's resumption
/// identity.
#[repr(C, align(16))]
pub struct AsyncContext {
    /// The caller's context. Not owned: the caller outlives the call.
    parent: Option<NonNull<AsyncContext>>,

    /// Resumes the caller. Receives this context so the caller can read the
    /// results written into it.
    resume_parent: TaskContinuationFn,

    /// Where the caller wants to be resumed.
    resume_parent_executor: ExecutorRef,

    flags: AsyncContextFlags,

    _pinned: PhantomPinned,
}

// Safety: a context is only touched by the task currently resuming it, and
// resumptions of one task never overlap.
unsafe impl Send for AsyncContext {}
unsafe impl Sync for AsyncContext {}

impl AsyncContext {
    pub fn new(
        flags: AsyncContextFlags,
        resume_parent: TaskContinuationFn,
        resume_parent_executor: ExecutorRef,
        parent: Option<NonNull<AsyncContext>>,
    ) -> AsyncContext {
        AsyncContext::with_kind(
            flags,
            AsyncContextKind::Ordinary,
            resume_parent,
            resume_parent_executor,
            parent,
        )
    }

    pub(super) fn with_kind(
        flags: AsyncContextFlags,
        kind: AsyncContextKind,
        resume_parent: TaskContinuationFn,
        resume_parent_executor: ExecutorRef,
        parent: Option<NonNull<AsyncContext>>,
    ) -> AsyncContext {
        AsyncContext {
            parent,
            resume_parent,
            resume_parent_executor,
            flags: flags.with_kind(kind),
            _pinned: PhantomPinned,
        }
    }

    pub fn parent(&self) -> Option<NonNull<AsyncContext>> {
        self.parent
    }

    pub fn resume_parent_executor(&self) -> &ExecutorRef {
        &self.resume_parent_executor
    }

    pub fn flags(&self) -> AsyncContextFlags {
        self.flags
    }

    pub fn kind(&self) -> AsyncContextKind {
        self.flags.kind()
    }

    pub fn is_yielding(&self) -> bool {
        self.kind() == AsyncContextKind::Yielding
    }

    /// Iterates from `context` out to the outermost frame.
    ///
    /// # Safety
    ///
    /// Every context in the chain must be alive for the duration of the walk.
    pub unsafe fn ancestors(
        context: NonNull<AsyncContext>,
    ) -> LinkedIter<AsyncContext, impl FnMut(NonNull<AsyncContext>) -> Option<NonNull<AsyncContext>>>
    {
        LinkedIter::new(Some(context), |ctx| unsafe { ctx.as_ref().parent })
    }

    /// Ends the frame owning `context` and resumes its caller.
    ///
    /// The caller's continuation is called directly when it has no executor
    /// preference or already runs on `current`. Otherwise it is installed on
    /// the task, and the task is handed to the caller's executor. Either way
    /// the current thread must not touch the task or the frame afterwards.
    ///
    /// # Safety
    ///
    /// `context` must be the live context of the frame being resumed in
    /// `task`, and the task must not be running anywhere else.
    pub unsafe fn return_to_parent(context: NonNull<AsyncContext>, task: TaskRef, current: ExecutorRef) {
        let (resume, target) = {
            let ctx = context.as_ref();
            (ctx.resume_parent, ctx.resume_parent_executor.clone())
        };

        switch_to(task, current, target, resume, context);
    }
}

impl fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContext")
            .field("parent", &self.parent)
            .field("resume_parent_executor", &self.resume_parent_executor)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Runs `resume(task, _, context)` on `target`.
///
/// Executor affinity is decided here and nowhere else.
pub(super) unsafe fn switch_to(
    task: TaskRef,
    current: ExecutorRef,
    target: ExecutorRef,
    resume: TaskContinuationFn,
    context: NonNull<AsyncContext>,
) {
    if target.is_no_preference() || target == current {
        resume(task, current, context);
    } else {
        tracing::trace!(task.id = %task.id(), from = ?current, to = ?target, "executor hop");
        task.install_continuation(resume, context);
        target.enqueue(task.as_job());
    }
}
