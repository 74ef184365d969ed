#![allow(unsafe_op_in_unsafe_fn)]

use crate::context::{AsyncContext, AsyncContextFlags, AsyncContextKind, switch_to};
use crate::executor::ExecutorRef;
use crate::job::TaskContinuationFn;
use crate::task::TaskRef;
use std::fmt;
use std::ptr::NonNull;

/// A context whose frame can hand control back to its parent without ending,
/// then be resumed again later. Generator-like frames yield any number of
/// times before one terminal [`AsyncContext::return_to_parent`].
#[repr(C)]
pub struct YieldingAsyncContext {
    /// Must stay the first field: a yielding context is viewed as a plain
    /// context through a pointer cast.
    base: AsyncContext,

    /// Temporarily resumes the parent. Generally a semantic yield.
    yield_to_parent: TaskContinuationFn,

    /// Where the parent wants to receive yields.
    yield_to_parent_executor: ExecutorRef,
}

impl YieldingAsyncContext {
    pub fn new(
        flags: AsyncContextFlags,
        resume_parent: TaskContinuationFn,
        resume_parent_executor: ExecutorRef,
        yield_to_parent: TaskContinuationFn,
        yield_to_parent_executor: ExecutorRef,
        parent: Option<NonNull<AsyncContext>>,
    ) -> YieldingAsyncContext {
        YieldingAsyncContext {
            base: AsyncContext::with_kind(
                flags,
                AsyncContextKind::Yielding,
                resume_parent,
                resume_parent_executor,
                parent,
            ),
            yield_to_parent,
            yield_to_parent_executor,
        }
    }

    pub fn as_context(&self) -> &AsyncContext {
        &self.base
    }

    /// Pointer to the plain context, derived from the whole struct so it can
    /// be downcast again.
    pub fn context_ptr(&self) -> NonNull<AsyncContext> {
        NonNull::from(self).cast()
    }

    pub fn yield_to_parent_executor(&self) -> &ExecutorRef {
        &self.yield_to_parent_executor
    }

    /// Returns the yielding context behind `context`, if it is one.
    ///
    /// # Safety
    ///
    /// `context` must point at a live context, derived from a pointer to its
    /// whole frame.
    pub unsafe fn downcast(context: NonNull<AsyncContext>) -> Option<NonNull<YieldingAsyncContext>> {
        context
            .as_ref()
            .is_yielding()
            .then(|| context.cast::<YieldingAsyncContext>())
    }

    /// Hands control back to the parent without ending this frame.
    ///
    /// The parent's yield continuation receives this frame's context. It may
    /// resume the frame again, after which the frame may yield again or return.
    /// Executor switching follows the same rule as
    /// [`AsyncContext::return_to_parent`].
    ///
    /// # Safety
    ///
    /// Same as [`AsyncContext::return_to_parent`].
    pub unsafe fn yield_to_parent(
        context: NonNull<YieldingAsyncContext>,
        task: TaskRef,
        current: ExecutorRef,
    ) {
        let (resume, target) = {
            let ctx = context.as_ref();
            (ctx.yield_to_parent, ctx.yield_to_parent_executor.clone())
        };

        switch_to(task, current, target, resume, context.cast());
    }
}

impl fmt::Debug for YieldingAsyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YieldingAsyncContext")
            .field("base", &self.base)
            .field("yield_to_parent_executor", &self.yield_to_parent_executor)
            .finish_non_exhaustive()
    }
}
