#![allow(unsafe_op_in_unsafe_fn)]

use crate::context::{AsyncContext, AsyncContextFlags};
use crate::executor::ExecutorRef;
use crate::task::TaskRef;
use parking_lot::{Condvar, Mutex};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

// Exports
pub(crate) mod mocks;
pub(crate) use mocks::{Call, Method, RecordingExecutor, Tracker};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Outermost frame of a test task. Counts how often it has been resumed.
#[repr(C)]
pub(crate) struct RecordingFrame {
    context: AsyncContext,
    visits: AtomicUsize,
    completed: AtomicBool,
}

impl RecordingFrame {
    pub(crate) fn root() -> Box<RecordingFrame> {
        Box::new(RecordingFrame {
            context: AsyncContext::new(
                AsyncContextFlags::empty(),
                no_parent,
                ExecutorRef::no_preference(),
                None,
            ),
            visits: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
        })
    }

    pub(crate) fn context_ptr(&self) -> NonNull<AsyncContext> {
        NonNull::from(self).cast()
    }

    pub(crate) fn visits(&self) -> usize {
        self.visits.load(Ordering::Acquire)
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// # Safety
    ///
    /// `context` must be the context of a live `RecordingFrame`.
    pub(crate) unsafe fn from_context<'a>(context: NonNull<AsyncContext>) -> &'a RecordingFrame {
        context.cast::<RecordingFrame>().as_ref()
    }
}

unsafe fn no_parent(_task: TaskRef, _executor: ExecutorRef, _context: NonNull<AsyncContext>) {
    panic!("root frame has no parent to resume");
}

/// Task resume function: records a visit on its `RecordingFrame` and ends.
pub(crate) unsafe fn record_and_complete(
    _task: TaskRef,
    _executor: ExecutorRef,
    context: NonNull<AsyncContext>,
) {
    let frame = RecordingFrame::from_context(context);
    frame.visits.fetch_add(1, Ordering::AcqRel);
    frame.completed.store(true, Ordering::Release);
}

/// Blocks until `count_down` has been called `n` times.
pub(crate) struct Latch {
    remaining: Mutex<usize>,
    cvar: Condvar,
}

impl Latch {
    pub(crate) fn new(n: usize) -> Self {
        Latch {
            remaining: Mutex::new(n),
            cvar: Condvar::new(),
        }
    }

    pub(crate) fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cvar.notify_all();
        }
    }

    /// Returns false on timeout.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.cvar.wait_for(&mut remaining, timeout).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}
