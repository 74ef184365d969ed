#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::record::TaskStatusRecord;
use crate::utils::LinkedIter;
use crossbeam_utils::Backoff;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

// The two low bits of the status word are flags, the rest is the address of
// the innermost record. Records are aligned to at least 4 bytes so their
// addresses never touch the flag bits.
const CANCELLED: usize = 0b01;
const LOCKED: usize = 0b10;
const FLAGS_MASK: usize = CANCELLED | LOCKED;
const RECORD_MASK: usize = !FLAGS_MASK;

/// Snapshot of a task's status word.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveTaskStatus(usize);

impl ActiveTaskStatus {
    pub const fn empty() -> ActiveTaskStatus {
        ActiveTaskStatus(0)
    }

    pub fn new(
        innermost_record: Option<NonNull<TaskStatusRecord>>,
        cancelled: bool,
        locked: bool,
    ) -> ActiveTaskStatus {
        let mut val = ActiveTaskStatus::empty().with_record(innermost_record).0;
        if cancelled {
            val |= CANCELLED;
        }
        if locked {
            val |= LOCKED;
        }
        ActiveTaskStatus(val)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0 & CANCELLED == CANCELLED
    }

    /// Is there an active lock on the record list?
    pub fn is_locked(&self) -> bool {
        self.0 & LOCKED == LOCKED
    }

    /// The innermost (most recently added) record.
    ///
    /// Code running asynchronously with the task must hold the status lock
    /// before dereferencing it.
    pub fn innermost_record(&self) -> Option<NonNull<TaskStatusRecord>> {
        NonNull::new(ptr::with_exposed_provenance_mut(self.0 & RECORD_MASK))
    }

    /// Walks the records from the innermost outwards.
    ///
    /// # Safety
    ///
    /// The records must stay alive during the walk, which in practice means
    /// holding the status lock, or being the task itself.
    pub unsafe fn records(
        self,
    ) -> LinkedIter<TaskStatusRecord, impl FnMut(NonNull<TaskStatusRecord>) -> Option<NonNull<TaskStatusRecord>>>
    {
        LinkedIter::new(self.innermost_record(), |record| unsafe {
            TaskStatusRecord::parent_of(record)
        })
    }

    fn with_record(self, record: Option<NonNull<TaskStatusRecord>>) -> ActiveTaskStatus {
        let addr = record.map_or(0, |r| r.as_ptr().expose_provenance());
        debug_assert_eq!(addr & FLAGS_MASK, 0, "misaligned status record");

        ActiveTaskStatus((self.0 & FLAGS_MASK) | addr)
    }
}

impl fmt::Debug for ActiveTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTaskStatus")
            .field("cancelled", &self.is_cancelled())
            .field("locked", &self.is_locked())
            .field("innermost_record", &self.innermost_record())
            .finish()
    }
}

/// The atomic status word of a task.
///
/// - The cancel bit is set by anyone, at any time, with a single RMW. It is
///   never cleared.
/// - The lock bit guards the record list against traversal and mutation by
///   other threads. It is a short spin lock and must never be held across a
///   context resumption.
/// - The task itself adds and removes its records without taking the lock,
///   but waits while someone else holds it.
pub struct AtomicTaskStatus {
    val: AtomicUsize,
}

impl AtomicTaskStatus {
    pub const fn new() -> AtomicTaskStatus {
        AtomicTaskStatus {
            val: AtomicUsize::new(0),
        }
    }

    pub fn load(&self, order: Ordering) -> ActiveTaskStatus {
        ActiveTaskStatus(self.val.load(order))
    }

    /// Advisory: the task may be cancelled right after this returns false.
    pub fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed).is_cancelled()
    }

    /// Sets the cancel bit, whether or not the lock is held. Returns the
    /// status before the update.
    ///
    /// This only flips the bit. Record effects are run by
    /// [`request_cancel`](crate::task::request_cancel), which goes through
    /// [`cancel_and_lock`](AtomicTaskStatus::cancel_and_lock) instead.
    pub fn cancel(&self) -> ActiveTaskStatus {
        ActiveTaskStatus(self.val.fetch_or(CANCELLED, Ordering::AcqRel))
    }

    /// Sets the cancel bit and, if there are records to walk, takes the lock
    /// in the same CAS.
    ///
    /// Waits while the lock is held elsewhere. A record published before the
    /// CAS is seen by the walk, a record published after it sees the cancel
    /// bit in [`add_record`](AtomicTaskStatus::add_record), never both.
    pub(crate) fn cancel_and_lock(&self) -> CancelLock<'_> {
        let backoff = Backoff::new();
        let mut curr = self.load(Ordering::Relaxed);

        loop {
            if curr.is_cancelled() {
                return CancelLock::AlreadyCancelled;
            }
            if curr.is_locked() {
                backoff.snooze();
                curr = self.load(Ordering::Relaxed);
                continue;
            }

            let has_records = curr.innermost_record().is_some();
            let next = if has_records {
                curr.0 | CANCELLED | LOCKED
            } else {
                curr.0 | CANCELLED
            };

            match self.val.compare_exchange_weak(
                curr.0,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if has_records => return CancelLock::Locked(StatusLockGuard { status: self }),
                Ok(_) => return CancelLock::Unlocked,
                Err(actual) => curr = ActiveTaskStatus(actual),
            }
        }
    }

    /// Tries to take the status lock without waiting.
    pub fn try_lock(&self) -> Option<StatusLockGuard<'_>> {
        let mut curr = self.val.load(Ordering::Relaxed);

        loop {
            if curr & LOCKED == LOCKED {
                return None;
            }

            // Only the lock bit changes here, a concurrent cancel simply makes
            // us retry with the new value.
            match self.val.compare_exchange_weak(
                curr,
                curr | LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(StatusLockGuard { status: self }),
                Err(actual) => curr = actual,
            }
        }
    }

    /// Takes the status lock, spinning and then yielding while it is held
    /// elsewhere.
    pub fn lock(&self) -> StatusLockGuard<'_> {
        let backoff = Backoff::new();

        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            backoff.snooze();
        }
    }

    fn unlock(&self) {
        let prev = self.val.fetch_and(!LOCKED, Ordering::Release);
        debug_assert!(prev & LOCKED == LOCKED, "status lock was not held");
    }

    /// Pushes `record` from the task itself, without taking the lock.
    ///
    /// Returns the status right after the push. If it reports a cancelled
    /// task, the cancellation walk finished without `record`, so the caller
    /// must apply the cancellation effect of `record` itself.
    ///
    /// # Safety
    ///
    /// Must be called by the task owning this status. `record` must stay
    /// alive and pinned until it is removed again.
    pub unsafe fn add_record(&self, record: NonNull<TaskStatusRecord>) -> ActiveTaskStatus {
        let backoff = Backoff::new();
        let mut curr = self.load(Ordering::Relaxed);

        loop {
            if curr.is_locked() {
                backoff.snooze();
                curr = self.load(Ordering::Relaxed);
                continue;
            }

            record.as_ref().set_parent(curr.innermost_record());
            let next = curr.with_record(Some(record));

            match self.val.compare_exchange_weak(
                curr.0,
                next.0,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => curr = ActiveTaskStatus(actual),
            }
        }
    }

    /// Pops `record` from the task itself, without taking the lock. Records
    /// are removed in LIFO order.
    ///
    /// # Safety
    ///
    /// Must be called by the task owning this status, and `record` must be the
    /// innermost record.
    pub unsafe fn remove_record(&self, record: NonNull<TaskStatusRecord>) {
        let backoff = Backoff::new();
        let mut curr = self.load(Ordering::Relaxed);

        loop {
            if curr.is_locked() {
                backoff.snooze();
                curr = self.load(Ordering::Relaxed);
                continue;
            }

            debug_assert_eq!(
                curr.innermost_record(),
                Some(record),
                "status records must be removed in LIFO order"
            );
            let next = curr.with_record(TaskStatusRecord::parent_of(record));

            match self.val.compare_exchange_weak(
                curr.0,
                next.0,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => curr = ActiveTaskStatus(actual),
            }
        }
    }
}

impl Default for AtomicTaskStatus {
    fn default() -> Self {
        AtomicTaskStatus::new()
    }
}

impl fmt::Debug for AtomicTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}

/// Outcome of [`AtomicTaskStatus::cancel_and_lock`].
#[derive(Debug)]
pub(crate) enum CancelLock<'a> {
    /// Someone else set the cancel bit first.
    AlreadyCancelled,

    /// The bit is set and there was no record to walk.
    Unlocked,

    /// The bit is set and the lock is held for the walk.
    Locked(StatusLockGuard<'a>),
}

/// Holds the status lock of a task. Unlocks on drop, preserving the cancel bit
/// and the current record pointer.
#[must_use = "the status lock is released as soon as the guard is dropped"]
pub struct StatusLockGuard<'a> {
    status: &'a AtomicTaskStatus,
}

impl StatusLockGuard<'_> {
    pub fn status(&self) -> ActiveTaskStatus {
        self.status.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status().is_cancelled()
    }

    pub fn innermost_record(&self) -> Option<NonNull<TaskStatusRecord>> {
        self.status().innermost_record()
    }

    /// Walks the records from the innermost outwards.
    pub fn records(
        &self,
    ) -> LinkedIter<TaskStatusRecord, impl FnMut(NonNull<TaskStatusRecord>) -> Option<NonNull<TaskStatusRecord>>>
    {
        // Safety: records are only freed after being removed from the list,
        // which cannot happen while we hold the lock.
        unsafe { self.status().records() }
    }

    /// Pushes `record` as the new innermost record.
    ///
    /// # Safety
    ///
    /// `record` must stay alive and pinned until it is removed again.
    pub unsafe fn push_record(&mut self, record: NonNull<TaskStatusRecord>) {
        record.as_ref().set_parent(self.innermost_record());
        self.replace_innermost(Some(record));
    }

    /// Pops the innermost record.
    pub fn pop_record(&mut self) -> Option<NonNull<TaskStatusRecord>> {
        let record = self.innermost_record()?;
        // Safety: see `records`.
        let parent = unsafe { TaskStatusRecord::parent_of(record) };
        self.replace_innermost(parent);
        Some(record)
    }

    fn replace_innermost(&mut self, record: Option<NonNull<TaskStatusRecord>>) {
        // Only the cancel bit can change under us.
        let _ = self
            .status
            .val
            .fetch_update(Ordering::Release, Ordering::Relaxed, |val| {
                Some(ActiveTaskStatus(val).with_record(record).0)
            });
    }
}

impl Drop for StatusLockGuard<'_> {
    fn drop(&mut self) {
        self.status.unlock();
    }
}

impl fmt::Debug for StatusLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusLockGuard")
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests;
