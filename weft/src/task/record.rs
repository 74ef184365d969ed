#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::TaskRef;
use crate::utils::LinkedIter;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::NonNull;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskStatusRecordKind {
    /// A [`ChildTaskStatusRecord`] anchoring a list of child tasks.
    ChildTask = 0,

    /// A [`CancellationNotificationStatusRecord`] whose handler runs when the
    /// task is cancelled.
    CancellationNotification = 1,
}

/// Common header of every status record. Concrete records embed it as their
/// first field and are addressed through it in the task's record list.
///
/// A record lives in the frame that registered it: it must not move while it
/// is in a list, and must be removed before that frame ends.
#[repr(C, align(8))]
pub struct TaskStatusRecord {
    kind: TaskStatusRecordKind,

    /// The next record outwards. Written only while the record is being pushed.
    parent: Cell<Option<NonNull<TaskStatusRecord>>>,

    _pinned: PhantomPinned,
}

// Safety: `parent` is written by whoever pushes the record, either the task
// itself or the holder of the status lock, before the record is published by
// the status CAS.
unsafe impl Send for TaskStatusRecord {}
unsafe impl Sync for TaskStatusRecord {}

impl TaskStatusRecord {
    pub(crate) fn new(kind: TaskStatusRecordKind) -> TaskStatusRecord {
        TaskStatusRecord {
            kind,
            parent: Cell::new(None),
            _pinned: PhantomPinned,
        }
    }

    pub fn kind(&self) -> TaskStatusRecordKind {
        self.kind
    }

    pub fn parent(&self) -> Option<NonNull<TaskStatusRecord>> {
        self.parent.get()
    }

    pub(crate) fn set_parent(&self, parent: Option<NonNull<TaskStatusRecord>>) {
        self.parent.set(parent);
    }

    /// Link accessor used to walk a record list.
    ///
    /// # Safety
    ///
    /// `record` must point at a live record.
    pub unsafe fn parent_of(record: NonNull<TaskStatusRecord>) -> Option<NonNull<TaskStatusRecord>> {
        record.as_ref().parent.get()
    }

    /// # Safety
    ///
    /// `record` must be live, and derived from a pointer to its whole
    /// concrete record.
    pub unsafe fn as_child_task(record: NonNull<TaskStatusRecord>) -> Option<NonNull<ChildTaskStatusRecord>> {
        (record.as_ref().kind == TaskStatusRecordKind::ChildTask).then(|| record.cast())
    }

    /// # Safety
    ///
    /// Same as [`TaskStatusRecord::as_child_task`].
    pub unsafe fn as_cancellation_notification(
        record: NonNull<TaskStatusRecord>,
    ) -> Option<NonNull<CancellationNotificationStatusRecord>> {
        (record.as_ref().kind == TaskStatusRecordKind::CancellationNotification).then(|| record.cast())
    }
}

impl fmt::Debug for TaskStatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStatusRecord")
            .field("kind", &self.kind)
            .field("parent", &self.parent.get())
            .finish()
    }
}

/// Anchors the child tasks a task has started in the current scope, so that
/// cancelling the task reaches them.
///
/// Children are linked through their [`ChildFragment`](crate::task::ChildFragment)
/// and listed newest first.
#[repr(C)]
pub struct ChildTaskStatusRecord {
    base: TaskStatusRecord,
    first_child: Cell<Option<TaskRef>>,
}

// Safety: see `TaskStatusRecord`. The child list is only mutated by the parent
// task, or under its status lock.
unsafe impl Send for ChildTaskStatusRecord {}
unsafe impl Sync for ChildTaskStatusRecord {}

impl ChildTaskStatusRecord {
    pub fn new() -> ChildTaskStatusRecord {
        ChildTaskStatusRecord {
            base: TaskStatusRecord::new(TaskStatusRecordKind::ChildTask),
            first_child: Cell::new(None),
        }
    }

    /// Pointer to the record header, derived from the whole record.
    pub fn record_ptr(&self) -> NonNull<TaskStatusRecord> {
        NonNull::from(self).cast()
    }

    pub fn first_child(&self) -> Option<TaskRef> {
        self.first_child.get()
    }

    /// Prepends `child` to the list.
    ///
    /// # Panics
    ///
    /// Panics if `child` was not created as a child task.
    ///
    /// # Safety
    ///
    /// The caller must be the parent task, or hold the parent's status lock
    /// once the record is published. `child` must stay alive while listed.
    #[track_caller]
    pub unsafe fn add_child(&self, child: TaskRef) {
        let fragment = child.child_fragment();

        if let Some(first) = self.first_child.get() {
            debug_assert_eq!(
                first.child_fragment().parent(),
                fragment.parent(),
                "sibling tasks must share a parent"
            );
        }

        fragment.set_next_child(self.first_child.get());
        self.first_child.set(Some(child));
    }

    /// Iterates the children, newest first.
    pub fn children(&self) -> impl Iterator<Item = TaskRef> + '_ {
        LinkedIter::new(self.first_child.get().map(|c| c.as_ptr()), |task| unsafe {
            TaskRef::from_raw(task)
                .child_fragment()
                .next_child()
                .map(|c| c.as_ptr())
        })
        // Safety: every listed pointer came from a live `TaskRef`.
        .map(|task| unsafe { TaskRef::from_raw(task) })
    }
}

impl Default for ChildTaskStatusRecord {
    fn default() -> Self {
        ChildTaskStatusRecord::new()
    }
}

impl fmt::Debug for ChildTaskStatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildTaskStatusRecord")
            .field("base", &self.base)
            .field("first_child", &self.first_child.get())
            .finish()
    }
}

/// Runs a handler when its task is cancelled, e.g. to interrupt a blocking
/// wait the task is parked on.
///
/// The handler runs on the cancelling thread while the task's status lock is
/// held. It must be quick, must not resume any context, and must not touch
/// the same task's records.
#[repr(C)]
pub struct CancellationNotificationStatusRecord {
    base: TaskStatusRecord,
    handler: Box<dyn Fn() + Send + Sync>,
}

impl CancellationNotificationStatusRecord {
    pub fn new<F>(handler: F) -> CancellationNotificationStatusRecord
    where
        F: Fn() + Send + Sync + 'static,
    {
        CancellationNotificationStatusRecord {
            base: TaskStatusRecord::new(TaskStatusRecordKind::CancellationNotification),
            handler: Box::new(handler),
        }
    }

    /// Pointer to the record header, derived from the whole record.
    pub fn record_ptr(&self) -> NonNull<TaskStatusRecord> {
        NonNull::from(self).cast()
    }

    pub fn notify(&self) {
        (self.handler)();
    }
}

impl fmt::Debug for CancellationNotificationStatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationNotificationStatusRecord")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}
