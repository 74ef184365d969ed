use crate::task::{Id, TaskRef};
use std::cell::Cell;

thread_local! {
    static CURRENT: Cell<Option<TaskRef>> = const { Cell::new(None) };
}

/// Returns the task currently being resumed on this thread, if any.
pub fn current() -> Option<TaskRef> {
    CURRENT.with(|c| c.get())
}

/// Returns the [`Id`] of the task currently being resumed on this thread.
pub fn try_id() -> Option<Id> {
    current().map(|task| task.id())
}

/// Marks `task` as current for the duration of one resumption. Restores the
/// previously current task on drop, so nested direct resumptions on the same
/// thread unwind correctly.
pub(super) struct CurrentTaskGuard {
    prev: Option<TaskRef>,
}

impl CurrentTaskGuard {
    pub(super) fn enter(task: TaskRef) -> Self {
        CurrentTaskGuard {
            prev: CURRENT.with(|c| c.replace(Some(task))),
        }
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.prev));
    }
}
