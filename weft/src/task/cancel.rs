use crate::task::status::CancelLock;
use crate::task::{TaskRef, TaskStatusRecord, TaskStatusRecordKind};

/// What a call to [`request_cancel`] touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancellationStats {
    /// Status records walked, across the task and all its descendants.
    pub visited: usize,
    /// Cancellation handlers called.
    pub notified: usize,
    /// Tasks whose cancel bit was set by this request, the target included.
    pub cancelled: usize,
}

impl std::ops::AddAssign for CancellationStats {
    fn add_assign(&mut self, rhs: Self) {
        self.visited += rhs.visited;
        self.notified += rhs.notified;
        self.cancelled += rhs.cancelled;
    }
}

/// Cancels `task` and everything its status records reach.
///
/// Sets the cancel bit and takes the status lock in one step, waiting while
/// the lock is held elsewhere. If the bit was already set, whoever set it ran
/// the effects and this returns empty stats. Otherwise the record list is
/// walked under the lock: child records cancel each child recursively and
/// notification records call their handler.
///
/// Cancellation is cooperative: nothing here interrupts a running context.
/// The task observes the flag at its next check.
pub fn request_cancel(task: TaskRef) -> CancellationStats {
    let guard = match task.status().cancel_and_lock() {
        CancelLock::AlreadyCancelled => return CancellationStats::default(),
        CancelLock::Unlocked => None,
        CancelLock::Locked(guard) => Some(guard),
    };

    let mut stats = CancellationStats {
        cancelled: 1,
        ..Default::default()
    };

    if let Some(guard) = guard {
        for record in guard.records() {
            stats.visited += 1;
            stats += cancel_record(record);
        }
    }

    tracing::debug!(
        task.id = %task.id(),
        visited = stats.visited,
        notified = stats.notified,
        cancelled = stats.cancelled,
        "cancellation requested"
    );

    stats
}

fn cancel_record(record: std::ptr::NonNull<TaskStatusRecord>) -> CancellationStats {
    let mut stats = CancellationStats::default();

    // Safety: the caller holds the status lock of the task owning `record`,
    // so it stays alive and in the list.
    unsafe {
        match record.as_ref().kind() {
            TaskStatusRecordKind::ChildTask => {
                if let Some(children) = TaskStatusRecord::as_child_task(record) {
                    for child in children.as_ref().children() {
                        stats += request_cancel(child);
                    }
                }
            }
            TaskStatusRecordKind::CancellationNotification => {
                if let Some(notification) = TaskStatusRecord::as_cancellation_notification(record) {
                    notification.as_ref().notify();
                    stats.notified += 1;
                }
            }
        }
    }

    stats
}
