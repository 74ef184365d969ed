//! Async tasks, their status word and status records.

mod cancel;
pub use cancel::{CancellationStats, request_cancel};

mod child;
pub use child::ChildFragment;

mod current;
pub use current::{current, try_id};

mod id;
pub use id::Id;

mod record;
pub use record::{
    CancellationNotificationStatusRecord, ChildTaskStatusRecord, TaskStatusRecord,
    TaskStatusRecordKind,
};

mod status;
pub use status::{ActiveTaskStatus, AtomicTaskStatus, StatusLockGuard};

#[allow(clippy::module_inception)]
mod task;
pub use task::{AsyncTask, TaskRef};
