use bitflags::bitflags;
use std::fmt;

const KIND_MASK: u32 = 0x0000_00FF;
const PRIORITY_SHIFT: u32 = 8;
const PRIORITY_MASK: u32 = 0x0000_FF00;
const TASK_FLAGS_MASK: u32 = 0xFF00_0000;

/// What kind of job this is. Executors must route `Task` jobs through the
/// task-resume path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobKind {
    /// The job is an [`AsyncTask`](crate::task::AsyncTask).
    Task = 0,

    /// A plain job that runs its invoke function.
    Invoke = 1,
}

impl JobKind {
    fn from_bits(bits: u32) -> JobKind {
        match bits & KIND_MASK {
            0 => JobKind::Task,
            _ => JobKind::Invoke,
        }
    }
}

/// Scheduling priority carried in the flags. Higher values run sooner on
/// executors that honor priorities; nothing in this crate reorders on it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum JobPriority {
    #[default]
    Unspecified = 0x00,
    Background = 0x09,
    Utility = 0x11,
    Default = 0x15,
    UserInitiated = 0x19,
    UserInteractive = 0x21,
}

impl JobPriority {
    fn from_bits(bits: u32) -> JobPriority {
        match ((bits & PRIORITY_MASK) >> PRIORITY_SHIFT) as u8 {
            0x09 => JobPriority::Background,
            0x11 => JobPriority::Utility,
            0x15 => JobPriority::Default,
            0x19 => JobPriority::UserInitiated,
            0x21 => JobPriority::UserInteractive,
            _ => JobPriority::Unspecified,
        }
    }
}

bitflags! {
    /// Immutable task-only flags, set when the task is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TaskFlags: u32 {
        /// The task has a `ChildFragment` linking it to its parent.
        const IS_CHILD_TASK = 1 << 24;

        /// The task is expected to publish a result.
        const IS_FUTURE = 1 << 25;
    }
}

/// Packed job flags: kind in bits 0..8, priority in bits 8..16, task flags in
/// bits 24..32.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobFlags(u32);

impl JobFlags {
    pub const fn new(kind: JobKind) -> JobFlags {
        JobFlags(kind as u32)
    }

    /// Flags for an async task.
    pub const fn task() -> JobFlags {
        JobFlags::new(JobKind::Task)
    }

    /// Flags for a plain job.
    pub const fn invoke() -> JobFlags {
        JobFlags::new(JobKind::Invoke)
    }

    pub const fn from_bits(bits: u32) -> JobFlags {
        JobFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn kind(&self) -> JobKind {
        JobKind::from_bits(self.0)
    }

    pub fn is_async_task(&self) -> bool {
        self.kind() == JobKind::Task
    }

    pub fn priority(&self) -> JobPriority {
        JobPriority::from_bits(self.0)
    }

    #[must_use]
    pub fn with_priority(self, priority: JobPriority) -> JobFlags {
        JobFlags((self.0 & !PRIORITY_MASK) | ((priority as u32) << PRIORITY_SHIFT))
    }

    pub fn task_flags(&self) -> TaskFlags {
        TaskFlags::from_bits_truncate(self.0 & TASK_FLAGS_MASK)
    }

    /// Sets task flags. Only meaningful on task jobs.
    #[must_use]
    #[track_caller]
    pub fn with_task_flags(self, flags: TaskFlags) -> JobFlags {
        assert!(
            self.is_async_task(),
            "task flags set on a non-task job: {:?}",
            self
        );
        JobFlags(self.0 | flags.bits())
    }

    pub fn is_child_task(&self) -> bool {
        self.is_async_task() && self.task_flags().contains(TaskFlags::IS_CHILD_TASK)
    }

    pub fn is_future(&self) -> bool {
        self.is_async_task() && self.task_flags().contains(TaskFlags::IS_FUTURE)
    }
}

impl fmt::Debug for JobFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFlags")
            .field("kind", &self.kind())
            .field("priority", &self.priority())
            .field("task", &self.task_flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unspecified(JobPriority::Unspecified)]
    #[case::background(JobPriority::Background)]
    #[case::utility(JobPriority::Utility)]
    #[case::default(JobPriority::Default)]
    #[case::user_initiated(JobPriority::UserInitiated)]
    #[case::user_interactive(JobPriority::UserInteractive)]
    fn test_priority_does_not_touch_kind(#[case] priority: JobPriority) {
        let flags = JobFlags::task()
            .with_task_flags(TaskFlags::IS_CHILD_TASK)
            .with_priority(priority);

        assert_eq!(flags.priority(), priority);
        assert_eq!(flags.kind(), JobKind::Task);
        assert!(flags.is_child_task());
        assert!(!flags.is_future());
    }

    #[test]
    fn test_priority_can_be_lowered() {
        let flags = JobFlags::invoke()
            .with_priority(JobPriority::UserInteractive)
            .with_priority(JobPriority::Background);

        assert_eq!(flags.priority(), JobPriority::Background);
        assert_eq!(flags.kind(), JobKind::Invoke);
    }

    #[test]
    fn test_unknown_bits_decode_conservatively() {
        let flags = JobFlags::from_bits(0x0000_4207);
        assert_eq!(flags.kind(), JobKind::Invoke);
        assert_eq!(flags.priority(), JobPriority::Unspecified);
        assert!(!flags.is_child_task());
    }

    #[test]
    #[should_panic(expected = "task flags set on a non-task job")]
    fn test_task_flags_on_plain_job_panics() {
        let _ = JobFlags::invoke().with_task_flags(TaskFlags::IS_FUTURE);
    }
}
