use std::sync::atomic::{AtomicU64, Ordering};
use std::{fmt, num::NonZeroU64};

/// An opaque ID that uniquely identifies a task relative to all other tasks
/// created by this process.
///
/// # Notes
///
/// - Task IDs are *not* sequential across threads, and do not indicate the
///   order in which tasks were created.
/// - The ID of the task currently being resumed on this thread can be obtained
///   with [`task::try_id()`](crate::task::try_id()).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Id {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Safety: even creating 1 billion task/sec, it would take 584 years
        // to wrap around.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique task ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }

    /// Task id usable as a span id with the tracing library.
    pub fn as_tracing_id(&self) -> tracing::Id {
        tracing::Id::from_non_zero_u64(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_task_id_unique() {
        let n = 13;
        let ids = (0..n).map(|_| Id::next()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), n);
    }

    #[test]
    fn test_tracing_id_matches() {
        let id = Id::next();
        assert_eq!(id.as_tracing_id().into_u64(), id.as_u64());
    }
}
