use super::*;
use crate::task::{CancellationNotificationStatusRecord, ChildTaskStatusRecord};
use rstest::rstest;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Barrier};
use std::thread;

fn record_list(status: &AtomicTaskStatus) -> Vec<NonNull<TaskStatusRecord>> {
    status.lock().records().collect()
}

#[test]
fn test_empty_status() {
    let status = AtomicTaskStatus::new();
    let snapshot = status.load(Ordering::Relaxed);

    assert_eq!(snapshot, ActiveTaskStatus::empty());
    assert!(!snapshot.is_cancelled());
    assert!(!snapshot.is_locked());
    assert!(snapshot.innermost_record().is_none());
}

#[rstest]
#[case::plain(false, false)]
#[case::cancelled(true, false)]
#[case::locked(false, true)]
#[case::both(true, true)]
fn test_flags_do_not_alias_record(#[case] cancelled: bool, #[case] locked: bool) {
    let record = ChildTaskStatusRecord::new();
    let snapshot = ActiveTaskStatus::new(Some(record.record_ptr()), cancelled, locked);

    assert_eq!(snapshot.is_cancelled(), cancelled);
    assert_eq!(snapshot.is_locked(), locked);
    assert_eq!(snapshot.innermost_record(), Some(record.record_ptr()));
}

#[rstest]
#[case::zero(0)]
#[case::one(1)]
#[case::few(3)]
#[case::many(16)]
fn test_add_remove_lifo(#[case] n: usize) {
    let status = AtomicTaskStatus::new();
    let records = (0..n).map(|_| ChildTaskStatusRecord::new()).collect::<Vec<_>>();

    for record in &records {
        let after = unsafe { status.add_record(record.record_ptr()) };
        assert_eq!(after.innermost_record(), Some(record.record_ptr()));
    }

    let expected = records.iter().rev().map(|r| r.record_ptr()).collect::<Vec<_>>();
    assert_eq!(record_list(&status), expected);

    for record in records.iter().rev() {
        assert_eq!(status.load(Ordering::Relaxed).innermost_record(), Some(record.record_ptr()));
        unsafe { status.remove_record(record.record_ptr()) };
    }

    assert_eq!(status.load(Ordering::Relaxed), ActiveTaskStatus::empty());
}

#[test]
fn test_guard_push_pop_restores_head() {
    let status = AtomicTaskStatus::new();
    let outer = ChildTaskStatusRecord::new();
    unsafe { status.add_record(outer.record_ptr()) };

    let inner = (0..4).map(|_| ChildTaskStatusRecord::new()).collect::<Vec<_>>();
    {
        let mut guard = status.lock();
        for record in &inner {
            unsafe { guard.push_record(record.record_ptr()) };
        }
        assert_eq!(guard.records().count(), 5);

        for record in inner.iter().rev() {
            assert_eq!(guard.pop_record(), Some(record.record_ptr()));
        }
        assert_eq!(guard.innermost_record(), Some(outer.record_ptr()));
    }

    assert!(!status.load(Ordering::Relaxed).is_locked());
    assert_eq!(record_list(&status), vec![outer.record_ptr()]);
}

#[test]
fn test_cancel_is_sticky() {
    let status = AtomicTaskStatus::new();

    let prev = status.cancel();
    assert!(!prev.is_cancelled());
    assert!(status.is_cancelled());

    let prev = status.cancel();
    assert!(prev.is_cancelled());

    // Lock cycles and record churn keep the bit.
    let record = ChildTaskStatusRecord::new();
    drop(status.lock());
    unsafe {
        assert!(status.add_record(record.record_ptr()).is_cancelled());
        status.remove_record(record.record_ptr());
    }
    assert!(status.is_cancelled());
}

#[test]
fn test_cancel_and_lock() {
    let empty = AtomicTaskStatus::new();
    assert!(matches!(empty.cancel_and_lock(), CancelLock::Unlocked));
    assert!(empty.is_cancelled());
    assert!(!empty.load(Ordering::Relaxed).is_locked());
    assert!(matches!(empty.cancel_and_lock(), CancelLock::AlreadyCancelled));

    let status = AtomicTaskStatus::new();
    let record = ChildTaskStatusRecord::new();
    unsafe { status.add_record(record.record_ptr()) };

    match status.cancel_and_lock() {
        CancelLock::Locked(guard) => {
            let snapshot = guard.status();
            assert!(snapshot.is_cancelled());
            assert!(snapshot.is_locked());
            assert_eq!(guard.innermost_record(), Some(record.record_ptr()));
        }
        other => panic!("expected the lock, got {:?}", other),
    }

    assert!(!status.load(Ordering::Relaxed).is_locked());
    assert!(matches!(status.cancel_and_lock(), CancelLock::AlreadyCancelled));
}

#[test]
fn test_cancel_and_lock_waits_for_lock() {
    let status = Arc::new(AtomicTaskStatus::new());
    let record = Arc::new(ChildTaskStatusRecord::new());
    unsafe { status.add_record(record.record_ptr()) };
    let guard = status.lock();

    let canceller = {
        let status = Arc::clone(&status);
        thread::spawn(move || matches!(status.cancel_and_lock(), CancelLock::Locked(_)))
    };

    thread::sleep(std::time::Duration::from_millis(20));
    assert!(!guard.is_cancelled());
    drop(guard);

    assert!(canceller.join().expect("canceller panicked"));
    let after = status.load(Ordering::Acquire);
    assert!(after.is_cancelled());
    assert!(!after.is_locked());
}

#[test]
fn test_try_lock_excludes() {
    let status = AtomicTaskStatus::new();

    let guard = status.try_lock().expect("lock is free");
    assert!(guard.status().is_locked());
    assert!(status.try_lock().is_none());

    drop(guard);
    assert!(!status.load(Ordering::Relaxed).is_locked());
    assert!(status.try_lock().is_some());
}

#[test]
fn test_cancel_while_locked() {
    let status = AtomicTaskStatus::new();
    let record = CancellationNotificationStatusRecord::new(|| {});
    unsafe { status.add_record(record.record_ptr()) };

    let guard = status.lock();
    let prev = status.cancel();
    assert!(prev.is_locked());
    assert!(guard.is_cancelled());
    drop(guard);

    let after = status.load(Ordering::Relaxed);
    assert!(after.is_cancelled());
    assert!(!after.is_locked());
    assert_eq!(after.innermost_record(), Some(record.record_ptr()));
}

#[test]
fn test_concurrent_cancel() {
    const THREADS: usize = 8;

    let status = Arc::new(AtomicTaskStatus::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let first = (0..THREADS)
        .map(|_| {
            let status = Arc::clone(&status);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                !status.cancel().is_cancelled()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().expect("cancel thread panicked"))
        .filter(|first| *first)
        .count();

    assert_eq!(first, 1, "exactly one request observes the uncancelled task");
    assert!(status.is_cancelled());
}

#[test]
fn test_lock_mutual_exclusion() {
    const THREADS: usize = 4;
    const ITERS: usize = 1000;

    let status = Arc::new(AtomicTaskStatus::new());
    let inside = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles = (0..THREADS)
        .map(|i| {
            let status = Arc::clone(&status);
            let inside = Arc::clone(&inside);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for n in 0..ITERS {
                    let _guard = status.lock();
                    assert!(!inside.swap(true, Ordering::AcqRel), "two lock holders");
                    if (i + n) % 7 == 0 {
                        thread::yield_now();
                    }
                    inside.store(false, Ordering::Release);
                }
            })
        })
        .collect::<Vec<_>>();

    for h in handles {
        h.join().expect("lock thread panicked");
    }
    assert!(!status.load(Ordering::Relaxed).is_locked());
}

#[test]
fn test_cancel_during_locked_traversal() {
    let status = Arc::new(AtomicTaskStatus::new());
    let records = (0..3).map(|_| ChildTaskStatusRecord::new()).collect::<Vec<_>>();
    for record in &records {
        unsafe { status.add_record(record.record_ptr()) };
    }
    let before = record_list(&status);

    let locked = Arc::new(Barrier::new(2));
    let cancelled = Arc::new(Barrier::new(2));

    let canceller = {
        let status = Arc::clone(&status);
        let locked = Arc::clone(&locked);
        let cancelled = Arc::clone(&cancelled);
        thread::spawn(move || {
            locked.wait();
            let prev = status.cancel();
            cancelled.wait();
            prev
        })
    };

    {
        let guard = status.lock();
        let mut walk = guard.records();
        let first = walk.next();

        locked.wait();
        cancelled.wait();

        // Mid-traversal: the bit is visible, the list is untouched.
        assert!(guard.is_cancelled());
        let rest = walk.collect::<Vec<_>>();
        assert_eq!(first.into_iter().chain(rest).collect::<Vec<_>>(), before);
    }

    let prev = canceller.join().expect("canceller panicked");
    assert!(prev.is_locked());
    assert!(!prev.is_cancelled());

    let after = status.load(Ordering::Acquire);
    assert!(after.is_cancelled());
    assert!(!after.is_locked());
    assert_eq!(record_list(&status), before);
}

#[test]
fn test_add_record_waits_for_lock() {
    let status = Arc::new(AtomicTaskStatus::new());
    let record = Arc::new(ChildTaskStatusRecord::new());
    let guard = status.lock();

    let adder = {
        let status = Arc::clone(&status);
        let record = Arc::clone(&record);
        thread::spawn(move || unsafe { status.add_record(record.record_ptr()) })
    };

    thread::sleep(std::time::Duration::from_millis(20));
    assert!(guard.innermost_record().is_none());
    drop(guard);

    let after = adder.join().expect("adder panicked");
    assert_eq!(after.innermost_record(), Some(record.record_ptr()));
    unsafe { status.remove_record(record.record_ptr()) };
}
