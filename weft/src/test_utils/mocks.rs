#![allow(unused)]

use crate::executor::{Executor, ExecutorRef};
use crate::job::{JobKind, JobRef};
use crate::task::Id;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Enqueue,
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Enqueue { kind: JobKind, task: Option<Id> },
    Run { kind: JobKind, task: Option<Id> },
}

impl Call {
    fn describe(job: JobRef) -> (JobKind, Option<Id>) {
        (job.flags().kind(), job.as_task().map(|t| t.id()))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        map.insert(Method::Enqueue, Vec::new());
        map.insert(Method::Run, Vec::new());

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }
}

/// Executor that only queues jobs, and runs them when the test says so.
pub(crate) struct RecordingExecutor {
    queue: Mutex<VecDeque<JobRef>>,
    tracker: Tracker,
    this: Weak<RecordingExecutor>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| RecordingExecutor {
            queue: Mutex::new(VecDeque::new()),
            tracker: Tracker::new(),
            this: this.clone(),
        })
    }

    pub(crate) fn executor_ref(&self) -> ExecutorRef {
        let weak: Weak<dyn Executor> = self.this.clone();
        ExecutorRef::from_weak(weak)
    }

    pub(crate) fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the oldest queued job, if any.
    pub(crate) fn run_one(&self) -> bool {
        // Release the queue before running: the job may enqueue again.
        let Some(job) = self.queue.lock().pop_front() else {
            return false;
        };

        let (kind, task) = Call::describe(job);
        self.tracker.record(Method::Run, Call::Run { kind, task });
        job.run(self.executor_ref());
        true
    }

    /// Runs queued jobs until the queue stays empty. Returns how many ran.
    pub(crate) fn drain(&self) -> usize {
        let mut n = 0;
        while self.run_one() {
            n += 1;
        }
        n
    }
}

impl Executor for RecordingExecutor {
    fn enqueue(&self, job: JobRef) {
        let (kind, task) = Call::describe(job);
        self.tracker.record(Method::Enqueue, Call::Enqueue { kind, task });
        self.queue.lock().push_back(job);
    }
}
