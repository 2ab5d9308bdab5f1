//! Bounded, ordered task submission for asynchronous writes.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A per-connection work queue.
///
/// Jobs run on detached worker threads, at most `limit` at a time, and are
/// started in submission order. With the default limit of 1 the queue is a
/// strict serializer: jobs also *complete* in submission order.
#[derive(Debug)]
pub(crate) struct WorkQueue {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    jobs: VecDeque<Job>,
    running: usize,
    limit: usize,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("queued", &self.jobs.len())
            .field("running", &self.running)
            .field("limit", &self.limit)
            .finish()
    }
}

impl WorkQueue {
    pub fn new(limit: usize) -> Self {
        let inner = Inner { limit: limit.max(1), ..Default::default() };
        WorkQueue { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Enqueue a job. Never blocks: either a worker slot is free and a
    /// thread is spawned for the job, or it waits its turn in the deque.
    pub fn push(&self, job: Job) {
        let immediate = {
            let mut inner = self.inner.lock();
            if inner.running < inner.limit {
                inner.running += 1;
                Some(job)
            } else {
                inner.jobs.push_back(job);
                None
            }
        };
        if let Some(job) = immediate {
            let inner = Arc::clone(&self.inner);
            thread::spawn(move || Self::drain(inner, job));
        }
    }

    /// Run `job`, then keep draining queued jobs until none remain.
    fn drain(inner: Arc<Mutex<Inner>>, job: Job) {
        let mut job = job;
        loop {
            job();
            let next = {
                let mut guard = inner.lock();
                match guard.jobs.pop_front() {
                    Some(next) => Some(next),
                    None => {
                        guard.running -= 1;
                        None
                    }
                }
            };
            match next {
                Some(next) => job = next,
                None => return,
            }
        }
    }
}
