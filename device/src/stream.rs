//! In-order execution streams.
//!
//! Each stream owns a worker thread draining a FIFO queue. Submission never
//! blocks; completion is observed through the stream's [`TimelineSignal`].

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::error::{LaunchSnafu, Result};
use crate::sync::TimelineSignal;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Default)]
struct Queue {
    tasks: VecDeque<(u64, Task)>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
    signal: Arc<TimelineSignal>,
}

struct StreamInner {
    id: u64,
    shared: Arc<Shared>,
    /// Last value handed out by `submit`.
    issued: Mutex<u64>,
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        self.shared.queue.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

/// Handle to a device execution stream. Clones refer to the same stream.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.inner.id).field("completed", &self.inner.shared.signal.value()).finish()
    }
}

fn worker(shared: Arc<Shared>) {
    loop {
        let (value, task) = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(next) = queue.tasks.pop_front() {
                    break next;
                }
                if queue.closed {
                    return;
                }
                shared.ready.wait(&mut queue);
            }
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(task))
            .unwrap_or_else(|_| LaunchSnafu { reason: "stream task panicked" }.fail());
        match outcome {
            Ok(()) => shared.signal.set(value),
            Err(error) => {
                warn!(value, %error, "stream task failed");
                shared.signal.fail(value, error);
            }
        }
    }
}

impl Stream {
    pub(crate) fn spawn(device: &str) -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            signal: Arc::new(TimelineSignal::new(id)),
        });
        let worker_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new().name(format!("{device}-stream-{id}")).spawn(move || worker(worker_shared));
        if let Err(error) = spawned {
            // Without a worker the queue is drained inline on submit.
            warn!(%error, "failed to spawn stream worker");
            shared.queue.lock().closed = true;
        }
        Self { inner: Arc::new(StreamInner { id, shared, issued: Mutex::new(0) }) }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn signal(&self) -> &Arc<TimelineSignal> {
        &self.inner.shared.signal
    }

    /// Enqueue `task` and return the timeline value that marks its completion.
    pub fn submit(&self, task: impl FnOnce() -> Result<()> + Send + 'static) -> u64 {
        let mut issued = self.inner.issued.lock();
        *issued += 1;
        let value = *issued;
        let mut queue = self.inner.shared.queue.lock();
        if queue.closed {
            drop(queue);
            match task() {
                Ok(()) => self.signal().set(value),
                Err(error) => self.signal().fail(value, error),
            }
            return value;
        }
        queue.tasks.push_back((value, Box::new(task)));
        trace!(stream = self.inner.id, value, pending = queue.tasks.len(), "submitted");
        self.inner.shared.ready.notify_one();
        value
    }

    /// Block until everything submitted so far has run.
    ///
    /// Returns the earliest failure this stream has recorded, if any.
    pub fn synchronize(&self, timeout: Option<Duration>) -> Result<()> {
        let issued = *self.inner.issued.lock();
        let signal = self.signal();
        signal.wait(issued, timeout)?;
        signal.first_failure(issued).map_or(Ok(()), Err)
    }

    /// Block until everything submitted so far has run, without reporting failures.
    pub(crate) fn drain(&self) {
        let issued = *self.inner.issued.lock();
        let _ = self.signal().wait(issued, None);
    }
}
