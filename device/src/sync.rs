//! Timeline signals for stream completion.
//!
//! A timeline signal is a monotonically increasing counter. Every task submitted to a
//! stream is assigned the next value; the stream worker advances the signal once the
//! task has run. Tasks that fail latch their reason under their value so that waiters
//! on that value observe the failure instead of a plain completion.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result, TimeoutSnafu};

#[derive(Debug)]
pub struct TimelineSignal {
    stream: u64,
    value: AtomicU64,
    /// Failed task values and their errors.
    failures: Mutex<BTreeMap<u64, Error>>,
    condvar: Condvar,
}

impl TimelineSignal {
    pub fn new(stream: u64) -> Self {
        Self { stream, value: AtomicU64::new(0), failures: Mutex::new(BTreeMap::new()), condvar: Condvar::new() }
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_reached(&self, value: u64) -> bool {
        self.value() >= value
    }

    /// Advance the timeline to `value`. Never moves backwards.
    pub fn set(&self, value: u64) {
        let _guard = self.failures.lock();
        self.value.fetch_max(value, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    /// Advance the timeline to `value` and record that the task at `value` failed.
    pub fn fail(&self, value: u64, error: Error) {
        let mut failures = self.failures.lock();
        failures.insert(value, error);
        self.value.fetch_max(value, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    /// Outcome of the task at `value`, if it has completed.
    pub fn poll(&self, value: u64) -> Option<Result<()>> {
        let failures = self.failures.lock();
        if self.value() < value {
            return None;
        }
        Some(failures.get(&value).cloned().map_or(Ok(()), Err))
    }

    /// Earliest failure recorded at or before `value`.
    pub fn first_failure(&self, value: u64) -> Option<Error> {
        self.failures.lock().range(..=value).next().map(|(_, error)| error.clone())
    }

    /// Block until the task at `value` completes.
    ///
    /// `None` waits without a deadline.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut failures = self.failures.lock();
        while self.value() < value {
            match deadline {
                None => self.condvar.wait(&mut failures),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut failures, deadline).timed_out() && self.value() < value {
                        return TimeoutSnafu { stream: self.stream, value }.fail();
                    }
                }
            }
        }
        failures.get(&value).cloned().map_or(Ok(()), Err)
    }
}
