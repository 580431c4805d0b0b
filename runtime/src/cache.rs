//! Compile-once artifact cache.
//!
//! Completed artifacts live in a lock-free map (papaya), so the lookup fast path
//! takes no lock. Misses go through a second map of in-flight attempts guarded by
//! a `parking_lot` mutex: the first caller for a key compiles, every concurrent
//! caller for the same key waits on that attempt and receives its outcome. Callers
//! for other keys only touch the in-flight map briefly and compile concurrently.
//!
//! A failed attempt is broadcast to its waiters and leaves no entry behind, so a
//! later call retries. A compile function that panics releases its waiters with
//! [`Error::CompilePanicked`].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_codegen::CompiledArtifact;
use kiln_ir::SpecializationKey;
use papaya::HashMap as ConcurrentMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::disk::DiskCache;
use crate::error::{Error, Result};

/// Counters of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from memory, including callers that waited on another's compile.
    pub hits: u64,
    /// Had to produce the artifact (from disk or by compiling).
    pub misses: u64,
    /// Backend invocations.
    pub compiles: u64,
    /// Served from the disk mirror without compiling.
    pub disk_hits: u64,
    pub failures: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
    disk_hits: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Entry {
    artifact: Arc<CompiledArtifact>,
    last_used: AtomicU64,
}

/// One compile attempt shared by its leader and waiters.
struct Flight {
    outcome: Mutex<Option<Result<Arc<CompiledArtifact>>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Arc<Self> {
        Arc::new(Self { outcome: Mutex::new(None), done: Condvar::new() })
    }

    fn wait(&self) -> Result<Arc<CompiledArtifact>> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(outcome) = &*outcome {
                return outcome.clone();
            }
            self.done.wait(&mut outcome);
        }
    }

    fn finish(&self, outcome: Result<Arc<CompiledArtifact>>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }
}

pub struct ArtifactCache {
    entries: ConcurrentMap<SpecializationKey, Entry>,
    in_flight: Mutex<HashMap<SpecializationKey, Arc<Flight>>>,
    capacity: Option<usize>,
    clock: AtomicU64,
    counters: Counters,
    disk: Option<DiskCache>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ArtifactCache {
    /// `capacity` bounds the number of resident artifacts; `disk` mirrors them.
    pub fn new(capacity: Option<usize>, disk: Option<DiskCache>) -> Self {
        Self {
            entries: ConcurrentMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            capacity: capacity.filter(|c| *c > 0),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
            disk,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lookup(&self, key: &SpecializationKey) -> Option<Arc<CompiledArtifact>> {
        let entries = self.entries.pin();
        let entry = entries.get(key)?;
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(&entry.artifact))
    }

    pub fn get(&self, key: &SpecializationKey) -> Option<Arc<CompiledArtifact>> {
        self.lookup(key)
    }

    pub fn contains(&self, key: &SpecializationKey) -> bool {
        self.entries.pin().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn disk(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            compiles: c.compiles.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop every resident artifact. The disk mirror is left alone.
    pub fn clear(&self) {
        self.entries.pin().clear();
    }

    /// Return the artifact for `key`, running `compile` at most once per resident key.
    pub fn get_or_compile<F>(&self, key: &SpecializationKey, compile: F) -> Result<Arc<CompiledArtifact>>
    where
        F: FnOnce() -> Result<CompiledArtifact>,
    {
        if let Some(artifact) = self.lookup(key) {
            bump(&self.counters.hits);
            return Ok(artifact);
        }

        let flight = {
            let mut in_flight = self.in_flight.lock();
            // Re-check: the leader publishes the entry before leaving the in-flight map.
            if let Some(artifact) = self.lookup(key) {
                bump(&self.counters.hits);
                return Ok(artifact);
            }
            if let Some(flight) = in_flight.get(key) {
                let flight = Arc::clone(flight);
                drop(in_flight);
                trace!(%key, "waiting for in-flight compile");
                bump(&self.counters.hits);
                return flight.wait();
            }
            let flight = Flight::new();
            in_flight.insert(key.clone(), Arc::clone(&flight));
            flight
        };
        bump(&self.counters.misses);

        let outcome = self.produce(key, compile);
        if let Ok(artifact) = &outcome {
            self.insert(key, Arc::clone(artifact));
        } else {
            bump(&self.counters.failures);
        }
        self.in_flight.lock().remove(key);
        flight.finish(outcome.clone());
        outcome
    }

    fn produce<F>(&self, key: &SpecializationKey, compile: F) -> Result<Arc<CompiledArtifact>>
    where
        F: FnOnce() -> Result<CompiledArtifact>,
    {
        if let Some(artifact) = self.disk.as_ref().and_then(|disk| disk.load(key)) {
            bump(&self.counters.disk_hits);
            return Ok(Arc::new(artifact));
        }

        bump(&self.counters.compiles);
        let artifact = panic::catch_unwind(AssertUnwindSafe(compile))
            .unwrap_or_else(|_| Err(Error::CompilePanicked { kernel: key.kernel.clone() }))?;
        if let Some(disk) = &self.disk {
            disk.store(key, &artifact);
        }
        Ok(Arc::new(artifact))
    }

    fn insert(&self, key: &SpecializationKey, artifact: Arc<CompiledArtifact>) {
        let entries = self.entries.pin();
        entries.insert(key.clone(), Entry { artifact, last_used: AtomicU64::new(self.tick()) });

        let Some(capacity) = self.capacity else { return };
        while entries.len() > capacity {
            let victim = entries
                .iter()
                .filter(|(k, _)| *k != key)
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else { break };
            if entries.remove(&victim).is_some() {
                bump(&self.counters.evictions);
                debug!(key = %victim, "evicted");
            }
        }
    }
}
