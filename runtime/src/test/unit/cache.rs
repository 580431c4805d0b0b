use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crate::cache::{ArtifactCache, CacheStats};
use crate::error::{Error, LaunchSnafu};
use crate::test::add_artifact;

#[test]
fn concurrent_callers_share_one_compile() {
    let cache = ArtifactCache::default();
    let (key, artifact) = add_artifact(256);
    let compiles = AtomicUsize::new(0);
    let barrier = Barrier::new(8);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache
                        .get_or_compile(&key, || {
                            compiles.fetch_add(1, Ordering::SeqCst);
                            // Keep the attempt open long enough for the others to pile up.
                            thread::sleep(Duration::from_millis(50));
                            Ok(artifact.clone())
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(compiles.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    let stats = cache.stats();
    assert_eq!((stats.misses, stats.compiles, stats.hits), (1, 1, 7));
}

#[test]
fn second_lookup_is_a_hit() {
    let cache = ArtifactCache::default();
    let (key, artifact) = add_artifact(128);

    let first = cache.get_or_compile(&key, || Ok(artifact.clone())).unwrap();
    let second = cache.get_or_compile(&key, || panic!("must not recompile")).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(cache.contains(&key));
    assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, compiles: 1, ..CacheStats::default() });
}

#[test]
fn failures_are_not_cached() {
    let cache = ArtifactCache::default();
    let (key, artifact) = add_artifact(64);
    let failure = || LaunchSnafu { reason: "backend exploded" }.fail();

    assert_eq!(cache.get_or_compile(&key, failure), Err(Error::Launch { reason: "backend exploded".into() }));
    assert!(!cache.contains(&key));

    cache.get_or_compile(&key, || Ok(artifact.clone())).unwrap();
    let stats = cache.stats();
    assert_eq!((stats.failures, stats.compiles), (1, 2));
}

#[test]
fn failure_is_broadcast_to_waiters() {
    let cache = ArtifactCache::default();
    let (key, _) = add_artifact(32);
    let barrier = Barrier::new(4);

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache.get_or_compile(&key, || {
                        thread::sleep(Duration::from_millis(50));
                        LaunchSnafu { reason: "nope" }.fail()
                    })
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|o| o == &Err(Error::Launch { reason: "nope".into() })));
    assert!(cache.stats().compiles >= 1);
    assert!(!cache.contains(&key));
}

#[test]
fn panicking_compile_releases_waiters() {
    let cache = ArtifactCache::default();
    let (key, artifact) = add_artifact(16);

    let outcome = cache.get_or_compile(&key, || panic!("compiler bug"));
    assert_eq!(outcome, Err(Error::CompilePanicked { kernel: "add_kernel".into() }));

    // The key is free again.
    assert!(cache.get_or_compile(&key, || Ok(artifact.clone())).is_ok());
}

#[test]
fn lru_eviction_respects_capacity() {
    let cache = ArtifactCache::new(Some(2), None);
    let entries: Vec<_> = [16, 32, 64].into_iter().map(add_artifact).collect();
    let [(a, art_a), (b, art_b), (c, art_c)] = <[_; 3]>::try_from(entries).unwrap();

    cache.get_or_compile(&a, || Ok(art_a.clone())).unwrap();
    cache.get_or_compile(&b, || Ok(art_b)).unwrap();
    // Touch `a` so that `b` is the least recently used.
    assert!(cache.get(&a).is_some());
    cache.get_or_compile(&c, || Ok(art_c)).unwrap();

    assert_eq!(cache.len(), 2);
    assert!(cache.contains(&a) && cache.contains(&c) && !cache.contains(&b));
    assert_eq!(cache.stats().evictions, 1);

    // An evicted key compiles again.
    let recompiled = AtomicUsize::new(0);
    cache
        .get_or_compile(&b, || {
            recompiled.fetch_add(1, Ordering::SeqCst);
            Ok(art_a)
        })
        .unwrap();
    assert_eq!(recompiled.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 2);
}

#[test]
fn distinct_keys_compile_independently() {
    let cache = ArtifactCache::default();
    for block in [16, 32, 64, 128] {
        let (key, artifact) = add_artifact(block);
        cache.get_or_compile(&key, || Ok(artifact)).unwrap();
    }
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.stats().compiles, 4);

    cache.clear();
    assert!(cache.is_empty());
}
