use std::fs;
use std::sync::Barrier;
use std::thread;

use kiln_ir::test::fixtures::add_kernel;
use kiln_ir::{Constants, Target};

use crate::DiskCache;
use crate::test::{add_artifact, compiler};

#[test]
fn stored_entry_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskCache::new(dir.path());
    let (key, artifact) = add_artifact(128);

    assert_eq!(disk.load(&key), None);
    disk.store(&key, &artifact);

    let entry = disk.entry_dir(&key);
    assert!(entry.join("meta.json").is_file());
    assert!(entry.join("kernel.cubin").is_file());
    assert!(entry.join("kernel.ptx").is_file());
    assert_eq!(disk.load(&key), Some(artifact));
}

#[test]
fn entries_are_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskCache::new(dir.path());
    let (a, artifact) = add_artifact(128);
    let (b, _) = add_artifact(256);

    disk.store(&a, &artifact);
    assert_ne!(disk.entry_dir(&a), disk.entry_dir(&b));
    assert_eq!(disk.load(&b), None);
}

#[test]
fn racing_writers_publish_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (key, artifact) = add_artifact(128);
    let barrier = Barrier::new(8);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let disk = DiskCache::new(dir.path());
                barrier.wait();
                disk.store(&key, &artifact);
            });
        }
    });

    let disk = DiskCache::new(dir.path());
    assert_eq!(disk.load(&key), Some(artifact));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1, "scratch directories left behind");
}

#[test]
fn corrupt_entries_are_misses() {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskCache::new(dir.path());
    let (key, artifact) = add_artifact(64);
    disk.store(&key, &artifact);

    let entry = disk.entry_dir(&key);
    fs::write(entry.join("kernel.cubin"), b"KCBN\0").unwrap();
    assert_eq!(disk.load(&key), None);

    fs::write(entry.join("meta.json"), b"{ not json").unwrap();
    assert_eq!(disk.load(&key), None);
}

#[test]
fn foreign_entry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskCache::new(dir.path());
    let (a, artifact) = add_artifact(64);
    let (b, _) = add_artifact(32);
    disk.store(&a, &artifact);

    // Pretend `b` hashed into `a`'s directory.
    fs::rename(disk.entry_dir(&a), disk.entry_dir(&b)).unwrap();
    assert_eq!(disk.load(&b), None);
}

#[test]
fn new_compiler_reuses_the_mirror() {
    let (dir, first) = compiler(true);
    let constants = Constants::new().with("BLOCK", 256).unwrap();
    let target = Target::rocm("gfx90a");
    let original = first.compile_for_target(&add_kernel(), "*fp32,*fp32,*fp32,i32", &constants, &target).unwrap();
    assert_eq!(first.cache().stats().compiles, 1);

    let second = crate::Compiler::new(first.config().clone());
    let reused = second.compile_for_target(&add_kernel(), "*fp32,*fp32,*fp32,i32", &constants, &target).unwrap();

    let stats = second.cache().stats();
    assert_eq!((stats.compiles, stats.disk_hits, stats.misses), (0, 1, 1));
    assert_eq!(reused.artifact(), original.artifact());
    assert_eq!(reused.asm(), original.asm());
    assert!(second.cache().disk().unwrap().root().starts_with(dir.path()));
}

#[test]
fn disabled_mirror_writes_nothing() {
    let (dir, compiler) = compiler(false);
    let constants = Constants::new().with("BLOCK", 256).unwrap();
    compiler.compile_for_target(&add_kernel(), "*fp32,*fp32,*fp32,i32", &constants, &Target::cuda(8, 0)).unwrap();

    assert!(compiler.cache().disk().is_none());
    assert!(!dir.path().join("artifacts").exists());
}
