//! Tests for bucket locking and the lock pool
//!
//! These tests verify:
//! - Locks attach on first use and return to the pool with the last holder
//! - Returned locks are reused by other buckets
//! - The pool grows when more buckets are locked than locks exist
//! - Readers share a bucket, writers exclude everyone, buckets are independent

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use hashkv::index::{HashDirectory, LockPool};
use hashkv::HashKvError;

fn assert_all_detached(dir: &HashDirectory) {
    for index in 0..dir.size() {
        assert_eq!(dir.attached_lock_id(index).unwrap(), None);
        assert_eq!(dir.lock_holders(index).unwrap(), 0);
    }
    assert_eq!(dir.pooled_locks(), dir.locks_created());
}

// =============================================================================
// Lock Pool Tests
// =============================================================================

#[test]
fn test_pool_checkout_and_checkin() {
    let mut pool = LockPool::with_capacity(2);
    assert_eq!(pool.available(), 2);

    let a = pool.checkout();
    let b = pool.checkout();
    assert_ne!(a.id(), b.id());
    assert_eq!(pool.available(), 0);

    let c = pool.checkout();
    assert_eq!(c.id(), 2);
    assert_eq!(pool.created(), 3);

    pool.checkin(a);
    pool.checkin(b);
    pool.checkin(c);
    assert_eq!(pool.available(), 3);
}

// =============================================================================
// Attach / Detach Tests
// =============================================================================

#[test]
fn test_read_lock_attaches_and_detaches() {
    let dir = HashDirectory::allocate(16, 1).unwrap();

    let guard = dir.read_lock(3).unwrap();
    assert_eq!(guard.index(), 3);
    assert_eq!(dir.attached_lock_id(3).unwrap(), Some(0));
    assert_eq!(dir.lock_holders(3).unwrap(), 1);
    assert_eq!(dir.pooled_locks(), 0);

    drop(guard);

    assert_all_detached(&dir);
    assert_eq!(dir.pooled_locks(), 1);
}

#[test]
fn test_released_lock_is_reused_by_another_bucket() {
    let dir = HashDirectory::allocate(16, 0).unwrap();

    let guard = dir.write_lock(3).unwrap();
    let first = dir.attached_lock_id(3).unwrap().unwrap();
    dir.write_unlock(guard).unwrap();

    let guard = dir.write_lock(9).unwrap();
    assert_eq!(dir.attached_lock_id(9).unwrap(), Some(first));
    assert_eq!(dir.locks_created(), 1);
    dir.write_unlock(guard).unwrap();

    assert_all_detached(&dir);
}

#[test]
fn test_pool_grows_on_demand() {
    let dir = HashDirectory::allocate(8, 1).unwrap();

    let guards: Vec<_> = (0..3).map(|i| dir.write_lock(i).unwrap()).collect();

    assert_eq!(dir.locks_created(), 3);
    let mut ids: Vec<usize> = (0..3)
        .map(|i| dir.attached_lock_id(i).unwrap().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    drop(guards);
    assert_all_detached(&dir);
    assert_eq!(dir.pooled_locks(), 3);
}

#[test]
fn test_readers_share_one_lock() {
    let dir = HashDirectory::allocate(4, 1).unwrap();

    let first = dir.read_lock(2).unwrap();
    let second = dir.read_lock(2).unwrap();
    assert_eq!(dir.lock_holders(2).unwrap(), 2);
    assert_eq!(dir.locks_created(), 1);

    dir.read_unlock(first).unwrap();
    assert_eq!(dir.lock_holders(2).unwrap(), 1);
    assert!(dir.attached_lock_id(2).unwrap().is_some());

    dir.read_unlock(second).unwrap();
    assert_all_detached(&dir);
}

#[test]
fn test_unlock_on_wrong_directory_is_rejected() {
    let one = HashDirectory::allocate(4, 1).unwrap();
    let other = HashDirectory::allocate(4, 1).unwrap();

    let guard = one.read_lock(1).unwrap();
    let err = other.read_unlock(guard).unwrap_err();

    assert!(matches!(err, HashKvError::Invariant(_)));
    // the guard was still dropped, against its own directory
    assert_all_detached(&one);
    assert_all_detached(&other);
}

#[test]
fn test_guard_released_on_early_return() {
    fn failing_operation(dir: &HashDirectory) -> hashkv::Result<()> {
        let _guard = dir.write_lock(1)?;
        Err(HashKvError::PageManager("write failed".into()))
    }

    let dir = HashDirectory::allocate(4, 1).unwrap();

    assert!(failing_operation(&dir).is_err());
    assert_all_detached(&dir);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_readers_run_concurrently() {
    const READERS: usize = 4;
    let dir = HashDirectory::allocate(4, 1).unwrap();
    let inside = Barrier::new(READERS);

    crossbeam::scope(|s| {
        for _ in 0..READERS {
            s.spawn(|_| {
                let _guard = dir.read_lock(0).unwrap();
                // every reader must be inside at once to get past this
                inside.wait();
            });
        }
    })
    .unwrap();

    assert_all_detached(&dir);
    assert_eq!(dir.locks_created(), 1);
}

#[test]
fn test_writers_are_exclusive() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 500;
    let dir = HashDirectory::allocate(4, 1).unwrap();
    let inside = AtomicUsize::new(0);
    let total = AtomicUsize::new(0);

    crossbeam::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|_| {
                for _ in 0..ITERATIONS {
                    let guard = dir.write_lock(2).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    dir.write_unlock(guard).unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(total.load(Ordering::Relaxed), THREADS * ITERATIONS);
    assert_all_detached(&dir);
}

#[test]
fn test_writer_blocks_reader() {
    let dir = HashDirectory::allocate(4, 1).unwrap();
    let locked = Barrier::new(2);
    let written = AtomicBool::new(false);

    crossbeam::scope(|s| {
        s.spawn(|_| {
            let _guard = dir.write_lock(1).unwrap();
            locked.wait();
            thread::sleep(Duration::from_millis(20));
            written.store(true, Ordering::SeqCst);
        });
        s.spawn(|_| {
            locked.wait();
            let _guard = dir.read_lock(1).unwrap();
            assert!(written.load(Ordering::SeqCst));
        });
    })
    .unwrap();

    assert_all_detached(&dir);
}

#[test]
fn test_different_buckets_do_not_block() {
    let dir = HashDirectory::allocate(4, 1).unwrap();
    let both_held = Barrier::new(2);

    crossbeam::scope(|s| {
        for bucket in [1, 2] {
            let dir = &dir;
            let both_held = &both_held;
            s.spawn(move |_| {
                let _guard = dir.write_lock(bucket).unwrap();
                // deadlocks if one bucket's writer excluded the other
                both_held.wait();
            });
        }
    })
    .unwrap();

    assert_eq!(dir.locks_created(), 2);
    assert_all_detached(&dir);
}

#[test]
fn test_many_buckets_share_small_pool() {
    const THREADS: usize = 8;
    let dir = HashDirectory::allocate(64, 2).unwrap();

    crossbeam::scope(|s| {
        for t in 0..THREADS {
            let dir = &dir;
            s.spawn(move |_| {
                for i in 0..1000usize {
                    let bucket = (i * 7 + t * 13) % 64;
                    if i % 3 == 0 {
                        let _guard = dir.write_lock(bucket).unwrap();
                    } else {
                        let _guard = dir.read_lock(bucket).unwrap();
                    }
                }
            });
        }
    })
    .unwrap();

    assert_all_detached(&dir);
    assert!(dir.locks_created() <= THREADS.max(2));
}
