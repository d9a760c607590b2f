//! Bucket Lock Pool
//!
//! Reusable reader/writer locks shared by all buckets of a directory. A
//! bucket checks a lock out on first use and hands it back when its last
//! holder lets go, so a directory with many buckets only ever needs as many
//! lock objects as there are concurrently locked buckets.

use std::sync::Arc;

use parking_lot::RwLock;

/// A reader/writer lock that can be attached to any one bucket at a time
#[derive(Debug)]
pub struct PooledLock {
    id: usize,
    rw: Arc<RwLock<()>>,
}

impl PooledLock {
    fn new(id: usize) -> Self {
        Self {
            id,
            rw: Arc::new(RwLock::new(())),
        }
    }

    /// Identity of this lock object within its pool
    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn rw(&self) -> &Arc<RwLock<()>> {
        &self.rw
    }
}

/// Free set of detached locks; grows on demand
#[derive(Debug)]
pub struct LockPool {
    free: Vec<PooledLock>,
    created: usize,
}

impl LockPool {
    /// Pool with `capacity` locks created up front
    pub fn with_capacity(capacity: usize) -> Self {
        let free = (0..capacity).rev().map(PooledLock::new).collect();
        Self {
            free,
            created: capacity,
        }
    }

    /// Take a detached lock, creating one if the pool is empty
    pub fn checkout(&mut self) -> PooledLock {
        match self.free.pop() {
            Some(lock) => lock,
            None => {
                let lock = PooledLock::new(self.created);
                self.created += 1;
                tracing::trace!(id = lock.id, "Grew bucket lock pool");
                lock
            }
        }
    }

    /// Return a lock no bucket holds any more
    pub fn checkin(&mut self, lock: PooledLock) {
        debug_assert!(
            Arc::strong_count(&lock.rw) == 1,
            "lock {} returned while still referenced",
            lock.id
        );
        self.free.push(lock);
    }

    /// Locks currently waiting in the pool
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Locks ever created by this pool
    pub fn created(&self) -> usize {
        self.created
    }
}
