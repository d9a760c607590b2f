//! Hash Directory
//!
//! Bucket array mapping `hash(key) mod size` to the head of an on-disk key
//! page chain, with per-bucket reader/writer locking.
//!
//! ## Concurrency:
//! - `locks`: directory-wide mutex guarding only the attach/detach
//!   bookkeeping (which pooled lock belongs to which bucket, holder counts).
//!   It is never held while a caller waits for or holds a bucket lock.
//! - Bucket locks: acquired after the bookkeeping mutex is released; the
//!   returned guard detaches the lock on drop once no holder remains.
//! - `chain`: every bucket's chain state sits behind its own mutex so the
//!   directory is `Sync`; callers are still expected to hold the bucket lock
//!   around any sequence of chain operations.

use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, MutexGuard, RawRwLock, RwLock};

use crate::error::{HashKvError, Result};

use super::chain::{BucketChain, ChainNode, NodeId};
use super::lock_pool::{LockPool, PooledLock};

struct BucketEntry {
    chain: Mutex<BucketChain>,
}

/// A pooled lock attached to a bucket, with everyone holding or waiting on it
struct Attachment {
    lock: PooledLock,
    holders: usize,
}

struct LockTable {
    attached: Vec<Option<Attachment>>,
    pool: LockPool,
}

/// In-memory hash directory over on-disk key page chains
pub struct HashDirectory {
    buckets: Vec<BucketEntry>,
    locks: Mutex<LockTable>,
}

impl HashDirectory {
    /// Reserve `size` empty buckets and a pool of `lock_pool_size` locks
    ///
    /// Fails with `NoMemory` if the bucket array cannot be allocated.
    pub fn allocate(size: usize, lock_pool_size: usize) -> Result<Self> {
        if size == 0 {
            return Err(HashKvError::Config(
                "hash table size must be positive".into(),
            ));
        }

        let mut buckets = Vec::new();
        buckets.try_reserve_exact(size).map_err(|e| {
            HashKvError::NoMemory(format!("hash table of {} buckets: {}", size, e))
        })?;
        buckets.extend((0..size).map(|_| BucketEntry {
            chain: Mutex::new(BucketChain::new()),
        }));

        let mut attached = Vec::new();
        attached.try_reserve_exact(size).map_err(|e| {
            HashKvError::NoMemory(format!("lock table of {} buckets: {}", size, e))
        })?;
        attached.resize_with(size, || None);

        tracing::debug!(buckets = size, locks = lock_pool_size, "Allocated hash directory");

        Ok(Self {
            buckets,
            locks: Mutex::new(LockTable {
                attached,
                pool: LockPool::with_capacity(lock_pool_size),
            }),
        })
    }

    /// Number of buckets
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, index: usize) -> Result<&BucketEntry> {
        self.buckets.get(index).ok_or_else(|| {
            HashKvError::Invariant(format!(
                "out-of-bound hash table index ({}), range [0, {})",
                index,
                self.buckets.len()
            ))
        })
    }

    fn chain(&self, index: usize) -> Result<MutexGuard<'_, BucketChain>> {
        Ok(self.bucket(index)?.chain.lock())
    }

    // =========================================================================
    // Bucket Locking
    // =========================================================================

    /// Check out (or share) the bucket's lock and count one more holder
    fn attach(&self, index: usize) -> Arc<RwLock<()>> {
        let mut table = self.locks.lock();
        let LockTable { attached, pool } = &mut *table;

        let attachment = attached[index].get_or_insert_with(|| {
            let lock = pool.checkout();
            tracing::trace!(bucket = index, lock = lock.id(), "Attached bucket lock");
            Attachment { lock, holders: 0 }
        });
        attachment.holders += 1;
        Arc::clone(attachment.lock.rw())
    }

    /// Count one holder out; the last one returns the lock to the pool
    fn detach(&self, index: usize) {
        let mut table = self.locks.lock();
        let LockTable { attached, pool } = &mut *table;

        let last = match attached[index].as_mut() {
            Some(attachment) => {
                attachment.holders -= 1;
                attachment.holders == 0
            }
            None => {
                tracing::error!(bucket = index, "Unlock of a bucket with no attached lock");
                debug_assert!(false, "bucket {} unlocked with no attached lock", index);
                false
            }
        };

        if last {
            if let Some(attachment) = attached[index].take() {
                tracing::trace!(
                    bucket = index,
                    lock = attachment.lock.id(),
                    "Returned bucket lock to pool"
                );
                pool.checkin(attachment.lock);
            }
        }
    }

    /// Shared access to a bucket; released when the guard drops
    pub fn read_lock(&self, index: usize) -> Result<BucketReadGuard<'_>> {
        self.bucket(index)?;
        let rw = self.attach(index);
        let guard = rw.read_arc();
        Ok(BucketReadGuard {
            directory: self,
            index,
            guard: Some(guard),
        })
    }

    /// Exclusive access to a bucket; released when the guard drops
    pub fn write_lock(&self, index: usize) -> Result<BucketWriteGuard<'_>> {
        self.bucket(index)?;
        let rw = self.attach(index);
        let guard = rw.write_arc();
        Ok(BucketWriteGuard {
            directory: self,
            index,
            guard: Some(guard),
        })
    }

    pub fn read_unlock(&self, guard: BucketReadGuard<'_>) -> Result<()> {
        if !std::ptr::eq(guard.directory, self) {
            return Err(HashKvError::Invariant(format!(
                "read guard for bucket {} released on a different directory",
                guard.index
            )));
        }
        drop(guard);
        Ok(())
    }

    pub fn write_unlock(&self, guard: BucketWriteGuard<'_>) -> Result<()> {
        if !std::ptr::eq(guard.directory, self) {
            return Err(HashKvError::Invariant(format!(
                "write guard for bucket {} released on a different directory",
                guard.index
            )));
        }
        drop(guard);
        Ok(())
    }

    // =========================================================================
    // Chain Head and Nodes (caller holds the bucket lock)
    // =========================================================================

    /// Offset of the first key page in the bucket, or `NIL_OFFSET`
    pub fn get_offset(&self, index: usize) -> Result<i64> {
        Ok(self.chain(index)?.offset())
    }

    pub fn set_offset(&self, index: usize, offset: i64) -> Result<()> {
        self.chain(index)?.set_offset(offset);
        Ok(())
    }

    /// Append a node at the tail of the bucket's materialised chain
    pub fn add_node(&self, index: usize, node: ChainNode) -> Result<NodeId> {
        Ok(self.chain(index)?.push_back(node))
    }

    /// Unlink a node, moving the head offset if it was the first node
    pub fn remove_node(&self, index: usize, id: NodeId) -> Result<ChainNode> {
        self.chain(index)?.unlink(id)
    }

    pub fn node(&self, index: usize, id: NodeId) -> Result<ChainNode> {
        self.chain(index)?.node(id).cloned()
    }

    /// Materialised nodes, head to tail
    pub fn get_chain(&self, index: usize) -> Result<Vec<(NodeId, ChainNode)>> {
        self.chain(index)?.forward()
    }

    /// Materialised nodes, tail to head
    pub fn get_chain_backward(&self, index: usize) -> Result<Vec<(NodeId, ChainNode)>> {
        self.chain(index)?.backward()
    }

    /// Release the materialised nodes; returns how many were dropped
    pub fn free_chain(&self, index: usize) -> Result<usize> {
        Ok(self.chain(index)?.clear())
    }

    pub fn chain_len(&self, index: usize) -> Result<usize> {
        Ok(self.chain(index)?.len())
    }

    pub fn head(&self, index: usize) -> Result<Option<NodeId>> {
        Ok(self.chain(index)?.head())
    }

    pub fn tail(&self, index: usize) -> Result<Option<NodeId>> {
        Ok(self.chain(index)?.tail())
    }

    // =========================================================================
    // Lock Pool Introspection
    // =========================================================================

    /// Id of the pooled lock attached to the bucket, if any
    pub fn attached_lock_id(&self, index: usize) -> Result<Option<usize>> {
        self.bucket(index)?;
        let table = self.locks.lock();
        Ok(table.attached[index]
            .as_ref()
            .map(|attachment| attachment.lock.id()))
    }

    /// Threads holding or waiting on the bucket's lock
    pub fn lock_holders(&self, index: usize) -> Result<usize> {
        self.bucket(index)?;
        let table = self.locks.lock();
        Ok(table.attached[index]
            .as_ref()
            .map_or(0, |attachment| attachment.holders))
    }

    /// Detached locks waiting in the pool
    pub fn pooled_locks(&self) -> usize {
        self.locks.lock().pool.available()
    }

    /// Locks ever created for this directory
    pub fn locks_created(&self) -> usize {
        self.locks.lock().pool.created()
    }
}

/// Shared hold on one bucket
pub struct BucketReadGuard<'a> {
    directory: &'a HashDirectory,
    index: usize,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
}

impl BucketReadGuard<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for BucketReadGuard<'_> {
    fn drop(&mut self) {
        // release the lock before counting ourselves out
        drop(self.guard.take());
        self.directory.detach(self.index);
    }
}

/// Exclusive hold on one bucket
pub struct BucketWriteGuard<'a> {
    directory: &'a HashDirectory,
    index: usize,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl BucketWriteGuard<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for BucketWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.directory.detach(self.index);
    }
}
