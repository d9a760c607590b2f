//! Index Module
//!
//! In-memory hash directory over on-disk key page chains.
//!
//! ## Responsibilities
//! - Map a bucket index to the head offset of its key page chain
//! - Per-bucket shared/exclusive locking from a small reusable lock pool
//! - Hold the chain nodes a write operation materialises
//!
//! ## Layout
//! ```text
//!  bucket   offset   materialised chain
//!  ┌────┐
//!  │ 0  │   -1
//!  ├────┤
//!  │ 1  │   8192 ──► [8192] ⇄ [4096] ⇄ [16384]
//!  ├────┤
//!  │ .. │
//!  └────┘
//!                    lock pool: [L0] [L1] ... (attached on demand)
//! ```

mod chain;
mod directory;
mod lock_pool;

pub use chain::{ChainNode, NodeId};
pub use directory::{BucketReadGuard, BucketWriteGuard, HashDirectory};
pub use lock_pool::{LockPool, PooledLock};
