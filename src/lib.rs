//! # hashkv
//!
//! An embedded, disk-backed key-value store with:
//! - An in-memory hash directory over on-disk chains of key pages
//! - Per-bucket reader/writer locks drawn from a small reusable pool
//! - An undo log that makes every multi-page mutation all-or-nothing
//! - CRC32-checked fixed-size key and value pages
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Engine (get/set/remove)                  │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌────────────────────────┐       ┌──────────────────────┐
//!   │     HashDirectory      │       │     UnwindStack      │
//!   │ buckets + lock pool    │       │ (per operation)      │
//!   └───────────┬────────────┘       └──────────┬───────────┘
//!               │  chain heads                  │ inverse writes
//!               ▼                               ▼
//!   ┌─────────────────────────────────────────────────────────┐
//!   │          KeyFile (.kdb)          ValueFile (.vdb)        │
//!   └─────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod engine;
pub mod index;
pub mod meta;
pub mod storage;
pub mod unwind;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, SyncStrategy};
pub use engine::Engine;
pub use error::{HashKvError, Result};
pub use index::HashDirectory;
pub use unwind::UnwindStack;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of hashkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
