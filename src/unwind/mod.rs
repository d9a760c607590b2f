//! Unwind Module
//!
//! In-memory undo log that makes multi-page mutations atomic.
//!
//! ## Responsibilities
//! - Record the inverse of every physical page mutation of one operation
//! - Discard the record on success
//! - Replay it newest first on failure, through the page manager that owns
//!   each page
//!
//! ## Example
//! ```text
//!   operation                         stack (top last)
//!   ─────────────────────────────     ─────────────────────────────
//!   kf.write_flags(p, 0)        ──►   WriteFlags(p, 0x01)
//!   kf.free_page(p)             ──►   WriteFlags(p, 0x01), FreePage(p)
//!   ... failure ...
//!   unwind: reclaim(p), then write_flags(p, 0x01)
//!
//!   commit: the caller releases p once nothing can unwind the free
//! ```

mod entry;
mod stack;

pub use entry::{PageFile, PageTarget, UndoEntry, UndoKind};
pub use stack::UnwindStack;
