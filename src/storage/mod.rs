//! Storage Module
//!
//! Page managers for the key file and the value file.
//!
//! ## Responsibilities
//! - Fixed-size page I/O addressed by byte offset
//! - Page allocation, free and reclaim
//! - Per-page CRC32 for corruption detection
//! - Recover bucket chain heads on open
//!
//! ## Page Formats
//! ```text
//! Key page
//! ┌─────────┬──────────┬───────────┬─────────────┬──────────┬──────────┬───────────┬──────┐
//! │ CRC (4) │Flags (4) │Bucket (4) │KeyLen(2)+(2)│ Prev (8) │ Next (8) │ Value (8) │ Key  │
//! └─────────┴──────────┴───────────┴─────────────┴──────────┴──────────┴───────────┴──────┘
//!
//! Value page
//! ┌─────────┬──────────┬─────────┬──────────────┬───────────┐
//! │ CRC (4) │Flags (4) │ Len (4) │ Reserved (4) │   Value   │
//! └─────────┴──────────┴─────────┴──────────────┴───────────┘
//! ```
//!
//! Pages are zero-padded to the page size. A page whose flags lack
//! `FLAG_IN_USE` is free.

mod key_file;
mod manager;
mod page;
mod paged_file;
mod value_file;

pub use key_file::KeyFile;
pub use manager::{KeyPageManager, ValuePageManager};
pub use page::{
    max_key_len, max_value_len, page_flags, KeyPage, KeyPageRef, ValuePage, ValuePageRef,
    FLAG_IN_USE, KEY_PAGE_HEADER_SIZE, NIL_OFFSET, VALUE_PAGE_HEADER_SIZE,
};
pub use paged_file::PagedFile;
pub use value_file::ValueFile;
