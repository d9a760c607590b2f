//! Page Manager Contracts
//!
//! The interface the hash directory, the undo log and the engine consume
//! from the key-page and value-page managers.
//!
//! Every `write_*` entry point takes an optional in-memory page handle. When
//! one is given it is updated together with the disk page, so a caller that
//! materialised the page keeps an accurate view of it.

use crate::error::Result;

use super::page::{KeyPage, ValuePage};

/// Manager of the key page file
pub trait KeyPageManager: Send + Sync {
    fn page_size(&self) -> usize;

    fn read_page(&self, offset: i64) -> Result<KeyPage>;

    /// Write a whole page (used for freshly allocated pages)
    fn write_page(&self, offset: i64, page: &KeyPage) -> Result<()>;

    fn allocate_page(&self) -> Result<i64>;

    fn write_flags(&self, offset: i64, page: Option<&mut KeyPage>, flags: u32) -> Result<()>;

    fn write_next_offset(&self, offset: i64, page: Option<&mut KeyPage>, next: i64) -> Result<()>;

    fn write_prev_offset(&self, offset: i64, page: Option<&mut KeyPage>, prev: i64) -> Result<()>;

    /// Retire a page; its content is left untouched and it is not handed
    /// out again until `release_page`
    fn free_page(&self, offset: i64) -> Result<()>;

    /// Undo a `free_page` that has not been released
    fn reclaim_page(&self, offset: i64) -> Result<()>;

    /// Make a retired (or never published) page available for reuse
    fn release_page(&self, offset: i64) -> Result<()>;

    /// `(bucket, offset)` of every in-use key page with no predecessor
    fn chain_heads(&self) -> Result<Vec<(u32, i64)>>;

    /// Offsets of every page currently in use
    fn live_offsets(&self) -> Result<Vec<i64>>;

    fn sync(&self) -> Result<()>;
}

/// Manager of the value page file
pub trait ValuePageManager: Send + Sync {
    fn page_size(&self) -> usize;

    fn read_page(&self, offset: i64) -> Result<ValuePage>;

    fn write_page(&self, offset: i64, page: &ValuePage) -> Result<()>;

    fn allocate_page(&self) -> Result<i64>;

    fn write_flags(&self, offset: i64, page: Option<&mut ValuePage>, flags: u32) -> Result<()>;

    fn free_page(&self, offset: i64) -> Result<()>;

    fn reclaim_page(&self, offset: i64) -> Result<()>;

    fn release_page(&self, offset: i64) -> Result<()>;

    fn live_offsets(&self) -> Result<Vec<i64>>;

    fn sync(&self) -> Result<()>;
}
