//! Value File
//!
//! File-backed value page manager.

use std::path::Path;

use crate::error::Result;

use super::page::ValuePage;
use super::{PagedFile, ValuePageManager};

/// Value pages stored in a single page file
pub struct ValueFile {
    pages: PagedFile,
}

impl ValueFile {
    /// Open or create a value file
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        Ok(Self {
            pages: PagedFile::open(path, page_size)?,
        })
    }

    pub fn pages(&self) -> &PagedFile {
        &self.pages
    }
}

impl ValuePageManager for ValueFile {
    fn page_size(&self) -> usize {
        self.pages.page_size()
    }

    fn read_page(&self, offset: i64) -> Result<ValuePage> {
        let raw = self.pages.read(offset)?;
        ValuePage::decode(&raw, offset)
    }

    fn write_page(&self, offset: i64, page: &ValuePage) -> Result<()> {
        let raw = page.encode(self.pages.page_size())?;
        self.pages.write(offset, &raw)
    }

    fn allocate_page(&self) -> Result<i64> {
        self.pages.allocate()
    }

    fn write_flags(&self, offset: i64, page: Option<&mut ValuePage>, flags: u32) -> Result<()> {
        match page {
            Some(page) => {
                page.flags = flags;
                self.write_page(offset, page)
            }
            None => {
                let mut page = self.read_page(offset)?;
                page.flags = flags;
                self.write_page(offset, &page)
            }
        }
    }

    fn free_page(&self, offset: i64) -> Result<()> {
        self.pages.free(offset)
    }

    fn reclaim_page(&self, offset: i64) -> Result<()> {
        self.pages.reclaim(offset)
    }

    fn release_page(&self, offset: i64) -> Result<()> {
        self.pages.release(offset)
    }

    fn live_offsets(&self) -> Result<Vec<i64>> {
        Ok(self.pages.in_use_offsets())
    }

    fn sync(&self) -> Result<()> {
        self.pages.sync()
    }
}
