//! Key File
//!
//! File-backed key page manager.

use std::path::Path;

use crate::error::Result;

use super::page::{KeyPage, NIL_OFFSET};
use super::{KeyPageManager, PagedFile};

/// Key pages stored in a single page file
pub struct KeyFile {
    pages: PagedFile,
}

impl KeyFile {
    /// Open or create a key file
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        Ok(Self {
            pages: PagedFile::open(path, page_size)?,
        })
    }

    /// Underlying page file (allocation statistics)
    pub fn pages(&self) -> &PagedFile {
        &self.pages
    }

    /// Apply `change` to the in-memory handle if given, else to a freshly
    /// read copy, then write the page back
    fn update(
        &self,
        offset: i64,
        page: Option<&mut KeyPage>,
        change: impl FnOnce(&mut KeyPage),
    ) -> Result<()> {
        match page {
            Some(page) => {
                change(page);
                self.write_page(offset, page)
            }
            None => {
                let mut page = self.read_page(offset)?;
                change(&mut page);
                self.write_page(offset, &page)
            }
        }
    }
}

impl KeyPageManager for KeyFile {
    fn page_size(&self) -> usize {
        self.pages.page_size()
    }

    fn read_page(&self, offset: i64) -> Result<KeyPage> {
        let raw = self.pages.read(offset)?;
        KeyPage::decode(&raw, offset)
    }

    fn write_page(&self, offset: i64, page: &KeyPage) -> Result<()> {
        let raw = page.encode(self.pages.page_size())?;
        self.pages.write(offset, &raw)
    }

    fn allocate_page(&self) -> Result<i64> {
        self.pages.allocate()
    }

    fn write_flags(&self, offset: i64, page: Option<&mut KeyPage>, flags: u32) -> Result<()> {
        self.update(offset, page, |page| page.flags = flags)
    }

    fn write_next_offset(&self, offset: i64, page: Option<&mut KeyPage>, next: i64) -> Result<()> {
        self.update(offset, page, |page| page.next = next)
    }

    fn write_prev_offset(&self, offset: i64, page: Option<&mut KeyPage>, prev: i64) -> Result<()> {
        self.update(offset, page, |page| page.prev = prev)
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

    fn chain_heads(&self) -> Result<Vec<(u32, i64)>> {
        let mut heads = Vec::new();
        for offset in self.pages.in_use_offsets() {
            let page = self.read_page(offset)?;
            if page.is_in_use() && page.prev == NIL_OFFSET {
                heads.push((page.bucket, offset));
            }
        }
        Ok(heads)
    }

    fn live_offsets(&self) -> Result<Vec<i64>> {
        Ok(self.pages.in_use_offsets())
    }

    fn sync(&self) -> Result<()> {
        self.pages.sync()
    }
}
