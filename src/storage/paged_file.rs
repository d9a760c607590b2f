//! Paged File
//!
//! Logic shared by the key and value page managers: bounds-checked
//! positional page I/O and the in-memory free set used for allocation.
//!
//! A page moves through three allocation states:
//! ```text
//!   allocate()            free()              release()
//!  free ────────► in use ────────► retired ─────────► free
//!                   ▲                 │
//!                   └─── reclaim() ───┘
//! ```
//! A retired page is not handed out again until `release()`, so an
//! operation that freed it can still take it back while it is unwinding.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{HashKvError, Result};

use super::page::{page_flags, FLAG_IN_USE};

/// Allocation state: end of file, pages available for reuse and pages freed
/// by operations that have not committed yet
struct Allocation {
    end: i64,
    free: BTreeSet<i64>,
    retired: BTreeSet<i64>,
}

/// A file of fixed-size pages addressed by byte offset
///
/// ## Concurrency:
/// - `file`: one positioned read/write at a time
/// - `alloc`: guards the free set and file end; always taken before `file`
///   when both are needed
pub struct PagedFile {
    path: PathBuf,
    page_size: usize,
    file: Mutex<File>,
    alloc: Mutex<Allocation>,
}

impl PagedFile {
    /// Open or create a page file
    ///
    /// Rebuilds the free set by scanning the flags word of every page.
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(HashKvError::Corruption(format!(
                "{} is {} bytes, not a multiple of the page size {}",
                path.display(),
                len,
                page_size
            )));
        }

        let mut free = BTreeSet::new();
        let mut header = [0u8; 8];
        for offset in (0..len).step_by(page_size) {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut header)?;
            if page_flags(&header) & FLAG_IN_USE == 0 {
                free.insert(offset as i64);
            }
        }

        tracing::debug!(
            path = %path.display(),
            pages = len / page_size as u64,
            free = free.len(),
            "Opened page file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            file: Mutex::new(file),
            alloc: Mutex::new(Allocation {
                end: len as i64,
                free,
                retired: BTreeSet::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Total pages in the file, free or not
    pub fn page_count(&self) -> u64 {
        (self.alloc.lock().end / self.page_size as i64) as u64
    }

    /// Pages available for reuse
    pub fn free_count(&self) -> usize {
        self.alloc.lock().free.len()
    }

    /// Pages freed but not yet released
    pub fn retired_count(&self) -> usize {
        self.alloc.lock().retired.len()
    }

    pub fn is_free(&self, offset: i64) -> bool {
        self.alloc.lock().free.contains(&offset)
    }

    pub fn is_retired(&self, offset: i64) -> bool {
        self.alloc.lock().retired.contains(&offset)
    }

    /// Offsets of all pages neither free nor retired, in file order
    pub fn in_use_offsets(&self) -> Vec<i64> {
        let alloc = self.alloc.lock();
        (0..alloc.end)
            .step_by(self.page_size)
            .filter(|offset| !alloc.free.contains(offset) && !alloc.retired.contains(offset))
            .collect()
    }

    fn check_offset(&self, offset: i64, end: i64) -> Result<()> {
        if offset < 0 || offset >= end || offset % self.page_size as i64 != 0 {
            return Err(HashKvError::InvalidOffset(offset));
        }
        Ok(())
    }

    /// Read the raw page at `offset`
    pub fn read(&self, offset: i64) -> Result<Vec<u8>> {
        let end = self.alloc.lock().end;
        self.check_offset(offset, end)?;

        let mut buf = vec![0u8; self.page_size];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrite the page at `offset` with exactly one page of bytes
    pub fn write(&self, offset: i64, page: &[u8]) -> Result<()> {
        let end = self.alloc.lock().end;
        self.check_offset(offset, end)?;

        if page.len() != self.page_size {
            return Err(HashKvError::Invariant(format!(
                "page write of {} bytes, page size is {}",
                page.len(),
                self.page_size
            )));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(page)?;
        Ok(())
    }

    /// Hand out a page: the lowest free page, else a new zeroed page at the end
    pub fn allocate(&self) -> Result<i64> {
        let mut alloc = self.alloc.lock();

        if let Some(offset) = alloc.free.pop_first() {
            tracing::trace!(path = %self.path.display(), offset, "Reusing free page");
            return Ok(offset);
        }

        let offset = alloc.end;
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset as u64))?;
            file.write_all(&vec![0u8; self.page_size])?;
        }
        alloc.end += self.page_size as i64;

        tracing::trace!(path = %self.path.display(), offset, "Extended page file");
        Ok(offset)
    }

    /// Retire an in-use page; it is not reused until `release`
    pub fn free(&self, offset: i64) -> Result<()> {
        let mut alloc = self.alloc.lock();
        self.check_offset(offset, alloc.end)?;

        if alloc.free.contains(&offset) || !alloc.retired.insert(offset) {
            return Err(HashKvError::Invariant(format!(
                "page {} in {} is already free",
                offset,
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Take a retired page back into use
    pub fn reclaim(&self, offset: i64) -> Result<()> {
        let mut alloc = self.alloc.lock();
        self.check_offset(offset, alloc.end)?;

        if !alloc.retired.remove(&offset) {
            return Err(HashKvError::Invariant(format!(
                "page {} in {} is not retired",
                offset,
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Make a retired or in-use page available to `allocate`
    pub fn release(&self, offset: i64) -> Result<()> {
        let mut alloc = self.alloc.lock();
        self.check_offset(offset, alloc.end)?;

        if alloc.free.contains(&offset) {
            return Err(HashKvError::Invariant(format!(
                "page {} in {} is already free",
                offset,
                self.path.display()
            )));
        }
        alloc.retired.remove(&offset);
        alloc.free.insert(offset);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}
