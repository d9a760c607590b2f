//! Undo Entries
//!
//! One recorded inverse of a physical page mutation. The page manager that
//! owns the target page travels with the entry as a closed variant, so
//! replay dispatches by `match` and offset writes can only ever name a key
//! page manager.

use std::fmt;

use crate::error::Result;
use crate::storage::{KeyPageManager, KeyPageRef, ValuePageManager, ValuePageRef};

/// Page manager that owns a page
#[derive(Clone, Copy)]
pub enum PageFile<'a> {
    Key(&'a dyn KeyPageManager),
    Value(&'a dyn ValuePageManager),
}

impl PageFile<'_> {
    /// Hand a page straight back to the owning manager's free set
    pub fn release_page(&self, offset: i64) -> Result<()> {
        match self {
            PageFile::Key(file) => file.release_page(offset),
            PageFile::Value(file) => file.release_page(offset),
        }
    }
}

/// Page manager plus the (optional) in-memory handle of the page it owns
#[derive(Clone)]
pub enum PageTarget<'a> {
    Key {
        file: &'a dyn KeyPageManager,
        page: Option<KeyPageRef>,
    },
    Value {
        file: &'a dyn ValuePageManager,
        page: Option<ValuePageRef>,
    },
}

/// Kind of an undo entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    WriteFlags,
    WriteNextOffset,
    WritePrevOffset,
    /// A page was freed; undone by reclaiming it
    FreePage,
    /// A page was allocated; undone by releasing it
    AllocPage,
}

/// A single reversible page mutation
pub enum UndoEntry<'a> {
    WriteFlags {
        target: PageTarget<'a>,
        page_offset: i64,
        flags: u32,
    },
    WriteNextOffset {
        file: &'a dyn KeyPageManager,
        page: Option<KeyPageRef>,
        page_offset: i64,
        offset: i64,
    },
    WritePrevOffset {
        file: &'a dyn KeyPageManager,
        page: Option<KeyPageRef>,
        page_offset: i64,
        offset: i64,
    },
    FreePage {
        file: PageFile<'a>,
        offset: i64,
    },
    AllocPage {
        file: PageFile<'a>,
        offset: i64,
    },
}

impl UndoEntry<'_> {
    pub fn kind(&self) -> UndoKind {
        match self {
            UndoEntry::WriteFlags { .. } => UndoKind::WriteFlags,
            UndoEntry::WriteNextOffset { .. } => UndoKind::WriteNextOffset,
            UndoEntry::WritePrevOffset { .. } => UndoKind::WritePrevOffset,
            UndoEntry::FreePage { .. } => UndoKind::FreePage,
            UndoEntry::AllocPage { .. } => UndoKind::AllocPage,
        }
    }

    /// Offset of the page the inverse write lands on
    pub fn page_offset(&self) -> i64 {
        match self {
            UndoEntry::WriteFlags { page_offset, .. }
            | UndoEntry::WriteNextOffset { page_offset, .. }
            | UndoEntry::WritePrevOffset { page_offset, .. } => *page_offset,
            UndoEntry::FreePage { offset, .. } | UndoEntry::AllocPage { offset, .. } => *offset,
        }
    }

    /// Perform the inverse write through the owning page manager
    pub(crate) fn apply(&self) -> Result<()> {
        match self {
            UndoEntry::WriteFlags {
                target,
                page_offset,
                flags,
            } => match target {
                PageTarget::Key { file, page } => {
                    let mut guard = page.as_ref().map(|page| page.lock());
                    file.write_flags(*page_offset, guard.as_deref_mut(), *flags)
                }
                PageTarget::Value { file, page } => {
                    let mut guard = page.as_ref().map(|page| page.lock());
                    file.write_flags(*page_offset, guard.as_deref_mut(), *flags)
                }
            },
            UndoEntry::WriteNextOffset {
                file,
                page,
                page_offset,
                offset,
            } => {
                let mut guard = page.as_ref().map(|page| page.lock());
                file.write_next_offset(*page_offset, guard.as_deref_mut(), *offset)
            }
            UndoEntry::WritePrevOffset {
                file,
                page,
                page_offset,
                offset,
            } => {
                let mut guard = page.as_ref().map(|page| page.lock());
                file.write_prev_offset(*page_offset, guard.as_deref_mut(), *offset)
            }
            UndoEntry::FreePage { file, offset } => match file {
                PageFile::Key(file) => file.reclaim_page(*offset),
                PageFile::Value(file) => file.reclaim_page(*offset),
            },
            UndoEntry::AllocPage { file, offset } => file.release_page(*offset),
        }
    }
}

impl fmt::Debug for UndoEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = match self {
            UndoEntry::WriteFlags {
                target: PageTarget::Key { .. },
                ..
            }
            | UndoEntry::WriteNextOffset { .. }
            | UndoEntry::WritePrevOffset { .. }
            | UndoEntry::FreePage {
                file: PageFile::Key(_),
                ..
            }
            | UndoEntry::AllocPage {
                file: PageFile::Key(_),
                ..
            } => "key",
            _ => "value",
        };

        f.debug_struct("UndoEntry")
            .field("kind", &self.kind())
            .field("file", &file)
            .field("page_offset", &self.page_offset())
            .finish()
    }
}
