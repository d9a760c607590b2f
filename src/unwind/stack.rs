//! Unwind Stack
//!
//! Per-operation log of compensating actions.

use crate::error::{HashKvError, Result};
use crate::storage::{KeyPageManager, KeyPageRef};

use super::entry::{PageFile, PageTarget, UndoEntry};

/// Undo records for one logical operation
///
/// Record each mutation right after it has been applied, with the value it
/// overwrote. The stack then ends in exactly one of two ways, both of which
/// consume it:
/// - `commit()` (or `unwind(Ok(..))`) discards every entry
/// - `unwind(Err(..))` replays the entries newest first, then discards them
///
/// A stack dropped without either is discarded like a commit.
#[derive(Debug, Default)]
pub struct UnwindStack<'a> {
    entries: Vec<UndoEntry<'a>>,
}

impl<'a> UnwindStack<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending entries, oldest first
    pub fn entries(&self) -> &[UndoEntry<'a>] {
        &self.entries
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// The page's flags were just overwritten; `previous_flags` restores them
    pub fn record_flag_write(
        &mut self,
        target: PageTarget<'a>,
        page_offset: i64,
        previous_flags: u32,
    ) {
        self.entries.push(UndoEntry::WriteFlags {
            target,
            page_offset,
            flags: previous_flags,
        });
    }

    /// The key page's next link was just overwritten
    pub fn record_next_offset_write(
        &mut self,
        file: &'a dyn KeyPageManager,
        page: Option<KeyPageRef>,
        page_offset: i64,
        previous_next: i64,
    ) {
        self.entries.push(UndoEntry::WriteNextOffset {
            file,
            page,
            page_offset,
            offset: previous_next,
        });
    }

    /// The key page's prev link was just overwritten
    pub fn record_prev_offset_write(
        &mut self,
        file: &'a dyn KeyPageManager,
        page: Option<KeyPageRef>,
        page_offset: i64,
        previous_prev: i64,
    ) {
        self.entries.push(UndoEntry::WritePrevOffset {
            file,
            page,
            page_offset,
            offset: previous_prev,
        });
    }

    /// The page was just freed; undone by reclaiming it
    pub fn record_page_free(&mut self, file: PageFile<'a>, freed_offset: i64) {
        self.entries.push(UndoEntry::FreePage {
            file,
            offset: freed_offset,
        });
    }

    /// The page was just allocated; undone by releasing it to the free set
    pub fn record_page_alloc(&mut self, file: PageFile<'a>, allocated_offset: i64) {
        self.entries.push(UndoEntry::AllocPage {
            file,
            offset: allocated_offset,
        });
    }

    // =========================================================================
    // Terminal Actions
    // =========================================================================

    /// Discard every entry without touching any page
    pub fn commit(mut self) {
        self.entries.clear();
    }

    /// Commit on success; otherwise replay newest first and hand back the
    /// original failure
    ///
    /// A replayed write that fails stops the replay and is returned as the
    /// fatal `UnwindFailed`: the pages may now disagree with each other and
    /// with the directory.
    pub fn unwind<T>(mut self, status: Result<T>) -> Result<T> {
        match status {
            Ok(value) => {
                self.entries.clear();
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(
                    entries = self.entries.len(),
                    error = %err,
                    "Unwinding failed operation"
                );
                self.execute()?;
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> Result<()> {
        while let Some(entry) = self.entries.pop() {
            if let Err(source) = entry.apply() {
                let remaining = self.entries.len();
                self.entries.clear();
                tracing::error!(
                    kind = ?entry.kind(),
                    offset = entry.page_offset(),
                    remaining,
                    error = %source,
                    "Failed to unwind page mutation"
                );
                return Err(HashKvError::UnwindFailed {
                    kind: entry.kind(),
                    offset: entry.page_offset(),
                    source: Box::new(source),
                });
            }
        }
        Ok(())
    }
}

impl Drop for UnwindStack<'_> {
    fn drop(&mut self) {
        if !self.entries.is_empty() && !std::thread::panicking() {
            tracing::warn!(
                entries = self.entries.len(),
                "Unwind stack dropped without commit or unwind; discarding"
            );
        }
    }
}
