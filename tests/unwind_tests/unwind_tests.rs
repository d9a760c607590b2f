//! Tests for UnwindStack
//!
//! These tests verify:
//! - Commit and successful unwind never touch a page manager
//! - Failed unwind replays every entry exactly once, newest first
//! - Replay dispatches to the right page manager per entry
//! - In-memory page handles are restored along with the disk page
//! - A failing inverse write surfaces as a fatal error

#[path = "../common/mod.rs"]
mod common;

use common::{journal, Call, MockKeys, MockValues};
use hashkv::storage::{KeyPage, ValuePage, FLAG_IN_USE};
use hashkv::unwind::{PageFile, PageTarget, UndoKind, UnwindStack};
use hashkv::HashKvError;

fn failure() -> hashkv::Result<()> {
    Err(HashKvError::PageManager("operation failed".into()))
}

// =============================================================================
// Discard Tests
// =============================================================================

#[test]
fn test_commit_empty_stack_is_noop() {
    let journal = journal();
    let stack = UnwindStack::new();
    assert!(stack.is_empty());

    stack.commit();

    assert!(journal.lock().is_empty());
}

#[test]
fn test_commit_discards_entries() {
    let journal = journal();
    let keys = MockKeys::new(journal.clone());
    let values = MockValues::new(journal.clone());

    let mut stack = UnwindStack::new();
    stack.record_flag_write(PageTarget::Key { file: &keys, page: None }, 100, 0x01);
    stack.record_next_offset_write(&keys, None, 100, 200);
    stack.record_page_free(PageFile::Value(&values), 300);
    assert_eq!(stack.len(), 3);

    stack.commit();

    assert!(journal.lock().is_empty());
}

#[test]
fn test_unwind_success_discards_entries() {
    let journal = journal();
    let keys = MockKeys::new(journal.clone());

    let mut stack = UnwindStack::new();
    stack.record_prev_offset_write(&keys, None, 100, -1);
    stack.record_page_alloc(PageFile::Key(&keys), 100);

    let result = stack.unwind(Ok(42));

    assert_eq!(result.unwrap(), 42);
    assert!(journal.lock().is_empty());
}

#[test]
fn test_unwind_failure_on_empty_stack_returns_error() {
    let stack = UnwindStack::new();

    let result = stack.unwind(failure());

    let err = result.unwrap_err();
    assert!(matches!(err, HashKvError::PageManager(_)));
    assert!(!err.is_fatal());
}

// =============================================================================
// Replay Order Tests
// =============================================================================

#[test]
fn test_unwind_failure_replays_in_reverse_order() {
    let journal = journal();
    let keys = MockKeys::new(journal.clone());
    let values = MockValues::new(journal.clone());

    let mut stack = UnwindStack::new();
    stack.record_flag_write(PageTarget::Key { file: &keys, page: None }, 100, 0x01);
    stack.record_next_offset_write(&keys, None, 100, 200);
    stack.record_prev_offset_write(&keys, None, 200, 100);
    stack.record_flag_write(PageTarget::Value { file: &values, page: None }, 700, 0x01);
    stack.record_page_free(PageFile::Value(&values), 700);
    stack.record_page_alloc(PageFile::Key(&keys), 900);
    let n = stack.len();

    let result = stack.unwind(failure());
    assert!(matches!(result, Err(HashKvError::PageManager(_))));

    let calls = journal.lock().clone();
    assert_eq!(calls.len(), n);
    assert_eq!(
        calls,
        vec![
            Call::Release { file: "key", offset: 900 },
            Call::Reclaim { file: "value", offset: 700 },
            Call::WriteFlags { file: "value", offset: 700, flags: 0x01 },
            Call::WritePrev { offset: 200, prev: 100 },
            Call::WriteNext { offset: 100, next: 200 },
            Call::WriteFlags { file: "key", offset: 100, flags: 0x01 },
        ]
    );
}

#[test]
fn test_flags_then_free_unwinds_free_first() {
    let journal = journal();
    let keys = MockKeys::new(journal.clone());

    let mut stack = UnwindStack::new();
    stack.record_flag_write(PageTarget::Key { file: &keys, page: None }, 500, 0x01);
    stack.record_page_free(PageFile::Key(&keys), 500);

    let _ = stack.unwind(failure());

    assert_eq!(
        journal.lock().clone(),
        vec![
            Call::Reclaim { file: "key", offset: 500 },
            Call::WriteFlags { file: "key", offset: 500, flags: 0x01 },
        ]
    );
}

#[test]
fn test_entries_report_kinds_in_insertion_order() {
    let journal = journal();
    let keys = MockKeys::new(journal.clone());
    let values = MockValues::new(journal);

    let mut stack = UnwindStack::new();
    stack.record_page_alloc(PageFile::Value(&values), 0);
    stack.record_flag_write(PageTarget::Value { file: &values, page: None }, 0, 0);
    stack.record_next_offset_write(&keys, None, 256, -1);
    stack.record_page_free(PageFile::Key(&keys), 512);

    let kinds: Vec<UndoKind> = stack.entries().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            UndoKind::AllocPage,
            UndoKind::WriteFlags,
            UndoKind::WriteNextOffset,
            UndoKind::FreePage,
        ]
    );
    assert_eq!(stack.entries()[3].page_offset(), 512);

    stack.commit();
}

// =============================================================================
// Page Handle Tests
// =============================================================================

#[test]
fn test_unwind_restores_in_memory_key_page() {
    let journal = journal();
    let keys = MockKeys::new(journal);

    let page = KeyPage::new(3, b"k".to_vec(), 0).into_ref();
    {
        let mut guard = page.lock();
        guard.next = 400;
        guard.prev = 50;
        guard.flags = 0;
    }

    let mut stack = UnwindStack::new();
    stack.record_next_offset_write(&keys, Some(page.clone()), 100, -1);
    stack.record_prev_offset_write(&keys, Some(page.clone()), 100, -1);
    stack.record_flag_write(
        PageTarget::Key {
            file: &keys,
            page: Some(page.clone()),
        },
        100,
        FLAG_IN_USE,
    );

    let _ = stack.unwind(failure());

    let guard = page.lock();
    assert_eq!(guard.next, -1);
    assert_eq!(guard.prev, -1);
    assert_eq!(guard.flags, FLAG_IN_USE);
}

#[test]
fn test_unwind_restores_in_memory_value_page() {
    let journal = journal();
    let values = MockValues::new(journal);

    let page = ValuePage::new(b"v".to_vec()).into_ref();
    page.lock().flags = 0;

    let mut stack = UnwindStack::new();
    stack.record_flag_write(
        PageTarget::Value {
            file: &values,
            page: Some(page.clone()),
        },
        64,
        FLAG_IN_USE,
    );

    let _ = stack.unwind(failure());

    assert!(page.lock().is_in_use());
}

// =============================================================================
// Fatal Replay Failure Tests
// =============================================================================

#[test]
fn test_failed_inverse_write_is_fatal() {
    let journal = journal();
    let keys = MockKeys::new(journal.clone());
    let values = MockValues::new(journal.clone());

    let mut stack = UnwindStack::new();
    stack.record_next_offset_write(&keys, None, 100, 200);
    stack.record_page_free(PageFile::Value(&values), 700);
    stack.record_page_alloc(PageFile::Key(&keys), 900);

    values.fail_from_now();
    let err = stack.unwind(failure()).unwrap_err();

    assert!(err.is_fatal());
    match err {
        HashKvError::UnwindFailed { kind, offset, .. } => {
            assert_eq!(kind, UndoKind::FreePage);
            assert_eq!(offset, 700);
        }
        other => panic!("expected UnwindFailed, got {:?}", other),
    }

    // replay stops at the failing entry
    assert_eq!(
        journal.lock().clone(),
        vec![Call::Release { file: "key", offset: 900 }]
    );
}
