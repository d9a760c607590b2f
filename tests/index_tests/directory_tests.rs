//! Tests for HashDirectory chain bookkeeping
//!
//! These tests verify:
//! - Fresh buckets are empty with the sentinel offset
//! - Out-of-range indices are fatal invariant errors
//! - add_node/remove_node keep the head offset and both link directions in sync
//! - Stale node handles and removal from an empty chain are rejected
//! - free_chain drops materialised nodes but keeps the on-disk head offset

use hashkv::index::{ChainNode, HashDirectory, NodeId};
use hashkv::storage::{KeyPage, NIL_OFFSET};
use hashkv::HashKvError;

// =============================================================================
// Helper Functions
// =============================================================================

fn node(offset: i64) -> ChainNode {
    ChainNode::new(offset, KeyPage::new(3, offset.to_string().into_bytes(), -1).into_ref())
}

fn forward_offsets(dir: &HashDirectory, index: usize) -> Vec<i64> {
    dir.get_chain(index)
        .unwrap()
        .iter()
        .map(|(_, n)| n.offset())
        .collect()
}

fn backward_offsets(dir: &HashDirectory, index: usize) -> Vec<i64> {
    dir.get_chain_backward(index)
        .unwrap()
        .iter()
        .map(|(_, n)| n.offset())
        .collect()
}

fn assert_consistent(dir: &HashDirectory, index: usize) {
    let forward = forward_offsets(dir, index);
    let mut backward = backward_offsets(dir, index);
    backward.reverse();
    assert_eq!(forward, backward);

    let head = dir.head(index).unwrap();
    let tail = dir.tail(index).unwrap();
    assert_eq!(head.is_none(), tail.is_none());
    assert_eq!(head.is_none(), dir.get_offset(index).unwrap() == NIL_OFFSET);
    assert_eq!(dir.chain_len(index).unwrap(), forward.len());

    if let Some(first) = forward.first() {
        assert_eq!(dir.get_offset(index).unwrap(), *first);
    }
}

// =============================================================================
// Allocate Tests
// =============================================================================

#[test]
fn test_allocate_initializes_empty_buckets() {
    let dir = HashDirectory::allocate(16, 4).unwrap();

    assert_eq!(dir.size(), 16);
    for index in 0..16 {
        assert_eq!(dir.get_offset(index).unwrap(), NIL_OFFSET);
        assert!(dir.head(index).unwrap().is_none());
        assert!(dir.tail(index).unwrap().is_none());
        assert_eq!(dir.attached_lock_id(index).unwrap(), None);
    }
    assert_eq!(dir.pooled_locks(), 4);
}

#[test]
fn test_allocate_zero_buckets_fails() {
    let result = HashDirectory::allocate(0, 4);
    assert!(matches!(result, Err(HashKvError::Config(_))));
}

#[test]
fn test_out_of_range_index_is_fatal() {
    let dir = HashDirectory::allocate(16, 1).unwrap();

    let errors = vec![
        dir.get_offset(16).unwrap_err(),
        dir.set_offset(99, 0).unwrap_err(),
        dir.add_node(16, node(100)).unwrap_err(),
        dir.get_chain(16).unwrap_err(),
        dir.free_chain(16).unwrap_err(),
        dir.read_lock(16).err().unwrap(),
        dir.write_lock(usize::MAX).err().unwrap(),
    ];

    for err in errors {
        assert!(matches!(err, HashKvError::Invariant(_)));
        assert!(err.is_fatal());
    }
}

#[test]
fn test_set_and_get_offset() {
    let dir = HashDirectory::allocate(8, 1).unwrap();

    dir.set_offset(5, 4096).unwrap();

    assert_eq!(dir.get_offset(5).unwrap(), 4096);
    assert_eq!(dir.get_offset(4).unwrap(), NIL_OFFSET);
}

// =============================================================================
// Chain Tests
// =============================================================================

#[test]
fn test_three_nodes_then_remove_head() {
    let dir = HashDirectory::allocate(16, 1).unwrap();

    let first = dir.add_node(3, node(100)).unwrap();
    dir.add_node(3, node(200)).unwrap();
    dir.add_node(3, node(300)).unwrap();

    assert_eq!(dir.get_offset(3).unwrap(), 100);
    assert_eq!(forward_offsets(&dir, 3), vec![100, 200, 300]);

    let removed = dir.remove_node(3, first).unwrap();
    assert_eq!(removed.offset(), 100);

    assert_eq!(dir.get_offset(3).unwrap(), 200);
    assert_eq!(forward_offsets(&dir, 3), vec![200, 300]);
    assert_eq!(backward_offsets(&dir, 3), vec![300, 200]);
    assert_consistent(&dir, 3);
}

#[test]
fn test_remove_middle_and_tail() {
    let dir = HashDirectory::allocate(4, 1).unwrap();

    let ids: Vec<NodeId> = [10, 20, 30, 40]
        .iter()
        .map(|&offset| dir.add_node(1, node(offset)).unwrap())
        .collect();

    dir.remove_node(1, ids[1]).unwrap();
    assert_eq!(forward_offsets(&dir, 1), vec![10, 30, 40]);
    assert_consistent(&dir, 1);

    dir.remove_node(1, ids[3]).unwrap();
    assert_eq!(forward_offsets(&dir, 1), vec![10, 30]);
    assert_eq!(dir.get_offset(1).unwrap(), 10);
    assert_consistent(&dir, 1);
}

#[test]
fn test_remove_last_node_resets_offset() {
    let dir = HashDirectory::allocate(4, 1).unwrap();

    let id = dir.add_node(2, node(512)).unwrap();
    assert_eq!(dir.get_offset(2).unwrap(), 512);

    dir.remove_node(2, id).unwrap();

    assert_eq!(dir.get_offset(2).unwrap(), NIL_OFFSET);
    assert!(dir.head(2).unwrap().is_none());
    assert!(dir.tail(2).unwrap().is_none());
    assert_consistent(&dir, 2);
}

#[test]
fn test_remove_from_empty_chain_is_fatal() {
    let dir = HashDirectory::allocate(4, 1).unwrap();
    let id = dir.add_node(0, node(100)).unwrap();
    dir.remove_node(0, id).unwrap();

    let err = dir.remove_node(0, id).unwrap_err();

    assert!(matches!(err, HashKvError::Invariant(_)));
}

#[test]
fn test_stale_handle_is_rejected_after_slot_reuse() {
    let dir = HashDirectory::allocate(4, 1).unwrap();
    let old = dir.add_node(0, node(100)).unwrap();
    dir.add_node(0, node(200)).unwrap();
    dir.remove_node(0, old).unwrap();

    // reuses the vacated slot
    let fresh = dir.add_node(0, node(300)).unwrap();
    assert_ne!(old, fresh);

    let err = dir.remove_node(0, old).unwrap_err();
    assert!(matches!(err, HashKvError::Invariant(_)));
    assert_eq!(forward_offsets(&dir, 0), vec![200, 300]);
    assert_eq!(dir.node(0, fresh).unwrap().offset(), 300);
}

#[test]
fn test_buckets_are_independent() {
    let dir = HashDirectory::allocate(4, 1).unwrap();

    dir.add_node(0, node(100)).unwrap();
    dir.add_node(1, node(200)).unwrap();
    dir.add_node(0, node(300)).unwrap();

    assert_eq!(forward_offsets(&dir, 0), vec![100, 300]);
    assert_eq!(forward_offsets(&dir, 1), vec![200]);
    assert_eq!(dir.get_offset(2).unwrap(), NIL_OFFSET);
}

#[test]
fn test_mixed_sequence_keeps_links_consistent() {
    let dir = HashDirectory::allocate(2, 1).unwrap();
    let mut live: Vec<(NodeId, i64)> = Vec::new();

    // deterministic pseudo-random add/remove mix
    let mut state = 7u64;
    for step in 0..200i64 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        if live.is_empty() || (state >> 33) % 3 != 0 {
            let offset = (step + 1) * 64;
            let id = dir.add_node(1, node(offset)).unwrap();
            live.push((id, offset));
        } else {
            let victim = ((state >> 40) as usize) % live.len();
            let (id, offset) = live.remove(victim);
            assert_eq!(dir.remove_node(1, id).unwrap().offset(), offset);
        }

        assert_consistent(&dir, 1);
        let expected: Vec<i64> = live.iter().map(|(_, offset)| *offset).collect();
        assert_eq!(forward_offsets(&dir, 1), expected);
    }
}

// =============================================================================
// Free Chain Tests
// =============================================================================

#[test]
fn test_free_chain_keeps_head_offset() {
    let dir = HashDirectory::allocate(4, 1).unwrap();
    dir.add_node(3, node(100)).unwrap();
    dir.add_node(3, node(200)).unwrap();

    let released = dir.free_chain(3).unwrap();

    assert_eq!(released, 2);
    assert_eq!(dir.chain_len(3).unwrap(), 0);
    assert!(dir.get_chain(3).unwrap().is_empty());
    assert_eq!(dir.get_offset(3).unwrap(), 100);
}

#[test]
fn test_free_chain_on_empty_bucket() {
    let dir = HashDirectory::allocate(4, 1).unwrap();
    assert_eq!(dir.free_chain(0).unwrap(), 0);
}

#[test]
fn test_handles_from_freed_chain_are_stale() {
    let dir = HashDirectory::allocate(4, 1).unwrap();
    let id = dir.add_node(1, node(100)).unwrap();
    dir.free_chain(1).unwrap();

    assert!(matches!(dir.node(1, id), Err(HashKvError::Invariant(_))));
}
