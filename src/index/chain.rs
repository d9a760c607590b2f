//! Bucket Chains
//!
//! The in-memory, doubly-linked list of key-page nodes materialised for one
//! bucket. Nodes live in a per-bucket slab and are addressed by
//! generation-checked handles, so unlinking a node can never leave another
//! handle pointing at a reused slot.

use crate::error::{HashKvError, Result};
use crate::storage::{KeyPageRef, NIL_OFFSET};

/// Stable handle to a node within one bucket's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    slot: u32,
    generation: u32,
}

/// A materialised key page, identified by its file offset
#[derive(Debug, Clone)]
pub struct ChainNode {
    offset: i64,
    page: KeyPageRef,
}

impl ChainNode {
    pub fn new(offset: i64, page: KeyPageRef) -> Self {
        Self { offset, page }
    }

    /// File offset of the key page
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Shared in-memory page
    pub fn page(&self) -> &KeyPageRef {
        &self.page
    }
}

struct Link {
    node: ChainNode,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

struct Slot {
    generation: u32,
    link: Option<Link>,
}

/// Chain state of one bucket: head offset plus the materialised nodes
pub(crate) struct BucketChain {
    offset: i64,
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl BucketChain {
    pub(crate) fn new() -> Self {
        Self {
            offset: NIL_OFFSET,
            slots: Vec::new(),
            vacant: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn offset(&self) -> i64 {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: i64) {
        self.offset = offset;
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub(crate) fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    fn link(&self, id: NodeId) -> Result<&Link> {
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.link.as_ref())
            .ok_or_else(|| HashKvError::Invariant(format!("stale chain node handle {:?}", id)))
    }

    fn link_mut(&mut self, id: NodeId) -> Result<&mut Link> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.link.as_mut())
            .ok_or_else(|| HashKvError::Invariant(format!("stale chain node handle {:?}", id)))
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&ChainNode> {
        self.link(id).map(|link| &link.node)
    }

    /// Append at the tail; an empty chain takes the node's offset as its head
    pub(crate) fn push_back(&mut self, node: ChainNode) -> NodeId {
        let link = Link {
            node,
            prev: self.tail,
            next: None,
        };

        let id = match self.vacant.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.link = Some(link);
                NodeId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    link: Some(link),
                });
                NodeId {
                    slot: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        match self.tail {
            Some(tail) => {
                if let Some(slot) = self.slots.get_mut(tail.slot as usize) {
                    if let Some(tail_link) = slot.link.as_mut() {
                        tail_link.next = Some(id);
                    }
                }
            }
            None => {
                self.head = Some(id);
                if let Some(link) = self.slots[id.slot as usize].link.as_ref() {
                    self.offset = link.node.offset;
                }
            }
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    /// Splice a node out; removing the head moves the head offset along
    pub(crate) fn unlink(&mut self, id: NodeId) -> Result<ChainNode> {
        if self.head.is_none() || self.tail.is_none() {
            return Err(HashKvError::Invariant("key page list is empty".into()));
        }

        let (prev, next) = {
            let link = self.link(id)?;
            (link.prev, link.next)
        };

        match prev {
            Some(prev) => self.link_mut(prev)?.next = next,
            None => {
                self.head = next;
                self.offset = match next {
                    Some(next) => self.link(next)?.node.offset,
                    None => NIL_OFFSET,
                };
            }
        }

        match next {
            Some(next) => self.link_mut(next)?.prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[id.slot as usize];
        let link = slot
            .link
            .take()
            .ok_or_else(|| HashKvError::Invariant(format!("stale chain node handle {:?}", id)))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.slot);
        self.len -= 1;

        Ok(link.node)
    }

    /// Nodes from head to tail
    pub(crate) fn forward(&self) -> Result<Vec<(NodeId, ChainNode)>> {
        let mut nodes = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let link = self.link(id)?;
            nodes.push((id, link.node.clone()));
            cursor = link.next;
            if nodes.len() > self.len {
                return Err(HashKvError::Invariant("cycle in forward chain links".into()));
            }
        }
        Ok(nodes)
    }

    /// Nodes from tail to head
    pub(crate) fn backward(&self) -> Result<Vec<(NodeId, ChainNode)>> {
        let mut nodes = Vec::with_capacity(self.len);
        let mut cursor = self.tail;
        while let Some(id) = cursor {
            let link = self.link(id)?;
            nodes.push((id, link.node.clone()));
            cursor = link.prev;
            if nodes.len() > self.len {
                return Err(HashKvError::Invariant("cycle in backward chain links".into()));
            }
        }
        Ok(nodes)
    }

    /// Drop every materialised node; the head offset is left as is since
    /// the chain still exists on disk
    pub(crate) fn clear(&mut self) -> usize {
        let released = self.len;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if entry.link.take().is_some() {
                entry.generation = entry.generation.wrapping_add(1);
                self.vacant.push(slot as u32);
            }
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
        released
    }
}
