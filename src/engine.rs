//! Engine Module
//!
//! The store that composes the hash directory, the undo log and the page
//! managers into get/set/remove.
//!
//! ## Responsibilities
//! - Negotiate the on-disk layout and open the page files
//! - Restore every bucket's chain head on startup
//! - Lock the key's bucket for the duration of each operation
//! - Make each multi-page mutation all-or-nothing through an `UnwindStack`

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, SyncStrategy};
use crate::error::{HashKvError, Result};
use crate::index::{ChainNode, HashDirectory, NodeId};
use crate::meta::StoreMeta;
use crate::storage::{
    max_key_len, max_value_len, KeyFile, KeyPage, KeyPageManager, ValueFile, ValuePage,
    ValuePageManager, FLAG_IN_USE, NIL_OFFSET,
};
use crate::unwind::{PageFile, PageTarget, UnwindStack};

/// The main storage engine
///
/// ## Concurrency Model: per-bucket readers/writer
///
/// - **Reads** (get): shared bucket lock, walk the on-disk chain
/// - **Writes** (set/remove): exclusive bucket lock, materialise the chain
///   into the directory, mutate pages under an undo log, then update the
///   directory and release the materialised nodes
/// - Operations on different buckets never wait on each other; page
///   allocation is serialized inside the page managers
pub struct Engine<K = KeyFile, V = ValueFile>
where
    K: KeyPageManager,
    V: ValuePageManager,
{
    /// Engine configuration (layout fields reflect the store on disk)
    config: Config,

    /// Bucket array and lock pool
    directory: HashDirectory,

    /// Key page manager
    keys: K,

    /// Value page manager
    values: V,
}

impl Engine<KeyFile, ValueFile> {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const META_EXTENSION: &'static str = "meta";
    const KEY_EXTENSION: &'static str = "kdb";
    const VALUE_EXTENSION: &'static str = "vdb";

    /// Open or create a file-backed store
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Negotiate page size and table size with `{name}.meta`
    /// 3. Open the key and value files (rebuilding their free sets)
    /// 4. Restore the chain heads into a fresh directory, repairing any
    ///    chain an interrupted mutation left half linked
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let mut config = config;
        let file = |extension: &str| {
            config
                .data_dir
                .join(format!("{}.{}", config.name, extension))
        };
        let meta_path = file(Self::META_EXTENSION);
        let key_path = file(Self::KEY_EXTENSION);
        let value_path = file(Self::VALUE_EXTENSION);

        StoreMeta::negotiate(&mut config, &meta_path)?;

        let keys = KeyFile::open(&key_path, config.page_size)?;
        let values = ValueFile::open(&value_path, config.page_size)?;

        Self::with_managers(config, keys, values)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }
}

impl<K, V> Engine<K, V>
where
    K: KeyPageManager,
    V: ValuePageManager,
{
    /// Build a store over caller-supplied page managers
    pub fn with_managers(config: Config, keys: K, values: V) -> Result<Self> {
        config.validate()?;

        if keys.page_size() != config.page_size || values.page_size() != config.page_size {
            return Err(HashKvError::Config(format!(
                "page managers use page sizes {}/{}, config says {}",
                keys.page_size(),
                values.page_size(),
                config.page_size
            )));
        }

        let directory = HashDirectory::allocate(config.hash_table_size, config.lock_pool_size)?;

        let chains = Self::recover(&directory, &keys, &values)?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            name = %config.name,
            buckets = directory.size(),
            chains,
            "Opened store"
        );

        Ok(Self {
            config,
            directory,
            keys,
            values,
        })
    }

    /// Bucket a key hashes to
    pub fn bucket_of(&self, key: &[u8]) -> usize {
        crc32fast::hash(key) as usize % self.directory.size()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(HashKvError::EmptyKey);
        }
        let max = max_key_len(self.config.page_size);
        if key.len() > max {
            return Err(HashKvError::KeyTooLarge { len: key.len(), max });
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        let max = max_value_len(self.config.page_size);
        if value.len() > max {
            return Err(HashKvError::ValueTooLarge {
                len: value.len(),
                max,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key(key)?;
        let bucket = self.bucket_of(key);
        let _guard = self.directory.read_lock(bucket)?;

        let mut offset = self.directory.get_offset(bucket)?;
        let mut seen = HashSet::new();
        while offset != NIL_OFFSET {
            if !seen.insert(offset) {
                return Err(HashKvError::Corruption(format!(
                    "cycle in chain of bucket {} at offset {}",
                    bucket, offset
                )));
            }

            let page = self.keys.read_page(offset)?;
            if page.key.as_slice() == key {
                let value = self.values.read_page(page.value_offset)?;
                return Ok(Some(value.data));
            }
            offset = page.next;
        }

        Ok(None)
    }

    /// Insert or replace a key-value pair
    ///
    /// Either every page write of the operation lands, or the store is left
    /// exactly as it was (the error is returned after unwinding).
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        let bucket = self.bucket_of(key);
        let _guard = self.directory.write_lock(bucket)?;

        self.with_chain(bucket, |chain| self.set_in_chain(bucket, chain, key, value))?;
        self.sync_if_needed()
    }

    /// Remove a key; `KeyNotFound` if it is absent
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;

        let bucket = self.bucket_of(key);
        let _guard = self.directory.write_lock(bucket)?;

        self.with_chain(bucket, |chain| self.remove_in_chain(bucket, chain, key))?;
        self.sync_if_needed()
    }

    /// Force both page files to disk
    pub fn sync(&self) -> Result<()> {
        self.keys.sync()?;
        self.values.sync()
    }

    /// Close the store gracefully
    pub fn close(self) -> Result<()> {
        self.sync()?;
        tracing::info!(name = %self.config.name, "Closed store");
        Ok(())
    }

    // =========================================================================
    // Write Path (bucket write lock held)
    // =========================================================================

    fn sync_if_needed(&self) -> Result<()> {
        match self.config.sync_strategy {
            SyncStrategy::EveryOperation => self.sync(),
            SyncStrategy::Manual => Ok(()),
        }
    }

    /// Materialise the bucket's chain, run `op` over it, always release it
    fn with_chain<T>(
        &self,
        bucket: usize,
        op: impl FnOnce(&[(NodeId, ChainNode)]) -> Result<T>,
    ) -> Result<T> {
        let result = self
            .materialize(bucket)
            .and_then(|()| self.directory.get_chain(bucket))
            .and_then(|chain| op(&chain));
        let released = self.directory.free_chain(bucket);

        let value = result?;
        released?;
        Ok(value)
    }

    fn materialize(&self, bucket: usize) -> Result<()> {
        if self.directory.chain_len(bucket)? != 0 {
            return Err(HashKvError::Invariant(format!(
                "bucket {} still holds a materialised chain",
                bucket
            )));
        }

        let mut offset = self.directory.get_offset(bucket)?;
        let mut seen = HashSet::new();
        while offset != NIL_OFFSET {
            if !seen.insert(offset) {
                return Err(HashKvError::Corruption(format!(
                    "cycle in chain of bucket {} at offset {}",
                    bucket, offset
                )));
            }

            let page = self.keys.read_page(offset)?;
            if !page.is_in_use() || page.bucket as usize != bucket {
                return Err(HashKvError::Corruption(format!(
                    "key page {} in chain of bucket {} is free or belongs to bucket {}",
                    offset, bucket, page.bucket
                )));
            }

            let next = page.next;
            self.directory
                .add_node(bucket, ChainNode::new(offset, page.into_ref()))?;
            offset = next;
        }

        tracing::debug!(bucket, nodes = seen.len(), "Materialised chain");
        Ok(())
    }

    fn set_in_chain(
        &self,
        bucket: usize,
        chain: &[(NodeId, ChainNode)],
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let existing = chain
            .iter()
            .position(|(_, node)| node.page().lock().key.as_slice() == key);

        let mut undo = UnwindStack::new();
        let mut retired = Vec::new();
        let written = self.write_pair(&mut undo, &mut retired, bucket, chain, existing, key, value);
        let node = undo.unwind(written)?;

        if let Some(pos) = existing {
            self.directory.remove_node(bucket, chain[pos].0)?;
        }
        self.directory.add_node(bucket, node)?;
        Self::release(retired)
    }

    fn remove_in_chain(
        &self,
        bucket: usize,
        chain: &[(NodeId, ChainNode)],
        key: &[u8],
    ) -> Result<()> {
        let pos = chain
            .iter()
            .position(|(_, node)| node.page().lock().key.as_slice() == key)
            .ok_or(HashKvError::KeyNotFound)?;

        let before = pos.checked_sub(1).and_then(|i| chain.get(i)).map(|(_, node)| node);
        let after = chain.get(pos + 1).map(|(_, node)| node);

        let mut undo = UnwindStack::new();
        let mut retired = Vec::new();
        let result = self.retire(&mut undo, &mut retired, before, &chain[pos].1, after);
        undo.unwind(result)?;

        self.directory.remove_node(bucket, chain[pos].0)?;
        Self::release(retired)
    }

    /// Hand pages retired by a committed operation back for reuse
    fn release(retired: Vec<(PageFile<'_>, i64)>) -> Result<()> {
        for (file, offset) in retired {
            file.release_page(offset)?;
        }
        Ok(())
    }

    /// Write a new value page and a new key page, link the key page behind
    /// the chain tail, then retire the key's previous pages if it existed
    ///
    /// The key page is written free and only marked in use once linked, so
    /// at every step the disk holds either the old chain or the old chain
    /// plus the new page.
    #[allow(clippy::too_many_arguments)]
    fn write_pair<'a>(
        &'a self,
        undo: &mut UnwindStack<'a>,
        retired: &mut Vec<(PageFile<'a>, i64)>,
        bucket: usize,
        chain: &[(NodeId, ChainNode)],
        existing: Option<usize>,
        key: &[u8],
        value: &[u8],
    ) -> Result<ChainNode> {
        let keys: &'a dyn KeyPageManager = &self.keys;
        let values: &'a dyn ValuePageManager = &self.values;

        // Free pages carry no flags, hence the 0 recorded for fresh pages
        let value_offset = values.allocate_page()?;
        undo.record_page_alloc(PageFile::Value(values), value_offset);
        values.write_page(value_offset, &ValuePage::new(value.to_vec()))?;
        undo.record_flag_write(
            PageTarget::Value {
                file: values,
                page: None,
            },
            value_offset,
            0,
        );

        let tail = chain.last().map(|(_, node)| node);

        let mut page = KeyPage::new(bucket as u32, key.to_vec(), value_offset);
        page.flags = 0;
        page.prev = tail.map_or(NIL_OFFSET, |node| node.offset());

        let key_offset = keys.allocate_page()?;
        undo.record_page_alloc(PageFile::Key(keys), key_offset);
        keys.write_page(key_offset, &page)?;
        let node = ChainNode::new(key_offset, page.into_ref());

        if let Some(tail) = tail {
            let previous = {
                let mut guard = tail.page().lock();
                let previous = guard.next;
                keys.write_next_offset(tail.offset(), Some(&mut *guard), key_offset)?;
                previous
            };
            undo.record_next_offset_write(
                keys,
                Some(Arc::clone(tail.page())),
                tail.offset(),
                previous,
            );
        }

        {
            let mut guard = node.page().lock();
            keys.write_flags(key_offset, Some(&mut *guard), FLAG_IN_USE)?;
        }
        undo.record_flag_write(
            PageTarget::Key {
                file: keys,
                page: Some(Arc::clone(node.page())),
            },
            key_offset,
            0,
        );

        if let Some(pos) = existing {
            let before = pos.checked_sub(1).and_then(|i| chain.get(i)).map(|(_, node)| node);
            let after = chain.get(pos + 1).map_or(&node, |(_, node)| node);
            self.retire(undo, retired, before, &chain[pos].1, Some(after))?;
        }

        tracing::trace!(bucket, key_offset, value_offset, "Wrote key/value pages");
        Ok(node)
    }

    /// Unlink `node` from its neighbours, then free its key and value pages
    ///
    /// Freed pages stay retired (not reusable) and are pushed onto `retired`
    /// for the caller to release once the operation commits.
    fn retire<'a>(
        &'a self,
        undo: &mut UnwindStack<'a>,
        retired: &mut Vec<(PageFile<'a>, i64)>,
        before: Option<&ChainNode>,
        node: &ChainNode,
        after: Option<&ChainNode>,
    ) -> Result<()> {
        let keys: &'a dyn KeyPageManager = &self.keys;
        let values: &'a dyn ValuePageManager = &self.values;

        let (prev, next, value_offset) = {
            let page = node.page().lock();
            (page.prev, page.next, page.value_offset)
        };

        if let Some(before) = before {
            let previous = {
                let mut guard = before.page().lock();
                let previous = guard.next;
                keys.write_next_offset(before.offset(), Some(&mut *guard), next)?;
                previous
            };
            undo.record_next_offset_write(
                keys,
                Some(Arc::clone(before.page())),
                before.offset(),
                previous,
            );
        }

        if let Some(after) = after {
            let previous = {
                let mut guard = after.page().lock();
                let previous = guard.prev;
                keys.write_prev_offset(after.offset(), Some(&mut *guard), prev)?;
                previous
            };
            undo.record_prev_offset_write(
                keys,
                Some(Arc::clone(after.page())),
                after.offset(),
                previous,
            );
        }

        let previous = {
            let mut guard = node.page().lock();
            let previous = guard.flags;
            keys.write_flags(node.offset(), Some(&mut *guard), previous & !FLAG_IN_USE)?;
            previous
        };
        undo.record_flag_write(
            PageTarget::Key {
                file: keys,
                page: Some(Arc::clone(node.page())),
            },
            node.offset(),
            previous,
        );
        keys.free_page(node.offset())?;
        undo.record_page_free(PageFile::Key(keys), node.offset());
        retired.push((PageFile::Key(keys), node.offset()));

        if value_offset != NIL_OFFSET {
            let mut value_page = values.read_page(value_offset)?;
            let previous = value_page.flags;
            values.write_flags(value_offset, Some(&mut value_page), previous & !FLAG_IN_USE)?;
            undo.record_flag_write(
                PageTarget::Value {
                    file: values,
                    page: None,
                },
                value_offset,
                previous,
            );
            values.free_page(value_offset)?;
            undo.record_page_free(PageFile::Value(values), value_offset);
            retired.push((PageFile::Value(values), value_offset));
        }

        Ok(())
    }

    // =========================================================================
    // Recovery (open only, no concurrent access)
    // =========================================================================

    /// Restore every bucket's chain head into `directory`, repairing what an
    /// interrupted mutation left on disk; returns the number of chains
    ///
    /// - of several candidate heads, the one no other candidate reaches wins
    /// - a chain ends at the first page that is free or in another bucket
    /// - a key linked twice keeps its later page
    /// - links are rewritten to match the surviving pages
    /// - in-use pages no chain reaches are freed
    fn recover(directory: &HashDirectory, keys: &K, values: &V) -> Result<usize> {
        let mut candidates: BTreeMap<usize, Vec<i64>> = BTreeMap::new();
        for (bucket, offset) in keys.chain_heads()? {
            let index = bucket as usize;
            if index >= directory.size() {
                return Err(HashKvError::Corruption(format!(
                    "key page {} belongs to bucket {}, table has {}",
                    offset,
                    bucket,
                    directory.size()
                )));
            }
            candidates.entry(index).or_default().push(offset);
        }

        let chains = candidates.len();
        let mut live_keys = HashSet::new();
        let mut live_values = HashSet::new();
        let mut repairs = 0usize;

        for (bucket, heads) in candidates {
            let chain = Self::resolve_head(keys, bucket, &heads)?;

            let mut newest = HashMap::new();
            for (pos, (_, page)) in chain.iter().enumerate() {
                newest.insert(page.key.clone(), pos);
            }

            let mut kept = Vec::with_capacity(newest.len());
            for (pos, (offset, page)) in chain.into_iter().enumerate() {
                if newest.get(&page.key) == Some(&pos) {
                    kept.push((offset, page));
                } else {
                    Self::discard_key_page(keys, offset)?;
                    repairs += 1;
                }
            }

            for (i, (offset, page)) in kept.iter().enumerate() {
                let prev = i.checked_sub(1).map_or(NIL_OFFSET, |j| kept[j].0);
                let next = kept.get(i + 1).map_or(NIL_OFFSET, |(next, _)| *next);
                if page.prev != prev {
                    keys.write_prev_offset(*offset, None, prev)?;
                    repairs += 1;
                }
                if page.next != next {
                    keys.write_next_offset(*offset, None, next)?;
                    repairs += 1;
                }
                live_keys.insert(*offset);
                live_values.insert(page.value_offset);
            }

            if let Some((head, _)) = kept.first() {
                directory.set_offset(bucket, *head)?;
            }
        }

        for offset in keys.live_offsets()? {
            if !live_keys.contains(&offset) {
                Self::discard_key_page(keys, offset)?;
                repairs += 1;
            }
        }

        for offset in values.live_offsets()? {
            if !live_values.contains(&offset) {
                values.write_flags(offset, None, 0)?;
                values.release_page(offset)?;
                repairs += 1;
            }
        }

        if repairs > 0 {
            tracing::warn!(repairs, "Repaired chains left by an interrupted mutation");
            keys.sync()?;
            values.sync()?;
        }
        Ok(chains)
    }

    /// The chain of the one candidate head that no other candidate reaches
    fn resolve_head(keys: &K, bucket: usize, heads: &[i64]) -> Result<Vec<(i64, KeyPage)>> {
        let mut chains = heads
            .iter()
            .map(|&head| Self::walk_live(keys, bucket, head))
            .collect::<Result<Vec<_>>>()?;

        let roots: Vec<usize> = (0..heads.len())
            .filter(|&i| {
                !chains.iter().enumerate().any(|(j, chain)| {
                    j != i && chain.iter().any(|(offset, _)| *offset == heads[i])
                })
            })
            .collect();

        match roots.as_slice() {
            [root] => Ok(chains.swap_remove(*root)),
            _ => Err(HashKvError::Corruption(format!(
                "bucket {} has {} unrelated chain heads among {:?}",
                bucket,
                roots.len(),
                heads
            ))),
        }
    }

    /// Pages reachable from `head` while they are in use and in `bucket`
    fn walk_live(keys: &K, bucket: usize, head: i64) -> Result<Vec<(i64, KeyPage)>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = head;

        while offset != NIL_OFFSET && seen.insert(offset) {
            let page = match keys.read_page(offset) {
                Ok(page) => page,
                Err(HashKvError::InvalidOffset(_)) => break,
                Err(e) => return Err(e),
            };
            if !page.is_in_use() || page.bucket as usize != bucket {
                break;
            }
            let next = page.next;
            chain.push((offset, page));
            offset = next;
        }
        Ok(chain)
    }

    fn discard_key_page(keys: &K, offset: i64) -> Result<()> {
        keys.write_flags(offset, None, 0)?;
        keys.release_page(offset)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the hash directory
    pub fn directory(&self) -> &HashDirectory {
        &self.directory
    }

    /// Get the key page manager
    pub fn keys(&self) -> &K {
        &self.keys
    }

    /// Get the value page manager
    pub fn values(&self) -> &V {
        &self.values
    }
}
