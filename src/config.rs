//! Configuration for hashkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{HashKvError, Result};

/// Smallest page size accepted (must hold a key page header plus a few key bytes)
pub const MIN_PAGE_SIZE: usize = 128;

/// Largest page size accepted
pub const MAX_PAGE_SIZE: usize = 1024 * 1024;

/// Main configuration for a hashkv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── {name}.meta      (layout: page size, hash table size)
    ///     ├── {name}.kdb       (key pages)
    ///     └── {name}.vdb       (value pages)
    pub data_dir: PathBuf,

    /// Base name of the store files
    pub name: String,

    /// Size of every key and value page (in bytes)
    pub page_size: usize,

    /// Sync strategy: when to fsync the page files
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Number of buckets in the hash directory
    pub hash_table_size: usize,

    /// Bucket locks created up front (the pool still grows on demand)
    pub lock_pool_size: usize,
}

/// Page file sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync both page files after every successful mutation
    EveryOperation,

    /// Only sync on `Engine::close` or an explicit `Engine::sync`
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./hashkv_data"),
            name: "hashkv".to_string(),
            page_size: 4096,
            sync_strategy: SyncStrategy::Manual,
            hash_table_size: 1021,
            lock_pool_size: 64,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the values that the on-disk layout depends on
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(HashKvError::Config("store name must not be empty".into()));
        }

        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(HashKvError::Config(format!(
                "page size {} outside [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }

        if self.hash_table_size == 0 || self.hash_table_size > u32::MAX as usize {
            return Err(HashKvError::Config(format!(
                "hash table size {} outside [1, {}]",
                self.hash_table_size,
                u32::MAX
            )));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the base name of the store files
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the number of hash directory buckets
    pub fn hash_table_size(mut self, size: usize) -> Self {
        self.config.hash_table_size = size;
        self
    }

    /// Set the number of bucket locks created up front
    pub fn lock_pool_size(mut self, count: usize) -> Self {
        self.config.lock_pool_size = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
