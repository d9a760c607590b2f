//! Store Metadata
//!
//! Persists the layout a store was created with (page size, hash table
//! size) so that reopening with a different config cannot misread it.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{HashKvError, Result};

/// "HKVM"
pub const META_MAGIC: u32 = 0x484B_564D;

pub const META_VERSION: u16 = 1;

/// Layout of an existing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub magic: u32,
    pub version: u16,
    pub page_size: u32,
    pub hash_table_size: u32,
}

impl StoreMeta {
    pub fn from_config(config: &Config) -> Self {
        Self {
            magic: META_MAGIC,
            version: META_VERSION,
            page_size: config.page_size as u32,
            hash_table_size: config.hash_table_size as u32,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let meta: StoreMeta = bincode::deserialize(&bytes)?;

        if meta.magic != META_MAGIC {
            return Err(HashKvError::Corruption(format!(
                "{} has bad magic {:#010x}",
                path.display(),
                meta.magic
            )));
        }
        if meta.version != META_VERSION {
            return Err(HashKvError::Corruption(format!(
                "{} has unsupported version {}",
                path.display(),
                meta.version
            )));
        }
        Ok(meta)
    }

    /// Write via a temporary file so a crash never leaves a torn metadata file
    pub fn store(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        let tmp = path.with_extension("meta.tmp");
        fs::write(&tmp, &bytes)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Use the layout on disk if there is one, otherwise record the config's
    ///
    /// The config is updated in place to match whatever layout wins.
    pub fn negotiate(config: &mut Config, path: &Path) -> Result<Self> {
        if !path.exists() {
            let meta = Self::from_config(config);
            meta.store(path)?;
            tracing::info!(
                page_size = meta.page_size,
                hash_table_size = meta.hash_table_size,
                "Created store layout"
            );
            return Ok(meta);
        }

        let meta = Self::load(path)?;
        if meta.page_size as usize != config.page_size
            || meta.hash_table_size as usize != config.hash_table_size
        {
            tracing::warn!(
                configured_page_size = config.page_size,
                configured_hash_table_size = config.hash_table_size,
                page_size = meta.page_size,
                hash_table_size = meta.hash_table_size,
                "Config layout differs from existing store; using the store's"
            );
        }
        config.page_size = meta.page_size as usize;
        config.hash_table_size = meta.hash_table_size as usize;
        config.validate()?;
        Ok(meta)
    }
}
