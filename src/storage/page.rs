//! Page formats
//!
//! Fixed-size key and value pages. Every page starts with a CRC32 over the
//! rest of the page followed by the flags word; the checksum is only
//! verified for pages marked `FLAG_IN_USE`.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;

use crate::error::{HashKvError, Result};

/// Sentinel offset: "no page"
pub const NIL_OFFSET: i64 = -1;

/// Page holds live data
pub const FLAG_IN_USE: u32 = 0x01;

/// crc(4) flags(4) bucket(4) key_len(2) reserved(2) prev(8) next(8) value(8)
pub const KEY_PAGE_HEADER_SIZE: usize = 40;

/// crc(4) flags(4) len(4) reserved(4)
pub const VALUE_PAGE_HEADER_SIZE: usize = 16;

const CRC_SIZE: usize = 4;

/// Shared in-memory handle to a key page
pub type KeyPageRef = Arc<Mutex<KeyPage>>;

/// Shared in-memory handle to a value page
pub type ValuePageRef = Arc<Mutex<ValuePage>>;

/// Largest key a key page of `page_size` bytes can hold
pub fn max_key_len(page_size: usize) -> usize {
    page_size
        .saturating_sub(KEY_PAGE_HEADER_SIZE)
        .min(u16::MAX as usize)
}

/// Largest value a value page of `page_size` bytes can hold
pub fn max_value_len(page_size: usize) -> usize {
    page_size
        .saturating_sub(VALUE_PAGE_HEADER_SIZE)
        .min(u32::MAX as usize)
}

/// Read the flags word from a raw page (or a raw page prefix of at least 8 bytes)
pub fn page_flags(raw: &[u8]) -> u32 {
    if raw.len() < CRC_SIZE + 4 {
        return 0;
    }
    (&raw[CRC_SIZE..]).get_u32_le()
}

fn seal(page: &mut [u8]) {
    let crc = crc32fast::hash(&page[CRC_SIZE..]);
    page[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
}

fn verify(raw: &[u8], offset: i64) -> Result<()> {
    if page_flags(raw) & FLAG_IN_USE == 0 {
        return Ok(());
    }

    let stored = (&raw[..CRC_SIZE]).get_u32_le();
    let computed = crc32fast::hash(&raw[CRC_SIZE..]);
    if stored != computed {
        return Err(HashKvError::Corruption(format!(
            "checksum mismatch at offset {}: stored {:#010x}, computed {:#010x}",
            offset, stored, computed
        )));
    }
    Ok(())
}

/// One key and the location of its value; a link in a bucket chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPage {
    pub flags: u32,
    /// Hash directory bucket this page is chained under
    pub bucket: u32,
    pub prev: i64,
    pub next: i64,
    pub value_offset: i64,
    pub key: Vec<u8>,
}

impl KeyPage {
    /// A fresh, unlinked, in-use key page
    pub fn new(bucket: u32, key: Vec<u8>, value_offset: i64) -> Self {
        Self {
            flags: FLAG_IN_USE,
            bucket,
            prev: NIL_OFFSET,
            next: NIL_OFFSET,
            value_offset,
            key,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> KeyPageRef {
        Arc::new(Mutex::new(self))
    }

    pub fn encode(&self, page_size: usize) -> Result<BytesMut> {
        let max = max_key_len(page_size);
        if self.key.len() > max {
            return Err(HashKvError::KeyTooLarge {
                len: self.key.len(),
                max,
            });
        }

        let mut buf = BytesMut::with_capacity(page_size);
        buf.put_u32_le(0); // crc, filled by seal()
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.bucket);
        buf.put_u16_le(self.key.len() as u16);
        buf.put_u16_le(0);
        buf.put_i64_le(self.prev);
        buf.put_i64_le(self.next);
        buf.put_i64_le(self.value_offset);
        buf.put_slice(&self.key);
        buf.resize(page_size, 0);

        seal(&mut buf);
        Ok(buf)
    }

    pub fn decode(raw: &[u8], offset: i64) -> Result<Self> {
        if raw.len() < KEY_PAGE_HEADER_SIZE {
            return Err(HashKvError::Corruption(format!(
                "key page at offset {} is truncated ({} bytes)",
                offset,
                raw.len()
            )));
        }
        verify(raw, offset)?;

        let mut cur = &raw[CRC_SIZE..];
        let flags = cur.get_u32_le();
        let bucket = cur.get_u32_le();
        let key_len = cur.get_u16_le() as usize;
        cur.advance(2);
        let prev = cur.get_i64_le();
        let next = cur.get_i64_le();
        let value_offset = cur.get_i64_le();

        if key_len > cur.remaining() {
            return Err(HashKvError::Corruption(format!(
                "key page at offset {} claims {} key bytes, only {} available",
                offset,
                key_len,
                cur.remaining()
            )));
        }

        Ok(Self {
            flags,
            bucket,
            prev,
            next,
            value_offset,
            key: cur[..key_len].to_vec(),
        })
    }
}

/// One value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePage {
    pub flags: u32,
    pub data: Vec<u8>,
}

impl ValuePage {
    /// A fresh, in-use value page
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            flags: FLAG_IN_USE,
            data,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    pub fn into_ref(self) -> ValuePageRef {
        Arc::new(Mutex::new(self))
    }

    pub fn encode(&self, page_size: usize) -> Result<BytesMut> {
        let max = max_value_len(page_size);
        if self.data.len() > max {
            return Err(HashKvError::ValueTooLarge {
                len: self.data.len(),
                max,
            });
        }

        let mut buf = BytesMut::with_capacity(page_size);
        buf.put_u32_le(0);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_u32_le(0);
        buf.put_slice(&self.data);
        buf.resize(page_size, 0);

        seal(&mut buf);
        Ok(buf)
    }

    pub fn decode(raw: &[u8], offset: i64) -> Result<Self> {
        if raw.len() < VALUE_PAGE_HEADER_SIZE {
            return Err(HashKvError::Corruption(format!(
                "value page at offset {} is truncated ({} bytes)",
                offset,
                raw.len()
            )));
        }
        verify(raw, offset)?;

        let mut cur = &raw[CRC_SIZE..];
        let flags = cur.get_u32_le();
        let len = cur.get_u32_le() as usize;
        cur.advance(4);

        if len > cur.remaining() {
            return Err(HashKvError::Corruption(format!(
                "value page at offset {} claims {} bytes, only {} available",
                offset,
                len,
                cur.remaining()
            )));
        }

        Ok(Self {
            flags,
            data: cur[..len].to_vec(),
        })
    }
}
