use std::io::Cursor;
use std::mem;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::config::PAGE_SIZE;
use crate::common::error::{Result, StorageError};
use crate::index::hash::codec::FixedCodec;

/// Leaf page of the extendible hash table: a sorted array of key value
/// pairs, unique by key, bounded by `max_size`.
///
/// Layout: `[size u32][max_size u32][entries (key, value) x size]`.
pub struct HashTableBucketPage<K, V> {
    max_size: u32,
    entries: Vec<(K, V)>,
}

impl<K, V> HashTableBucketPage<K, V>
where
    K: FixedCodec + Ord,
    V: FixedCodec,
{
    pub fn init(max_size: u32) -> Result<Self> {
        let limit = Self::max_entries();
        if max_size as usize > limit {
            return Err(StorageError::BucketSizeTooLarge {
                requested: max_size,
                limit,
            });
        }
        Ok(Self {
            max_size,
            entries: Vec::new(),
        })
    }

    /// Largest entry count a page can hold for this key value encoding.
    pub fn max_entries() -> usize {
        (PAGE_SIZE - 8) / (K::ENCODED_LEN + V::ENCODED_LEN)
    }

    pub fn lookup(&self, key: &K) -> Option<&V> {
        let idx = self
            .entries
            .binary_search_by(|(existing, _)| existing.cmp(key))
            .ok()?;
        Some(&self.entries[idx].1)
    }

    /// Inserts in sorted position. Rejects duplicates and a full bucket.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.is_full() {
            return false;
        }
        match self.entries.binary_search_by(|(existing, _)| existing.cmp(&key)) {
            Ok(_) => false,
            Err(idx) => {
                self.entries.insert(idx, (key, value));
                true
            }
        }
    }

    /// Linear removal by key.
    pub fn remove(&mut self, key: &K) -> bool {
        for idx in 0..self.entries.len() {
            if self.entries[idx].0 == *key {
                self.entries.remove(idx);
                return true;
            }
        }
        false
    }

    pub fn key_at(&self, idx: usize) -> &K {
        &self.entries[idx].0
    }

    pub fn value_at(&self, idx: usize) -> &V {
        &self.entries[idx].1
    }

    pub fn entry_at(&self, idx: usize) -> &(K, V) {
        &self.entries[idx]
    }

    /// Moves every entry out, leaving the bucket empty. Split and merge
    /// redistribute through this.
    pub fn take_entries(&mut self) -> Vec<(K, V)> {
        mem::take(&mut self.entries)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        let max_size = cursor.read_u32::<LittleEndian>()?;

        let entry_len = K::ENCODED_LEN + V::ENCODED_LEN;
        let mut entries = Vec::with_capacity(size);
        for idx in 0..size {
            let offset = 8 + idx * entry_len;
            let key = K::decode_from(&data[offset..offset + K::ENCODED_LEN]);
            let value = V::decode_from(&data[offset + K::ENCODED_LEN..offset + entry_len]);
            entries.push((key, value));
        }

        Ok(Self { max_size, entries })
    }

    pub fn encode(&self, data: &mut [u8]) -> Result<()> {
        {
            let mut cursor = Cursor::new(&mut *data);
            cursor.write_u32::<LittleEndian>(self.entries.len() as u32)?;
            cursor.write_u32::<LittleEndian>(self.max_size)?;
        }
        let entry_len = K::ENCODED_LEN + V::ENCODED_LEN;
        for (idx, (key, value)) in self.entries.iter().enumerate() {
            let offset = 8 + idx * entry_len;
            key.encode_into(&mut data[offset..offset + K::ENCODED_LEN]);
            value.encode_into(&mut data[offset + K::ENCODED_LEN..offset + entry_len]);
        }
        Ok(())
    }
}
