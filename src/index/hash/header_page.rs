use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::config::{PageId, HASH_HEADER_MAX_DEPTH, INVALID_PAGE_ID};
use crate::common::error::{Result, StorageError};

/// Root page of the extendible hash table: a fixed fan-out of directory
/// page ids addressed by the top `max_depth` bits of the key hash.
///
/// Layout: `[max_depth u32][directory_page_ids u32 x 2^max_depth]`.
pub struct HashTableHeaderPage {
    max_depth: u32,
    directory_page_ids: Vec<PageId>,
}

impl HashTableHeaderPage {
    pub fn init(max_depth: u32) -> Result<Self> {
        if max_depth > HASH_HEADER_MAX_DEPTH {
            return Err(StorageError::InvalidDepth {
                requested: max_depth,
                limit: HASH_HEADER_MAX_DEPTH,
            });
        }
        Ok(Self {
            max_depth,
            directory_page_ids: vec![INVALID_PAGE_ID; 1 << max_depth],
        })
    }

    pub fn hash_to_directory_index(&self, hash: u32) -> usize {
        if self.max_depth == 0 {
            return 0;
        }
        (hash >> (32 - self.max_depth)) as usize
    }

    pub fn directory_page_id(&self, directory_idx: usize) -> PageId {
        self.directory_page_ids[directory_idx]
    }

    pub fn set_directory_page_id(&mut self, directory_idx: usize, directory_page_id: PageId) {
        self.directory_page_ids[directory_idx] = directory_page_id;
    }

    pub fn max_size(&self) -> usize {
        1 << self.max_depth
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let max_depth = cursor.read_u32::<LittleEndian>()?;
        let mut directory_page_ids = Vec::with_capacity(1 << max_depth);
        for _ in 0..(1u32 << max_depth) {
            directory_page_ids.push(cursor.read_u32::<LittleEndian>()?);
        }
        Ok(Self {
            max_depth,
            directory_page_ids,
        })
    }

    pub fn encode(&self, data: &mut [u8]) -> Result<()> {
        let mut cursor = Cursor::new(data);
        cursor.write_u32::<LittleEndian>(self.max_depth)?;
        for &page_id in &self.directory_page_ids {
            cursor.write_u32::<LittleEndian>(page_id)?;
        }
        Ok(())
    }
}
