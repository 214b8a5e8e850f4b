use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use crate::common::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::common::error::{Result, StorageError};
use crate::storage::tuple::TupleMeta;

// Page header: next_page_id (4) + tuple count (2).
const PAGE_HEADER_LEN: usize = 6;
// Per tuple: ts (8) + deleted flag (1) + payload length (2).
const SLOT_HEADER_LEN: usize = 11;

/// Heap page of versioned rows. Slots are append-only so a row's slot number
/// stays valid for its whole life; deletion only flips the metadata flag.
/// Pages chain through `next_page_id` for forward iteration.
///
/// Layout: `[next_page_id u32][count u16]` then per tuple
/// `[ts u64][deleted u8][len u16][payload]`.
pub struct TablePage {
    next_page_id: PageId,
    tuples: Vec<(TupleMeta, Bytes)>,
}

impl TablePage {
    pub fn init() -> Self {
        Self {
            next_page_id: INVALID_PAGE_ID,
            tuples: Vec::new(),
        }
    }

    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.next_page_id = page_id;
    }

    pub fn tuple_count(&self) -> usize {
        self.tuples.len()
    }

    fn used_bytes(&self) -> usize {
        PAGE_HEADER_LEN
            + self
                .tuples
                .iter()
                .map(|(_, payload)| SLOT_HEADER_LEN + payload.len())
                .sum::<usize>()
    }

    /// Whether a payload of `payload_len` bytes still fits.
    pub fn can_fit(&self, payload_len: usize) -> bool {
        self.used_bytes() + SLOT_HEADER_LEN + payload_len <= PAGE_SIZE
    }

    pub fn insert_tuple(&mut self, meta: TupleMeta, payload: Bytes) -> Option<u32> {
        if !self.can_fit(payload.len()) {
            return None;
        }
        self.tuples.push((meta, payload));
        Some((self.tuples.len() - 1) as u32)
    }

    pub fn tuple(&self, slot: u32) -> Option<(TupleMeta, Bytes)> {
        self.tuples.get(slot as usize).cloned()
    }

    pub fn tuple_meta(&self, slot: u32) -> Option<TupleMeta> {
        self.tuples.get(slot as usize).map(|(meta, _)| *meta)
    }

    pub fn update_tuple_meta(&mut self, meta: TupleMeta, slot: u32) -> bool {
        match self.tuples.get_mut(slot as usize) {
            Some(entry) => {
                entry.0 = meta;
                true
            }
            None => false,
        }
    }

    /// Replaces a tuple's metadata and payload. The new payload may differ
    /// in length as long as the page still fits.
    pub fn update_tuple(&mut self, meta: TupleMeta, payload: Bytes, slot: u32) -> Result<()> {
        let old_len = match self.tuples.get(slot as usize) {
            Some((_, old)) => old.len(),
            None => return Err(StorageError::Corrupted),
        };
        if self.used_bytes() - old_len + payload.len() > PAGE_SIZE {
            return Err(StorageError::TupleTooLarge);
        }
        self.tuples[slot as usize] = (meta, payload);
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let next_page_id = cursor.read_u32::<LittleEndian>()?;
        let count = cursor.read_u16::<LittleEndian>()? as usize;

        let mut tuples = Vec::with_capacity(count);
        let mut offset = PAGE_HEADER_LEN;
        for _ in 0..count {
            let mut cursor = Cursor::new(&data[offset..]);
            let ts = cursor.read_u64::<LittleEndian>()?;
            let is_deleted = cursor.read_u8()? != 0;
            let len = cursor.read_u16::<LittleEndian>()? as usize;
            let start = offset + SLOT_HEADER_LEN;
            if start + len > data.len() {
                return Err(StorageError::Corrupted);
            }
            tuples.push((
                TupleMeta::new(ts, is_deleted),
                Bytes::copy_from_slice(&data[start..start + len]),
            ));
            offset = start + len;
        }

        Ok(Self {
            next_page_id,
            tuples,
        })
    }

    pub fn encode(&self, data: &mut [u8]) -> Result<()> {
        let mut cursor = Cursor::new(&mut *data);
        cursor.write_u32::<LittleEndian>(self.next_page_id)?;
        cursor.write_u16::<LittleEndian>(self.tuples.len() as u16)?;
        for (meta, payload) in &self.tuples {
            cursor.write_u64::<LittleEndian>(meta.ts)?;
            cursor.write_u8(meta.is_deleted as u8)?;
            cursor.write_u16::<LittleEndian>(payload.len() as u16)?;
            std::io::Write::write_all(&mut cursor, payload)?;
        }
        Ok(())
    }
}
