use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::config::{PageId, HASH_DIRECTORY_MAX_DEPTH, INVALID_PAGE_ID};
use crate::common::error::{Result, StorageError};

/// Second level of the extendible hash table: 2^global_depth bucket page ids
/// addressed by the low `global_depth` bits of the hash, with a local depth
/// per entry controlling split granularity.
///
/// Layout: `[max_depth u32][global_depth u32][local_depths u8 x size]
/// [bucket_page_ids u32 x size]`.
pub struct HashTableDirectoryPage {
    max_depth: u32,
    global_depth: u32,
    local_depths: Vec<u8>,
    bucket_page_ids: Vec<PageId>,
}

impl HashTableDirectoryPage {
    pub fn init(max_depth: u32) -> Result<Self> {
        if max_depth > HASH_DIRECTORY_MAX_DEPTH {
            return Err(StorageError::InvalidDepth {
                requested: max_depth,
                limit: HASH_DIRECTORY_MAX_DEPTH,
            });
        }
        Ok(Self {
            max_depth,
            global_depth: 0,
            local_depths: vec![0],
            bucket_page_ids: vec![INVALID_PAGE_ID],
        })
    }

    pub fn hash_to_bucket_index(&self, hash: u32) -> usize {
        (hash & self.global_depth_mask()) as usize
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    pub fn local_depth(&self, bucket_idx: usize) -> u32 {
        self.local_depths[bucket_idx] as u32
    }

    pub fn local_depth_mask(&self, bucket_idx: usize) -> u32 {
        (1u32 << self.local_depths[bucket_idx]) - 1
    }

    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u8) {
        self.local_depths[bucket_idx] = local_depth;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: usize) {
        self.local_depths[bucket_idx] += 1;
    }

    pub fn decr_local_depth(&mut self, bucket_idx: usize) {
        self.local_depths[bucket_idx] -= 1;
    }

    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        self.bucket_page_ids[bucket_idx]
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, bucket_page_id: PageId) {
        self.bucket_page_ids[bucket_idx] = bucket_page_id;
    }

    /// Sibling slot that a split of `bucket_idx` would populate, computed
    /// from the local depth before any increment.
    pub fn split_image_index(&self, bucket_idx: usize) -> usize {
        bucket_idx ^ (1usize << self.local_depths[bucket_idx])
    }

    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn max_size(&self) -> usize {
        1 << self.max_depth
    }

    /// Doubles the directory by mirroring the lower half into the upper one.
    pub fn incr_global_depth(&mut self) -> Result<()> {
        if self.global_depth >= self.max_depth {
            return Err(StorageError::DirectoryFull);
        }
        let size = self.size();
        self.local_depths.extend_from_within(0..size);
        self.bucket_page_ids.extend_from_within(0..size);
        self.global_depth += 1;
        Ok(())
    }

    pub fn decr_global_depth(&mut self) {
        assert!(self.global_depth > 0, "cannot shrink an empty directory");
        self.global_depth -= 1;
        let size = self.size();
        self.local_depths.truncate(size);
        self.bucket_page_ids.truncate(size);
    }

    /// True iff every local depth is strictly below the global depth.
    pub fn can_shrink(&self) -> bool {
        self.global_depth > 0
            && self
                .local_depths
                .iter()
                .all(|&depth| (depth as u32) < self.global_depth)
    }

    /// Asserts the directory invariants. Test support.
    pub fn verify_integrity(&self) {
        for idx in 0..self.size() {
            let local = self.local_depth(idx);
            assert!(
                local <= self.global_depth,
                "local depth {local} above global depth {} at index {idx}",
                self.global_depth
            );
            let mask = self.local_depth_mask(idx);
            let page_id = self.bucket_page_id(idx);
            for other in 0..self.size() {
                if (other as u32) & mask == (idx as u32) & mask {
                    assert_eq!(
                        self.bucket_page_id(other),
                        page_id,
                        "indices {idx} and {other} share low bits but point to different buckets"
                    );
                    assert_eq!(
                        self.local_depth(other),
                        local,
                        "indices {idx} and {other} share a bucket but disagree on local depth"
                    );
                }
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let max_depth = cursor.read_u32::<LittleEndian>()?;
        let global_depth = cursor.read_u32::<LittleEndian>()?;
        let size = 1usize << global_depth;

        let mut local_depths = vec![0u8; size];
        std::io::Read::read_exact(&mut cursor, &mut local_depths)?;

        let mut bucket_page_ids = Vec::with_capacity(size);
        for _ in 0..size {
            bucket_page_ids.push(cursor.read_u32::<LittleEndian>()?);
        }

        Ok(Self {
            max_depth,
            global_depth,
            local_depths,
            bucket_page_ids,
        })
    }

    pub fn encode(&self, data: &mut [u8]) -> Result<()> {
        let mut cursor = Cursor::new(data);
        cursor.write_u32::<LittleEndian>(self.max_depth)?;
        cursor.write_u32::<LittleEndian>(self.global_depth)?;
        std::io::Write::write_all(&mut cursor, &self.local_depths)?;
        for &page_id in &self.bucket_page_ids {
            cursor.write_u32::<LittleEndian>(page_id)?;
        }
        Ok(())
    }
}
